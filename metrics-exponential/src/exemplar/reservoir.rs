use std::{
    cell::RefCell,
    sync::atomic::{AtomicUsize, Ordering::Relaxed},
};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use super::{Exemplar, ExemplarReservoir};
use crate::attributes::{Attributes, Context, SpanContext};
use crate::clock::TimeSource;

thread_local! {
    static FAST_RNG: RefCell<Xoshiro256StarStar> =
        RefCell::new(Xoshiro256StarStar::from_rng(&mut rand::rng()));
}

fn fastrand(upper: usize) -> usize {
    FAST_RNG.with(|rng| rng.borrow_mut().random_range(0..upper))
}

struct Sample {
    value: f64,
    attributes: Attributes,
    epoch_nanos: u64,
    span_context: Option<SpanContext>,
}

/// A fixed-size reservoir that keeps a uniform sample of the measurements offered to it.
///
/// Uses Algorithm R: the first `size` measurements are kept outright, and the `n`-th one after
/// that replaces a random cell with probability `size / n`.  Collection resets the sample.
pub struct FixedSizeExemplarReservoir {
    cells: Box<[Mutex<Option<Sample>>]>,
    seen: AtomicUsize,
    time: TimeSource,
}

impl FixedSizeExemplarReservoir {
    /// Creates a reservoir holding up to `size` exemplars, timestamped by `time`.
    ///
    /// A reservoir of size zero keeps nothing.
    pub fn new(size: usize, time: TimeSource) -> Self {
        let cells = (0..size).map(|_| Mutex::new(None)).collect();
        Self { cells, seen: AtomicUsize::new(0), time }
    }

    /// Gets the number of cells in the reservoir.
    pub fn size(&self) -> usize {
        self.cells.len()
    }
}

impl ExemplarReservoir for FixedSizeExemplarReservoir {
    fn offer(&self, value: f64, attributes: &Attributes, context: &Context) {
        if self.cells.is_empty() {
            return;
        }

        let seen = self.seen.fetch_add(1, Relaxed);
        let idx = if seen < self.cells.len() { seen } else { fastrand(seen + 1) };
        if let Some(cell) = self.cells.get(idx) {
            *cell.lock() = Some(Sample {
                value,
                attributes: attributes.clone(),
                epoch_nanos: self.time.now_epoch_nanos(),
                span_context: context.span_context().copied(),
            });
        }
    }

    fn collect_and_reset(&self, point_attributes: &Attributes) -> Vec<Exemplar> {
        let exemplars = self
            .cells
            .iter()
            .filter_map(|cell| cell.lock().take())
            .map(|sample| Exemplar {
                filtered_attributes: sample.attributes.difference(point_attributes),
                epoch_nanos: sample.epoch_nanos,
                value: sample.value,
                span_context: sample.span_context,
            })
            .collect();
        self.seen.store(0, Relaxed);
        exemplars
    }
}

impl std::fmt::Debug for FixedSizeExemplarReservoir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedSizeExemplarReservoir")
            .field("size", &self.cells.len())
            .field("seen", &self.seen.load(Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use quanta::Clock;

    use super::FixedSizeExemplarReservoir;
    use crate::attributes::{Attributes, Context, SpanContext};
    use crate::clock::TimeSource;
    use crate::exemplar::ExemplarReservoir;

    fn sampled() -> Context {
        Context::with_span(SpanContext { trace_id: [3; 16], span_id: [4; 8], sampled: true })
    }

    #[test]
    fn test_keeps_first_offers_until_full() {
        let (clock, mock) = Clock::mock();
        let reservoir = FixedSizeExemplarReservoir::new(2, TimeSource::with_epoch(clock, 500));

        reservoir.offer(1.5, &Attributes::empty(), &sampled());
        mock.increment(Duration::from_nanos(10));
        reservoir.offer(2.5, &Attributes::empty(), &Context::none());

        let exemplars = reservoir.collect_and_reset(&Attributes::empty());
        assert_eq!(exemplars.len(), 2);
        assert_eq!(exemplars[0].value, 1.5);
        assert_eq!(exemplars[0].epoch_nanos, 500);
        assert_eq!(exemplars[0].span_context, sampled().span_context().copied());
        assert_eq!(exemplars[1].value, 2.5);
        assert_eq!(exemplars[1].epoch_nanos, 510);
        assert_eq!(exemplars[1].span_context, None);

        assert!(reservoir.collect_and_reset(&Attributes::empty()).is_empty());
    }

    #[test]
    fn test_never_exceeds_size() {
        let reservoir = FixedSizeExemplarReservoir::new(3, TimeSource::new());
        for i in 0..1000 {
            reservoir.offer(f64::from(i), &Attributes::empty(), &Context::none());
        }

        let exemplars = reservoir.collect_and_reset(&Attributes::empty());
        assert_eq!(exemplars.len(), 3);
        assert!(exemplars.iter().all(|e| (0.0..1000.0).contains(&e.value)));
    }

    #[test]
    fn test_filters_point_attributes() {
        let reservoir = FixedSizeExemplarReservoir::new(1, TimeSource::new());
        let measured = Attributes::from(&[("route", "/"), ("user", "7")][..]);
        reservoir.offer(4.0, &measured, &Context::none());

        let series = Attributes::from(&[("route", "/")][..]);
        let exemplars = reservoir.collect_and_reset(&series);
        assert_eq!(exemplars[0].filtered_attributes, Attributes::from(&[("user", "7")][..]));
    }

    #[test]
    fn test_zero_size() {
        let reservoir = FixedSizeExemplarReservoir::new(0, TimeSource::new());
        reservoir.offer(1.0, &Attributes::empty(), &Context::none());
        assert_eq!(reservoir.size(), 0);
        assert!(reservoir.collect_and_reset(&Attributes::empty()).is_empty());
    }
}
