//! Per-series accumulation and its map/unmap lifecycle.

use std::sync::{atomic::Ordering, Arc};

use metrics::{atomics::AtomicU64, HistogramFn};
use parking_lot::Mutex;

use crate::attributes::{Attributes, Context};
use crate::buckets::ExponentialHistogramBuckets;
use crate::data::ExponentialHistogramPointData;
use crate::exemplar::{ExemplarFilter, ExemplarReservoir};

const UNMAPPED: u64 = 1;
const REF: u64 = 2;

/// Reference count and unmapped flag of a handle, packed into one atomic word.
///
/// Bit 0 is set once the handle is unmapped, which is terminal.  The remaining bits count the
/// references held on the handle, in steps of two.  A handle can only be unmapped while nobody
/// references it, and can no longer be referenced after that.
#[derive(Debug)]
pub struct MappingState {
    state: AtomicU64,
}

impl MappingState {
    /// Creates a mapped state holding one reference, owned by the caller.
    pub fn new() -> Self {
        Self { state: AtomicU64::new(REF) }
    }

    /// Takes a reference.
    ///
    /// Returns `false`, without taking a reference, if the state is unmapped.
    pub fn acquire(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state & UNMAPPED == 0).then(|| state + REF)
            })
            .is_ok()
    }

    /// Gives back a reference taken with [`acquire`](Self::acquire), or the one held since
    /// creation.
    pub fn release(&self) {
        let previous = self.state.fetch_sub(REF, Ordering::Release);
        debug_assert!(previous >= REF && previous & UNMAPPED == 0, "unbalanced release");
    }

    /// Unmaps the state if nobody holds a reference.
    ///
    /// Returns `true` if this call unmapped it.
    pub fn try_unmap(&self) -> bool {
        self.state.compare_exchange(0, UNMAPPED, Ordering::AcqRel, Ordering::Relaxed).is_ok()
    }

    /// Returns `true` if the state has been unmapped.
    pub fn is_unmapped(&self) -> bool {
        self.state.load(Ordering::Acquire) & UNMAPPED != 0
    }

    /// Gets the number of references currently held.
    pub fn ref_count(&self) -> u64 {
        self.state.load(Ordering::Acquire) / REF
    }
}

impl Default for MappingState {
    fn default() -> Self {
        MappingState::new()
    }
}

#[derive(Debug)]
struct Accumulator {
    sum: f64,
    count: u64,
    zero_count: u64,
    min: Option<f64>,
    max: Option<f64>,
    positive: ExponentialHistogramBuckets,
    negative: ExponentialHistogramBuckets,
    has_recordings: bool,
}

impl Accumulator {
    fn new(max_scale: i32, max_buckets: usize) -> Self {
        Self {
            sum: 0.0,
            count: 0,
            zero_count: 0,
            min: None,
            max: None,
            positive: ExponentialHistogramBuckets::new(max_scale, max_buckets),
            negative: ExponentialHistogramBuckets::new(max_scale, max_buckets),
            has_recordings: false,
        }
    }

    fn record(&mut self, value: f64) {
        if value == 0.0 {
            self.zero_count += 1;
        } else if value > 0.0 {
            let reduction = self.positive.record(value);
            self.negative.downscale(reduction);
        } else {
            let reduction = self.negative.record(value);
            self.positive.downscale(reduction);
        }

        self.sum += value;
        self.count += 1;
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
        self.has_recordings = true;
    }

    fn reset(&mut self, max_scale: i32) {
        self.sum = 0.0;
        self.count = 0;
        self.zero_count = 0;
        self.min = None;
        self.max = None;
        self.positive.clear(max_scale);
        self.negative.clear(max_scale);
        self.has_recordings = false;
    }
}

/// Accumulates the measurements of one series.
///
/// Handles are created by an [`Aggregator`](crate::Aggregator) and shared between every thread
/// recording into the series.  Recording goes through a [`BoundHandle`], which holds a reference
/// on the handle for as long as it lives; a collector reclaims a handle by unmapping it once no
/// references remain, after which the handle can never be recorded into again.
pub struct AggregatorHandle {
    mapping: MappingState,
    accumulator: Mutex<Accumulator>,
    reservoir: Box<dyn ExemplarReservoir>,
    filter: ExemplarFilter,
    max_scale: i32,
}

impl AggregatorHandle {
    pub(crate) fn new(
        max_scale: i32,
        max_buckets: usize,
        filter: ExemplarFilter,
        reservoir: Box<dyn ExemplarReservoir>,
    ) -> Self {
        Self {
            mapping: MappingState::new(),
            accumulator: Mutex::new(Accumulator::new(max_scale, max_buckets)),
            reservoir,
            filter,
            max_scale,
        }
    }

    /// Binds to the handle, taking a reference that is released when the returned guard drops.
    ///
    /// Returns `None` if the handle has been unmapped, in which case the caller needs a new
    /// handle for the series.
    pub fn bind(self: &Arc<Self>) -> Option<BoundHandle> {
        self.mapping.acquire().then(|| BoundHandle { handle: Arc::clone(self) })
    }

    /// Unmaps the handle if no references are held on it.
    ///
    /// Returns `true` if this call unmapped it.
    pub fn try_unmap(&self) -> bool {
        self.mapping.try_unmap()
    }

    /// Returns `true` if the handle has been unmapped.
    pub fn is_unmapped(&self) -> bool {
        self.mapping.is_unmapped()
    }

    /// Gets the number of references currently held.
    pub fn ref_count(&self) -> u64 {
        self.mapping.ref_count()
    }

    fn record(&self, value: f64, attributes: &Attributes, context: &Context) {
        debug_assert!(self.mapping.ref_count() > 0, "recording without a reference");
        if !value.is_finite() {
            return;
        }

        // Folds -0.0 into 0.0 so it cannot surface as the min or max.
        let value = if value == 0.0 { 0.0 } else { value };
        self.accumulator.lock().record(value);

        if self.filter.should_sample(context) {
            self.reservoir.offer(value, attributes, context);
        }
    }

    /// Snapshots everything recorded since the last reset.
    ///
    /// Returns `None` if nothing was recorded.  Exemplars are drained into the snapshot either way,
    /// and with `reset` the accumulation starts over at the maximum scale.
    pub fn aggregate_then_maybe_reset(
        &self,
        start_epoch_nanos: u64,
        epoch_nanos: u64,
        attributes: &Attributes,
        reset: bool,
    ) -> Option<ExponentialHistogramPointData> {
        let mut acc = self.accumulator.lock();
        if !acc.has_recordings {
            return None;
        }

        debug_assert_eq!(acc.positive.scale(), acc.negative.scale());
        let point = ExponentialHistogramPointData {
            start_epoch_nanos,
            epoch_nanos,
            attributes: attributes.clone(),
            scale: acc.positive.scale(),
            sum: acc.sum,
            count: acc.count,
            zero_count: acc.zero_count,
            min: acc.min,
            max: acc.max,
            positive: acc.positive.clone(),
            negative: acc.negative.clone(),
            exemplars: self.reservoir.collect_and_reset(attributes),
        };

        if reset {
            acc.reset(self.max_scale);
        }

        Some(point)
    }
}

impl std::fmt::Debug for AggregatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorHandle")
            .field("mapping", &self.mapping)
            .field("filter", &self.filter)
            .field("max_scale", &self.max_scale)
            .finish_non_exhaustive()
    }
}

/// A reference held on an [`AggregatorHandle`], through which measurements are recorded.
///
/// The reference is released when the guard drops.
#[derive(Debug)]
pub struct BoundHandle {
    handle: Arc<AggregatorHandle>,
}

impl BoundHandle {
    /// Takes ownership of the reference a handle is created with.
    pub(crate) fn adopt(handle: Arc<AggregatorHandle>) -> Self {
        Self { handle }
    }

    /// Gets the bound handle.
    pub fn handle(&self) -> &Arc<AggregatorHandle> {
        &self.handle
    }

    /// Records an integer measurement.
    pub fn record_long(&self, value: i64, attributes: &Attributes, context: &Context) {
        self.handle.record(value as f64, attributes, context);
    }

    /// Records a measurement.
    ///
    /// NaN and infinite values are ignored.
    pub fn record_double(&self, value: f64, attributes: &Attributes, context: &Context) {
        self.handle.record(value, attributes, context);
    }
}

impl Drop for BoundHandle {
    fn drop(&mut self) {
        self.handle.mapping.release();
    }
}

impl HistogramFn for BoundHandle {
    fn record(&self, value: f64) {
        self.record_double(value, &Attributes::empty(), &Context::none());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{AggregatorHandle, BoundHandle, MappingState};
    use crate::attributes::{Attributes, Context, SpanContext};
    use crate::clock::TimeSource;
    use crate::exemplar::{ExemplarFilter, FixedSizeExemplarReservoir, NoopExemplarReservoir};
    use metrics::HistogramFn;

    fn handle(max_buckets: usize) -> BoundHandle {
        BoundHandle::adopt(Arc::new(AggregatorHandle::new(
            20,
            max_buckets,
            ExemplarFilter::TraceBased,
            Box::new(NoopExemplarReservoir),
        )))
    }

    #[test]
    fn test_mapping_state() {
        let state = MappingState::new();
        assert_eq!(state.ref_count(), 1);
        assert!(!state.try_unmap());

        assert!(state.acquire());
        assert_eq!(state.ref_count(), 2);
        state.release();
        state.release();
        assert_eq!(state.ref_count(), 0);

        assert!(state.try_unmap());
        assert!(state.is_unmapped());
        assert!(!state.acquire());
        assert!(!state.try_unmap());
        assert_eq!(state.ref_count(), 0);
    }

    #[test]
    fn test_unmatched_acquire_blocks_unmap() {
        let state = MappingState::new();
        state.release();
        assert!(state.acquire());
        assert!(!state.try_unmap());
        assert!(!state.is_unmapped());
        state.release();
        assert!(state.try_unmap());
    }

    #[test]
    fn test_bind_and_drop() {
        let bound = handle(160);
        let handle = Arc::clone(bound.handle());
        assert_eq!(handle.ref_count(), 1);

        let second = handle.bind().expect("mapped handle must bind");
        assert_eq!(handle.ref_count(), 2);
        drop(second);
        drop(bound);
        assert_eq!(handle.ref_count(), 0);

        assert!(handle.try_unmap());
        assert!(handle.bind().is_none());
    }

    #[test]
    fn test_zero_and_signs() {
        let bound = handle(160);
        let attrs = Attributes::empty();
        bound.record_double(0.0, &attrs, &Context::none());
        bound.record_double(-0.0, &attrs, &Context::none());
        bound.record_double(3.0, &attrs, &Context::none());
        bound.record_long(-4, &attrs, &Context::none());

        let point = bound.handle().aggregate_then_maybe_reset(0, 1, &attrs, false).unwrap();
        assert_eq!(point.count, 4);
        assert_eq!(point.zero_count, 2);
        assert_eq!(point.sum, -1.0);
        assert_eq!(point.min, Some(-4.0));
        assert_eq!(point.max, Some(3.0));
        assert_eq!(point.positive.total_count(), 1);
        assert_eq!(point.negative.total_count(), 1);
        assert_eq!(point.positive.scale(), point.negative.scale());
    }

    #[test]
    fn test_max_of_zeros_is_positive_zero() {
        let bound = handle(160);
        bound.record_double(-0.0, &Attributes::empty(), &Context::none());
        let point =
            bound.handle().aggregate_then_maybe_reset(0, 1, &Attributes::empty(), true).unwrap();
        assert!(point.max.unwrap().is_sign_positive());
        assert!(point.min.unwrap().is_sign_positive());
    }

    #[test]
    fn test_non_finite_dropped() {
        let bound = handle(160);
        let attrs = Attributes::empty();
        bound.record_double(f64::NAN, &attrs, &Context::none());
        bound.record_double(f64::INFINITY, &attrs, &Context::none());
        bound.record_double(f64::NEG_INFINITY, &attrs, &Context::none());
        assert!(bound.handle().aggregate_then_maybe_reset(0, 1, &attrs, true).is_none());
    }

    #[test]
    fn test_siblings_share_scale() {
        let bound = handle(4);
        let attrs = Attributes::empty();
        bound.record_double(-1.0, &attrs, &Context::none());
        bound.record_double(1.0, &attrs, &Context::none());
        bound.record_double(1e6, &attrs, &Context::none());

        let point = bound.handle().aggregate_then_maybe_reset(0, 1, &attrs, true).unwrap();
        assert!(point.scale < 20);
        assert_eq!(point.positive.scale(), point.scale);
        assert_eq!(point.negative.scale(), point.scale);
        assert_eq!(point.negative.total_count(), 1);
    }

    #[test]
    fn test_reset_restores_max_scale() {
        let bound = handle(4);
        let attrs = Attributes::empty();
        bound.record_double(1.0, &attrs, &Context::none());
        bound.record_double(1e12, &attrs, &Context::none());

        let first = bound.handle().aggregate_then_maybe_reset(10, 20, &attrs, true).unwrap();
        assert!(first.scale < 20);
        assert_eq!(first.start_epoch_nanos, 10);
        assert_eq!(first.epoch_nanos, 20);
        assert!(bound.handle().aggregate_then_maybe_reset(20, 30, &attrs, true).is_none());

        bound.record_double(1.0, &attrs, &Context::none());
        let second = bound.handle().aggregate_then_maybe_reset(20, 30, &attrs, true).unwrap();
        assert_eq!(second.scale, 20);
        assert_eq!(second.count, 1);
    }

    #[test]
    fn test_non_reset_snapshots_identical() {
        let bound = handle(160);
        let attrs = Attributes::from(&[("k", "v")][..]);
        for value in [0.25, 7.0, -3.5, 0.0] {
            bound.record_double(value, &attrs, &Context::none());
        }

        let first = bound.handle().aggregate_then_maybe_reset(0, 5, &attrs, false);
        let second = bound.handle().aggregate_then_maybe_reset(0, 5, &attrs, false);
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[test]
    fn test_exemplars_follow_filter() {
        let handle = Arc::new(AggregatorHandle::new(
            20,
            160,
            ExemplarFilter::TraceBased,
            Box::new(FixedSizeExemplarReservoir::new(4, TimeSource::new())),
        ));
        let bound = BoundHandle::adopt(handle);
        let span = SpanContext { trace_id: [1; 16], span_id: [2; 8], sampled: true };
        let attrs = Attributes::empty();

        bound.record_double(1.0, &attrs, &Context::none());
        bound.record_double(2.0, &attrs, &Context::with_span(span));

        let point = bound.handle().aggregate_then_maybe_reset(0, 1, &attrs, true).unwrap();
        assert_eq!(point.exemplars.len(), 1);
        assert_eq!(point.exemplars[0].value, 2.0);
        assert_eq!(point.exemplars[0].span_context, Some(span));
    }

    #[test]
    fn test_histogram_fn() {
        let bound = handle(160);
        HistogramFn::record(&bound, 2.5);
        let point =
            bound.handle().aggregate_then_maybe_reset(0, 1, &Attributes::empty(), true).unwrap();
        assert_eq!(point.count, 1);
        assert_eq!(point.sum, 2.5);
    }
}
