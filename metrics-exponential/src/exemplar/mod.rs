//! Exemplars: individual measurements kept alongside an aggregate.

use crate::attributes::{Attributes, Context, SpanContext};

mod reservoir;
pub use self::reservoir::FixedSizeExemplarReservoir;

/// A single measurement retained for correlation with a trace.
#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
    /// Measurement attributes that are not part of the series' own attributes.
    pub filtered_attributes: Attributes,
    /// When the measurement was recorded, in nanoseconds since the Unix epoch.
    pub epoch_nanos: u64,
    /// The measured value.
    pub value: f64,
    /// The span the measurement was recorded in, if any.
    pub span_context: Option<SpanContext>,
}

/// Decides which measurements are offered to an exemplar reservoir.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ExemplarFilter {
    /// Every measurement is offered.
    AlwaysOn,
    /// No measurement is offered.
    AlwaysOff,
    /// Only measurements recorded within a sampled trace are offered.
    #[default]
    TraceBased,
}

impl ExemplarFilter {
    /// Returns `true` if a measurement taken in `context` should be offered.
    pub fn should_sample(&self, context: &Context) -> bool {
        match self {
            ExemplarFilter::AlwaysOn => true,
            ExemplarFilter::AlwaysOff => false,
            ExemplarFilter::TraceBased => context.is_sampled(),
        }
    }
}

/// Storage for the exemplars of one series.
///
/// Reservoirs are shared between every thread recording into a series, and must handle
/// concurrent offers as well as an offer racing with collection.
pub trait ExemplarReservoir: Send + Sync {
    /// Offers a measurement, which the reservoir may or may not keep.
    fn offer(&self, value: f64, attributes: &Attributes, context: &Context);

    /// Takes every kept exemplar and empties the reservoir.
    ///
    /// `point_attributes` are the attributes of the series being collected, and are removed from
    /// each exemplar's attributes.
    fn collect_and_reset(&self, point_attributes: &Attributes) -> Vec<Exemplar>;
}

/// A reservoir that never keeps anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopExemplarReservoir;

impl ExemplarReservoir for NoopExemplarReservoir {
    fn offer(&self, _: f64, _: &Attributes, _: &Context) {}

    fn collect_and_reset(&self, _: &Attributes) -> Vec<Exemplar> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{ExemplarFilter, ExemplarReservoir, NoopExemplarReservoir};
    use crate::attributes::{Attributes, Context, SpanContext};

    #[test]
    fn test_filters() {
        let span = SpanContext { trace_id: [7; 16], span_id: [9; 8], sampled: true };
        let sampled = Context::with_span(span);
        let unsampled = Context::none();

        assert!(ExemplarFilter::AlwaysOn.should_sample(&unsampled));
        assert!(!ExemplarFilter::AlwaysOff.should_sample(&sampled));
        assert!(ExemplarFilter::TraceBased.should_sample(&sampled));
        assert!(!ExemplarFilter::TraceBased.should_sample(&unsampled));
        assert_eq!(ExemplarFilter::default(), ExemplarFilter::TraceBased);
    }

    #[test]
    fn test_noop_reservoir() {
        let reservoir = NoopExemplarReservoir;
        reservoir.offer(1.0, &Attributes::empty(), &Context::none());
        assert!(reservoir.collect_and_reset(&Attributes::empty()).is_empty());
    }
}
