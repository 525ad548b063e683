use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::clock::TimeSource;
use crate::data::{
    ExponentialHistogramData, ExponentialHistogramPointData, InstrumentDescriptor, MetricData,
    Temporality,
};
use crate::exemplar::{
    ExemplarFilter, ExemplarReservoir, FixedSizeExemplarReservoir, NoopExemplarReservoir,
};
use crate::handle::{AggregatorHandle, BoundHandle};
use crate::indexer::MAX_SCALE;

const DEFAULT_MAX_BUCKETS: usize = 160;
const DEFAULT_MAX_SCALE: i32 = MAX_SCALE;
const DEFAULT_RESERVOIR_SIZE: usize = 1;
const MIN_CONFIGURABLE_SCALE: i32 = -10;

/// Errors that could occur while configuring an aggregator.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BuildError {
    /// The maximum number of buckets is too small to hold any range of values.
    #[error("invalid maximum bucket count {max_buckets}: must be at least 2")]
    InvalidMaxBuckets {
        /// The rejected bucket count.
        max_buckets: usize,
    },

    /// The maximum scale is outside of the supported range.
    #[error("invalid maximum scale {max_scale}: must be between -10 and 20")]
    InvalidMaxScale {
        /// The rejected scale.
        max_scale: i32,
    },

    /// The exemplar reservoir cannot hold a single exemplar.
    #[error("invalid exemplar reservoir size {size}: must be at least 1")]
    InvalidReservoirSize {
        /// The rejected size.
        size: usize,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Exemplars {
    Disabled,
    FixedSize(usize),
}

/// Builder for an [`Aggregator`].
#[derive(Debug)]
pub struct AggregatorBuilder {
    max_buckets: usize,
    max_scale: i32,
    temporality: Temporality,
    filter: ExemplarFilter,
    exemplars: Exemplars,
    time: Option<TimeSource>,
}

impl AggregatorBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            max_buckets: DEFAULT_MAX_BUCKETS,
            max_scale: DEFAULT_MAX_SCALE,
            temporality: Temporality::default(),
            filter: ExemplarFilter::default(),
            exemplars: Exemplars::FixedSize(DEFAULT_RESERVOIR_SIZE),
            time: None,
        }
    }

    /// Sets the maximum number of buckets for each sign.
    ///
    /// The more buckets, the finer the resolution a histogram can keep for a given range of
    /// values.
    ///
    /// Defaults to 160.
    ///
    /// # Errors
    ///
    /// If `max_buckets` is less than 2, an error is returned.
    pub fn with_max_buckets(mut self, max_buckets: usize) -> Result<Self, BuildError> {
        if max_buckets < 2 {
            return Err(BuildError::InvalidMaxBuckets { max_buckets });
        }
        self.max_buckets = max_buckets;
        Ok(self)
    }

    /// Sets the scale histograms start at, and return to whenever they are reset.
    ///
    /// Defaults to 20.
    ///
    /// # Errors
    ///
    /// If `max_scale` is not between -10 and 20, inclusive, an error is returned.
    pub fn with_max_scale(mut self, max_scale: i32) -> Result<Self, BuildError> {
        if !(MIN_CONFIGURABLE_SCALE..=MAX_SCALE).contains(&max_scale) {
            return Err(BuildError::InvalidMaxScale { max_scale });
        }
        self.max_scale = max_scale;
        Ok(self)
    }

    /// Sets the temporality of collected data.
    ///
    /// Defaults to [`Temporality::Cumulative`].
    #[must_use]
    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = temporality;
        self
    }

    /// Sets which measurements are offered as exemplars.
    ///
    /// Defaults to [`ExemplarFilter::TraceBased`].
    #[must_use]
    pub fn with_exemplar_filter(mut self, filter: ExemplarFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets how many exemplars each series keeps per collection.
    ///
    /// Defaults to 1.
    ///
    /// # Errors
    ///
    /// If `size` is zero, an error is returned.  Use [`without_exemplars`](Self::without_exemplars)
    /// to disable exemplars.
    pub fn with_exemplar_reservoir_size(mut self, size: usize) -> Result<Self, BuildError> {
        if size == 0 {
            return Err(BuildError::InvalidReservoirSize { size });
        }
        self.exemplars = Exemplars::FixedSize(size);
        Ok(self)
    }

    /// Disables exemplars entirely.
    #[must_use]
    pub fn without_exemplars(mut self) -> Self {
        self.exemplars = Exemplars::Disabled;
        self
    }

    /// Sets the source of timestamps.
    ///
    /// Defaults to a monotonic clock anchored to the system time when the aggregator is built.
    #[must_use]
    pub fn with_time_source(mut self, time: TimeSource) -> Self {
        self.time = Some(time);
        self
    }

    /// Builds the aggregator.
    pub fn build(self) -> Aggregator {
        Aggregator {
            max_buckets: self.max_buckets,
            max_scale: self.max_scale,
            temporality: self.temporality,
            filter: self.filter,
            exemplars: self.exemplars,
            time: self.time.unwrap_or_default(),
        }
    }
}

impl Default for AggregatorBuilder {
    fn default() -> Self {
        AggregatorBuilder::new()
    }
}

/// Creates handles for the series of one histogram instrument, and turns what they accumulate
/// into metric data.
#[derive(Clone, Debug)]
pub struct Aggregator {
    max_buckets: usize,
    max_scale: i32,
    temporality: Temporality,
    filter: ExemplarFilter,
    exemplars: Exemplars,
    time: TimeSource,
}

impl Aggregator {
    /// Creates a builder for an aggregator.
    pub fn builder() -> AggregatorBuilder {
        AggregatorBuilder::new()
    }

    /// Gets the maximum number of buckets for each sign.
    pub fn max_buckets(&self) -> usize {
        self.max_buckets
    }

    /// Gets the scale histograms start at.
    pub fn max_scale(&self) -> i32 {
        self.max_scale
    }

    /// Gets the temporality of collected data.
    pub fn temporality(&self) -> Temporality {
        self.temporality
    }

    /// Gets the exemplar filter.
    pub fn exemplar_filter(&self) -> ExemplarFilter {
        self.filter
    }

    /// Gets the source of timestamps.
    pub fn time_source(&self) -> &TimeSource {
        &self.time
    }

    /// Creates a new handle.
    ///
    /// The handle is returned bound: the caller owns the reference it was created with, which is
    /// released when the returned guard drops.
    pub fn create_handle(&self) -> BoundHandle {
        let reservoir: Box<dyn ExemplarReservoir> = match self.exemplars {
            Exemplars::Disabled => Box::new(NoopExemplarReservoir),
            Exemplars::FixedSize(size) => {
                Box::new(FixedSizeExemplarReservoir::new(size, self.time.clone()))
            }
        };
        trace!(max_scale = self.max_scale, max_buckets = self.max_buckets, "creating histogram handle");

        BoundHandle::adopt(Arc::new(AggregatorHandle::new(
            self.max_scale,
            self.max_buckets,
            self.filter,
            reservoir,
        )))
    }

    /// Merges two consecutive accumulations of the same series.
    ///
    /// The result covers the start of `previous` to the end of `current`, and carries the
    /// exemplars of `current`.  Both bucket sets end up at the same scale, which may be lower
    /// than either operand's if their combined range requires it.
    pub fn merge(
        &self,
        previous: &ExponentialHistogramPointData,
        current: &ExponentialHistogramPointData,
    ) -> ExponentialHistogramPointData {
        let mut positive = previous.positive.clone();
        positive.merge(&current.positive);
        let mut negative = previous.negative.clone();
        negative.merge(&current.negative);

        let scale = positive.scale().min(negative.scale());
        positive.downscale(positive.scale() - scale);
        negative.downscale(negative.scale() - scale);

        ExponentialHistogramPointData {
            start_epoch_nanos: previous.start_epoch_nanos,
            epoch_nanos: current.epoch_nanos,
            attributes: current.attributes.clone(),
            scale,
            sum: previous.sum + current.sum,
            count: previous.count + current.count,
            zero_count: previous.zero_count + current.zero_count,
            min: combine(previous.min, current.min, f64::min),
            max: combine(previous.max, current.max, f64::max),
            positive,
            negative,
            exemplars: current.exemplars.clone(),
        }
    }

    /// Wraps collected points into metric data for the given instrument.
    pub fn to_metric_data(
        &self,
        descriptor: &InstrumentDescriptor,
        points: Vec<ExponentialHistogramPointData>,
        temporality: Temporality,
    ) -> MetricData {
        MetricData {
            descriptor: descriptor.clone(),
            data: ExponentialHistogramData { temporality, points },
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        AggregatorBuilder::new().build()
    }
}

fn combine(a: Option<f64>, b: Option<f64>, f: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::{Aggregator, BuildError};
    use crate::attributes::{Attributes, Context};
    use crate::data::{InstrumentDescriptor, Temporality};
    use crate::exemplar::ExemplarFilter;

    #[test]
    fn test_defaults() {
        let aggregator = Aggregator::default();
        assert_eq!(aggregator.max_buckets(), 160);
        assert_eq!(aggregator.max_scale(), 20);
        assert_eq!(aggregator.temporality(), Temporality::Cumulative);
        assert_eq!(aggregator.exemplar_filter(), ExemplarFilter::TraceBased);
    }

    #[test]
    fn test_invalid_configuration() {
        assert_eq!(
            Aggregator::builder().with_max_buckets(1).unwrap_err(),
            BuildError::InvalidMaxBuckets { max_buckets: 1 }
        );
        assert_eq!(
            Aggregator::builder().with_max_scale(21).unwrap_err(),
            BuildError::InvalidMaxScale { max_scale: 21 }
        );
        assert_eq!(
            Aggregator::builder().with_max_scale(-11).unwrap_err(),
            BuildError::InvalidMaxScale { max_scale: -11 }
        );
        assert_eq!(
            Aggregator::builder().with_exemplar_reservoir_size(0).unwrap_err(),
            BuildError::InvalidReservoirSize { size: 0 }
        );
        assert_eq!(
            BuildError::InvalidMaxBuckets { max_buckets: 1 }.to_string(),
            "invalid maximum bucket count 1: must be at least 2"
        );
    }

    #[test]
    fn test_valid_configuration() {
        let aggregator = Aggregator::builder()
            .with_max_buckets(2)
            .and_then(|b| b.with_max_scale(-10))
            .and_then(|b| b.with_exemplar_reservoir_size(8))
            .unwrap()
            .with_temporality(Temporality::Delta)
            .with_exemplar_filter(ExemplarFilter::AlwaysOn)
            .build();
        assert_eq!(aggregator.max_buckets(), 2);
        assert_eq!(aggregator.max_scale(), -10);
        assert_eq!(aggregator.temporality(), Temporality::Delta);
    }

    #[test]
    fn test_created_handle_starts_bound() {
        let aggregator = Aggregator::default();
        let bound = aggregator.create_handle();
        assert_eq!(bound.handle().ref_count(), 1);
        assert!(!bound.handle().try_unmap());

        let handle = std::sync::Arc::clone(bound.handle());
        drop(bound);
        assert!(handle.try_unmap());
    }

    #[test]
    fn test_merge_mixed_scales() {
        let aggregator = Aggregator::builder().with_max_buckets(8).unwrap().build();
        let attrs = Attributes::empty();

        let first = aggregator.create_handle();
        first.record_double(1.0, &attrs, &Context::none());
        first.record_double(-2.0, &attrs, &Context::none());
        let previous = first.handle().aggregate_then_maybe_reset(0, 10, &attrs, true).unwrap();

        let second = aggregator.create_handle();
        second.record_double(1e9, &attrs, &Context::none());
        second.record_double(1.0, &attrs, &Context::none());
        second.record_double(0.0, &attrs, &Context::none());
        let current = second.handle().aggregate_then_maybe_reset(10, 20, &attrs, true).unwrap();
        assert!(current.scale < previous.scale);

        let merged = aggregator.merge(&previous, &current);
        assert_eq!(merged.start_epoch_nanos, 0);
        assert_eq!(merged.epoch_nanos, 20);
        assert_eq!(merged.count, 5);
        assert_eq!(merged.zero_count, 1);
        assert_eq!(merged.sum, 1.0 - 2.0 + 1e9 + 1.0);
        assert_eq!(merged.min, Some(-2.0));
        assert_eq!(merged.max, Some(1e9));
        assert_eq!(merged.positive.total_count(), 3);
        assert_eq!(merged.negative.total_count(), 1);
        assert_eq!(merged.positive.scale(), merged.scale);
        assert_eq!(merged.negative.scale(), merged.scale);
        assert!(merged.scale <= current.scale);

        let reversed = aggregator.merge(&current, &previous);
        assert_eq!(reversed.positive.total_count(), 3);
        assert_eq!(reversed.scale, merged.scale);
    }

    #[test]
    fn test_to_metric_data() {
        let aggregator = Aggregator::default();
        let descriptor = InstrumentDescriptor::new("latency");
        let data = aggregator.to_metric_data(&descriptor, Vec::new(), Temporality::Delta);
        assert_eq!(data.descriptor, descriptor);
        assert_eq!(data.data.temporality, Temporality::Delta);
        assert!(data.is_empty());
    }
}
