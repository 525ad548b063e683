//! Collected histogram data.

use metrics::{SharedString, Unit};

use crate::attributes::Attributes;
use crate::buckets::ExponentialHistogramBuckets;
use crate::exemplar::Exemplar;

/// Whether collected points cover one collection interval or everything since the start.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Temporality {
    /// Each point covers the time since the previous collection.
    Delta,
    /// Each point covers the time since the instrument was created.
    #[default]
    Cumulative,
}

/// Describes the instrument a histogram belongs to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstrumentDescriptor {
    name: SharedString,
    description: SharedString,
    unit: Option<Unit>,
}

impl InstrumentDescriptor {
    /// Creates a descriptor with the given name.
    pub fn new<N>(name: N) -> Self
    where
        N: Into<SharedString>,
    {
        Self { name: name.into(), description: SharedString::const_str(""), unit: None }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description<D>(mut self, description: D) -> Self
    where
        D: Into<SharedString>,
    {
        self.description = description.into();
        self
    }

    /// Sets the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Gets the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the description, which is empty when unset.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Gets the unit, if set.
    pub fn unit(&self) -> Option<Unit> {
        self.unit
    }
}

/// The aggregate of one histogram series over a time window.
///
/// Positive and negative buckets always share the same scale.
#[derive(Clone, Debug, PartialEq)]
pub struct ExponentialHistogramPointData {
    /// Start of the window, in nanoseconds since the Unix epoch.
    pub start_epoch_nanos: u64,
    /// End of the window, in nanoseconds since the Unix epoch.
    pub epoch_nanos: u64,
    /// The attributes of the series.
    pub attributes: Attributes,
    /// Scale shared by both bucket sets.
    pub scale: i32,
    /// Sum of all recorded values.
    pub sum: f64,
    /// Number of recorded values, zeros included.
    pub count: u64,
    /// Number of recorded zeros.
    pub zero_count: u64,
    /// Smallest recorded value.
    pub min: Option<f64>,
    /// Largest recorded value.
    pub max: Option<f64>,
    /// Buckets of positive values.
    pub positive: ExponentialHistogramBuckets,
    /// Buckets of negative values, indexed by magnitude.
    pub negative: ExponentialHistogramBuckets,
    /// Exemplars sampled during the window.
    pub exemplars: Vec<Exemplar>,
}

/// All points collected from one histogram instrument.
#[derive(Clone, Debug, PartialEq)]
pub struct ExponentialHistogramData {
    /// Temporality of every point.
    pub temporality: Temporality,
    /// One point per series.
    pub points: Vec<ExponentialHistogramPointData>,
}

/// Histogram data together with the instrument it was collected from.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricData {
    /// The instrument.
    pub descriptor: InstrumentDescriptor,
    /// The collected data.
    pub data: ExponentialHistogramData,
}

impl MetricData {
    /// Returns `true` if no series had anything to report.
    pub fn is_empty(&self) -> bool {
        self.data.points.is_empty()
    }

    /// Gets the point for the series with the given attributes, if one was collected.
    pub fn point(&self, attributes: &Attributes) -> Option<&ExponentialHistogramPointData> {
        self.data.points.iter().find(|point| &point.attributes == attributes)
    }
}
