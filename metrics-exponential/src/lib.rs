//! Exponential bucket histograms.
//!
//! An exponential histogram places each measurement into a bucket whose bounds grow
//! geometrically: at scale `s`, bucket `i` covers `(base^i, base^(i+1)]` with
//! `base = 2^(2^-s)`.  The relative error of a bucket is therefore the same across the whole
//! range of values, and a histogram needs no configured boundaries.  Each histogram keeps a
//! bounded number of buckets and, when a measurement falls outside of what those can span, lowers
//! its scale until it fits.
//!
//! # Recording
//!
//! An [`Aggregator`] holds the configuration of one instrument and creates an
//! [`AggregatorHandle`] per series.  Measurements are recorded through a [`BoundHandle`], which
//! keeps the handle from being reclaimed while it lives.  [`HistogramStorage`] does the
//! bookkeeping of handles by series [`Attributes`]:
//!
//! ```
//! use metrics_exponential::{
//!     Aggregator, Attributes, Context, HistogramStorage, InstrumentDescriptor, Temporality,
//! };
//!
//! let aggregator = Aggregator::builder().with_temporality(Temporality::Delta).build();
//! let storage = HistogramStorage::new(InstrumentDescriptor::new("request.latency"), aggregator);
//!
//! let attributes = Attributes::from(&[("route", "/users")][..]);
//! storage.record_double(0.042, &attributes, &Context::none());
//! storage.record_double(0.120, &attributes, &Context::none());
//!
//! let data = storage.collect();
//! let point = data.point(&attributes).unwrap();
//! assert_eq!(point.count, 2);
//! assert_eq!(point.positive.total_count(), 2);
//! ```
//!
//! # Collection
//!
//! [`AggregatorHandle::aggregate_then_maybe_reset`] snapshots a handle into an
//! [`ExponentialHistogramPointData`], and [`Aggregator::merge`] combines consecutive snapshots
//! into cumulative ones, rescaling buckets as needed.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod aggregator;
pub use self::aggregator::{Aggregator, AggregatorBuilder, BuildError};

mod attributes;
pub use self::attributes::{Attributes, Context, SpanContext};

mod buckets;
pub use self::buckets::ExponentialHistogramBuckets;

mod clock;
pub use self::clock::TimeSource;

mod data;
pub use self::data::{
    ExponentialHistogramData, ExponentialHistogramPointData, InstrumentDescriptor, MetricData,
    Temporality,
};

pub mod exemplar;

mod handle;
pub use self::handle::{AggregatorHandle, BoundHandle, MappingState};

pub mod indexer;

mod registry;
pub use self::registry::HistogramStorage;

pub mod storage;

pub use metrics::Label;
