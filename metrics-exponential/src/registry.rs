//! Storage of every series of one histogram instrument.

use std::{
    hash::BuildHasher,
    iter::repeat,
    sync::{Arc, PoisonError, RwLock},
};

use hashbrown::{hash_map::RawEntryMut, DefaultHashBuilder, HashMap};
use metrics::HistogramFn;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::aggregator::Aggregator;
use crate::attributes::{Attributes, Context};
use crate::data::{ExponentialHistogramPointData, InstrumentDescriptor, MetricData, Temporality};
use crate::handle::{AggregatorHandle, BoundHandle};

type HandleMap = HashMap<Attributes, Arc<AggregatorHandle>, DefaultHashBuilder>;

struct CollectState {
    last_collect_nanos: u64,
    cumulative: hashbrown::HashMap<Attributes, ExponentialHistogramPointData>,
}

/// Holds the handles of every series of one histogram instrument and collects them.
///
/// Recording binds to the handle of a series, creating it on first use.  Each collection resets
/// every handle and reclaims the ones nobody is bound to, so series that stop being recorded
/// into do not hold on to memory.  With cumulative temporality, the storage keeps merging what is
/// collected into running totals, which outlive reclaimed handles.
pub struct HistogramStorage {
    descriptor: InstrumentDescriptor,
    aggregator: Aggregator,
    shards: Vec<RwLock<HandleMap>>,
    shard_mask: usize,
    hasher: DefaultHashBuilder,
    start_epoch_nanos: u64,
    collect_state: Mutex<CollectState>,
    retired: Mutex<Vec<(Attributes, Arc<AggregatorHandle>)>>,
}

impl HistogramStorage {
    /// Creates an empty storage for the given instrument.
    pub fn new(descriptor: InstrumentDescriptor, aggregator: Aggregator) -> Self {
        let shard_count = std::cmp::max(1, num_cpus::get()).next_power_of_two();
        let shard_mask = shard_count - 1;
        let hasher = DefaultHashBuilder::default();
        let shards = repeat(())
            .take(shard_count)
            .map(|_| RwLock::new(HandleMap::with_hasher(hasher.clone())))
            .collect();
        let start_epoch_nanos = aggregator.time_source().now_epoch_nanos();

        Self {
            descriptor,
            aggregator,
            shards,
            shard_mask,
            hasher,
            start_epoch_nanos,
            collect_state: Mutex::new(CollectState {
                last_collect_nanos: start_epoch_nanos,
                cumulative: hashbrown::HashMap::new(),
            }),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Gets the instrument descriptor.
    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.descriptor
    }

    /// Gets the aggregator.
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Gets the number of series with a live handle.
    pub fn series_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    #[inline]
    fn get_hash_and_shard(&self, attributes: &Attributes) -> (u64, &RwLock<HandleMap>) {
        let hash = self.hasher.hash_one(attributes);
        (hash, &self.shards[hash as usize & self.shard_mask])
    }

    /// Binds to the handle of the series with the given attributes.
    ///
    /// A handle is created if the series has none.  The returned guard keeps the handle from
    /// being reclaimed until it drops.
    pub fn bind(&self, attributes: &Attributes) -> BoundHandle {
        let (hash, shard) = self.get_hash_and_shard(attributes);

        {
            let shard_read = shard.read().unwrap_or_else(PoisonError::into_inner);
            let entry = shard_read.raw_entry().from_key_hashed_nocheck(hash, attributes);
            if let Some(bound) = entry.and_then(|(_, handle)| handle.bind()) {
                return bound;
            }
        }

        let mut shard_write = shard.write().unwrap_or_else(PoisonError::into_inner);
        match shard_write.raw_entry_mut().from_key_hashed_nocheck(hash, attributes) {
            RawEntryMut::Occupied(mut entry) => {
                if let Some(bound) = entry.get().bind() {
                    return bound;
                }

                trace!(name = self.descriptor.name(), "replacing unmapped histogram handle");
                let bound = self.aggregator.create_handle();
                let stale = std::mem::replace(entry.get_mut(), Arc::clone(bound.handle()));
                self.retired.lock().push((attributes.clone(), stale));
                bound
            }
            RawEntryMut::Vacant(entry) => {
                trace!(name = self.descriptor.name(), "registering histogram series");
                let bound = self.aggregator.create_handle();
                entry.insert_hashed_nocheck(hash, attributes.clone(), Arc::clone(bound.handle()));
                bound
            }
        }
    }

    /// Records a measurement into the series with the given attributes.
    pub fn record_double(&self, value: f64, attributes: &Attributes, context: &Context) {
        self.bind(attributes).record_double(value, attributes, context);
    }

    /// Records an integer measurement into the series with the given attributes.
    pub fn record_long(&self, value: i64, attributes: &Attributes, context: &Context) {
        self.bind(attributes).record_long(value, attributes, context);
    }

    /// Collects every series.
    ///
    /// Handles are reset, and the ones nobody is bound to are reclaimed.  Collections are
    /// serialized.
    pub fn collect(&self) -> MetricData {
        let mut state = self.collect_state.lock();
        let now = self.aggregator.time_source().now_epoch_nanos();
        let window_start = state.last_collect_nanos;

        let mut deltas = Vec::new();
        let mut reclaimed = 0usize;
        for shard in &self.shards {
            let mut shard_write = shard.write().unwrap_or_else(PoisonError::into_inner);
            shard_write.retain(|attributes, handle| {
                // Also covers handles unmapped through a bound guard.
                let unmapped = handle.try_unmap() || handle.is_unmapped();
                if let Some(point) =
                    handle.aggregate_then_maybe_reset(window_start, now, attributes, true)
                {
                    deltas.push(point);
                }
                if unmapped {
                    trace!(name = self.descriptor.name(), "reclaiming idle histogram handle");
                    reclaimed += 1;
                }
                !unmapped
            });
        }

        // Replaced handles are unmapped, so nothing records into them anymore.
        for (attributes, stale) in self.retired.lock().drain(..) {
            let Some(point) = stale.aggregate_then_maybe_reset(window_start, now, &attributes, true)
            else {
                continue;
            };
            match deltas.iter_mut().find(|delta| delta.attributes == attributes) {
                Some(delta) => *delta = self.aggregator.merge(&point, delta),
                None => deltas.push(point),
            }
        }
        state.last_collect_nanos = now;

        let temporality = self.aggregator.temporality();
        let mut points = match temporality {
            Temporality::Delta => deltas,
            Temporality::Cumulative => {
                for mut delta in deltas {
                    delta.start_epoch_nanos = self.start_epoch_nanos;
                    let merged = match state.cumulative.get(&delta.attributes) {
                        Some(previous) => self.aggregator.merge(previous, &delta),
                        None => delta,
                    };
                    state.cumulative.insert(merged.attributes.clone(), merged);
                }

                state
                    .cumulative
                    .values()
                    .cloned()
                    .map(|mut point| {
                        point.epoch_nanos = now;
                        point
                    })
                    .collect()
            }
        };
        points.sort_by(|a, b| a.attributes.cmp(&b.attributes));

        debug!(
            name = self.descriptor.name(),
            points = points.len(),
            reclaimed,
            "collected exponential histogram"
        );
        self.aggregator.to_metric_data(&self.descriptor, points, temporality)
    }
}

impl HistogramFn for HistogramStorage {
    fn record(&self, value: f64) {
        self.record_double(value, &Attributes::empty(), &Context::none());
    }
}

impl std::fmt::Debug for HistogramStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistogramStorage")
            .field("descriptor", &self.descriptor)
            .field("aggregator", &self.aggregator)
            .field("shards", &self.shards.len())
            .finish_non_exhaustive()
    }
}
