use tracing::debug;

use crate::indexer::{ExponentialHistogramIndexer, MAX_SCALE, MIN_SCALE};
use crate::storage::CircularBufferCounter;

/// One signed half of an exponential histogram: bucket counts for values of a single sign, at an
/// adaptively chosen scale.
///
/// Buckets are kept in a [`CircularBufferCounter`] bounded to `max_buckets` indices.  When a
/// value falls outside of what the counter can span, the scale is reduced just enough for the
/// existing range and the new value to fit, and every stored count is collapsed into the coarser
/// buckets.  The scale never increases, short of being cleared.
#[derive(Clone, Debug)]
pub struct ExponentialHistogramBuckets {
    scale: i32,
    counts: CircularBufferCounter,
    indexer: &'static ExponentialHistogramIndexer,
}

impl ExponentialHistogramBuckets {
    /// Creates empty buckets at the given scale, spanning at most `max_buckets` indices.
    ///
    /// `scale` is clamped to the supported range, and `max_buckets` is raised to 2 if lower:
    /// two buckets at the coarsest scale are enough for every finite double.
    pub fn new(scale: i32, max_buckets: usize) -> Self {
        let scale = scale.clamp(MIN_SCALE, MAX_SCALE);
        let max_buckets = max_buckets.max(2);
        Self {
            scale,
            counts: CircularBufferCounter::new(max_buckets),
            indexer: ExponentialHistogramIndexer::get(scale),
        }
    }

    /// Gets the current scale.
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// Gets the maximum number of buckets.
    pub fn max_buckets(&self) -> usize {
        self.counts.max_size()
    }

    /// Gets the index of the first populated bucket, or zero if there are none.
    pub fn offset(&self) -> i32 {
        self.counts.index_start().unwrap_or(0)
    }

    /// Gets the count of the bucket at `index`.
    pub fn get(&self, index: i32) -> u64 {
        self.counts.get(index)
    }

    /// Iterates over the populated range as `(index, count)` pairs.
    ///
    /// Buckets inside the range with a count of zero are included.
    pub fn iter(&self) -> impl Iterator<Item = (i32, u64)> + '_ {
        self.counts.iter()
    }

    /// Gets the bucket counts, starting from the bucket at [`offset`](Self::offset).
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.counts.iter().map(|(_, count)| count).collect()
    }

    /// Gets the sum of all bucket counts.
    pub fn total_count(&self) -> u64 {
        self.counts.iter().map(|(_, count)| count).sum()
    }

    /// Returns `true` if no value has been recorded.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Records a value, downscaling first if the value does not fit.
    ///
    /// The sign of `value` is ignored.  Returns by how much the scale was reduced, so that a
    /// sibling set of buckets can be kept at the same scale.
    ///
    /// Zero and non-finite values are never passed in: the owning handle counts zeros separately
    /// and drops non-finite values before they get here.
    pub(crate) fn record(&mut self, value: f64) -> i32 {
        debug_assert!(value != 0.0 && value.is_finite(), "zero and non-finite values are not bucketed");

        let value = value.abs();
        let index = self.indexer.compute_index(value);
        if self.counts.increment(index, 1) {
            return 0;
        }

        let (start, end) = match (self.counts.index_start(), self.counts.index_end()) {
            (Some(start), Some(end)) => (start.min(index), end.max(index)),
            _ => (index, index),
        };
        let reduction = self.scale_reduction(self.scale, i64::from(start), i64::from(end));
        self.downscale(reduction);

        let index = self.indexer.compute_index(value);
        let recorded = self.counts.increment(index, 1);
        debug_assert!(recorded, "value must fit after downscaling");

        reduction
    }

    /// Reduces the scale by `by`, collapsing `2^by` adjacent buckets into one.
    ///
    /// Every stored count is carried over into its coarser bucket, so the total count is
    /// unchanged.  The scale never goes below [`MIN_SCALE`]: larger reductions stop there.
    pub fn downscale(&mut self, by: i32) {
        debug_assert!(by >= 0, "scale can only be reduced");
        let by = by.min(self.scale - MIN_SCALE);
        if by <= 0 {
            return;
        }

        if !self.counts.is_empty() {
            let mut rebuilt = CircularBufferCounter::new(self.counts.max_size());
            for (index, count) in self.counts.iter().filter(|(_, count)| *count > 0) {
                let recorded = rebuilt.increment(shift_index(index, by), count);
                debug_assert!(recorded, "downscaled buckets must fit");
            }
            self.counts = rebuilt;
        }

        debug!(from = self.scale, to = self.scale - by, "downscaled exponential histogram buckets");
        self.scale -= by;
        self.indexer = ExponentialHistogramIndexer::get(self.scale);
    }

    /// Adds the counts of `other` into these buckets.
    ///
    /// Both sets are brought to the lower of the two scales first, and further down if the union
    /// of their ranges would not fit within `max_buckets`.  `other` is left untouched.
    pub fn merge(&mut self, other: &ExponentialHistogramBuckets) {
        let (other_start, other_end) = match (other.counts.index_start(), other.counts.index_end())
        {
            (Some(start), Some(end)) => (i64::from(start), i64::from(end)),
            _ => return,
        };

        let common_scale = self.scale.min(other.scale);
        let mut delta_self = self.scale - common_scale;
        let delta_other = other.scale - common_scale;

        let mut start = other_start >> delta_other;
        let mut end = other_end >> delta_other;
        if let (Some(self_start), Some(self_end)) = (self.counts.index_start(), self.counts.index_end()) {
            start = start.min(i64::from(self_start) >> delta_self);
            end = end.max(i64::from(self_end) >> delta_self);
        }

        delta_self += self.scale_reduction(common_scale, start, end);
        if delta_self > 0 {
            debug!(
                scale = self.scale,
                other_scale = other.scale,
                reduction = delta_self,
                "rescaling exponential histogram buckets for merge"
            );
        }
        self.downscale(delta_self);

        let delta_other = other.scale - self.scale;
        for (index, count) in other.counts.iter().filter(|(_, count)| *count > 0) {
            let recorded = self.counts.increment(shift_index(index, delta_other), count);
            debug_assert!(recorded, "merged buckets must fit");
        }
    }

    /// Clears every count and resets the scale.
    pub(crate) fn clear(&mut self, scale: i32) {
        let scale = scale.clamp(MIN_SCALE, MAX_SCALE);
        self.counts.clear();
        self.scale = scale;
        self.indexer = ExponentialHistogramIndexer::get(scale);
    }

    /// Computes the smallest scale reduction after which `[start, end]`, given at `scale`, spans
    /// no more than `max_buckets` indices.
    ///
    /// Never reduces below [`MIN_SCALE`], where every finite double falls within `[-1, 0]`.
    fn scale_reduction(&self, scale: i32, mut start: i64, mut end: i64) -> i32 {
        let max_size = self.counts.max_size() as i64;
        let mut reduction = 0;
        while end - start + 1 > max_size && scale - reduction > MIN_SCALE {
            start >>= 1;
            end >>= 1;
            reduction += 1;
        }
        reduction
    }
}

impl PartialEq for ExponentialHistogramBuckets {
    fn eq(&self, other: &Self) -> bool {
        self.scale == other.scale
            && self.max_buckets() == other.max_buckets()
            && self.counts.iter().eq(other.counts.iter())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn shift_index(index: impl Into<i64>, by: i32) -> i32 {
    (index.into() >> by) as i32
}
