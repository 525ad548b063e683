use super::AdaptingIntegerArray;

/// A bounded counter over a sliding, contiguous range of bucket indices.
///
/// Counts live in a single [`AdaptingIntegerArray`] of `max_size` slots, and bucket index `i` is
/// always stored at slot `i mod max_size`.  Moving or growing the populated range in either
/// direction therefore only moves the logical bounds: counts that are already stored never have
/// to be shifted around.
///
/// The populated range can never span more than `max_size` indices.  An increment that would
/// require a wider range is rejected, and the counter is left exactly as it was.
#[derive(Clone, Debug)]
pub struct CircularBufferCounter {
    bounds: Option<(i32, i32)>,
    backing: AdaptingIntegerArray,
}

impl CircularBufferCounter {
    /// Creates an empty counter able to span up to `max_size` bucket indices.
    ///
    /// A `max_size` of zero is raised to one.
    pub fn new(max_size: usize) -> Self {
        Self { bounds: None, backing: AdaptingIntegerArray::new(max_size.max(1)) }
    }

    /// Gets the maximum span of the populated range.
    pub fn max_size(&self) -> usize {
        self.backing.len()
    }

    /// Returns `true` if nothing has been recorded since creation or the last clear.
    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    /// Gets the lowest populated bucket index, if any.
    pub fn index_start(&self) -> Option<i32> {
        self.bounds.map(|(start, _)| start)
    }

    /// Gets the highest populated bucket index, if any.
    pub fn index_end(&self) -> Option<i32> {
        self.bounds.map(|(_, end)| end)
    }

    /// Gets the count at the given bucket index.
    ///
    /// Indices outside of the populated range always have a count of zero.
    pub fn get(&self, index: i32) -> u64 {
        match self.bounds {
            Some((start, end)) if index >= start && index <= end => {
                self.backing.get(self.slot(index))
            }
            _ => 0,
        }
    }

    /// Adds `delta` to the count at the given bucket index.
    ///
    /// The populated range is extended to cover `index` if necessary.  Returns `false`, without
    /// changing anything, if covering `index` would make the range wider than `max_size`.
    pub fn increment(&mut self, index: i32, delta: u64) -> bool {
        let (start, end) = match self.bounds {
            None => (index, index),
            Some((start, end)) => (start.min(index), end.max(index)),
        };

        if i64::from(end) - i64::from(start) + 1 > self.max_size() as i64 {
            return false;
        }

        self.bounds = Some((start, end));
        let slot = self.slot(index);
        self.backing.increment(slot, delta);
        true
    }

    /// Iterates over every index in the populated range along with its count, lowest first.
    pub fn iter(&self) -> impl Iterator<Item = (i32, u64)> + '_ {
        let range = match self.bounds {
            Some((start, end)) => start..=end,
            #[allow(clippy::reversed_empty_ranges)]
            None => 1..=0,
        };
        range.map(move |index| (index, self.get(index)))
    }

    /// Resets the counter to the empty range.
    pub fn clear(&mut self) {
        self.bounds = None;
        self.backing.clear();
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn slot(&self, index: i32) -> usize {
        i64::from(index).rem_euclid(self.max_size() as i64) as usize
    }
}
