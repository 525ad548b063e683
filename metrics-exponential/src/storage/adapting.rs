//! A counter array whose element width grows with the values it holds.

/// Element width of an [`AdaptingIntegerArray`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Width {
    /// 8-bit counters.
    U8,
    /// 16-bit counters.
    U16,
    /// 32-bit counters.
    U32,
    /// 64-bit counters.
    U64,
}

impl Width {
    /// Gets the number of bits used per element.
    pub fn bits(self) -> u32 {
        match self {
            Width::U8 => 8,
            Width::U16 => 16,
            Width::U32 => 32,
            Width::U64 => 64,
        }
    }

    fn required_for(value: u64) -> Width {
        if value <= u64::from(u8::MAX) {
            Width::U8
        } else if value <= u64::from(u16::MAX) {
            Width::U16
        } else if value <= u64::from(u32::MAX) {
            Width::U32
        } else {
            Width::U64
        }
    }
}

#[derive(Clone, Debug)]
enum Cells {
    U8(Box<[u8]>),
    U16(Box<[u16]>),
    U32(Box<[u32]>),
    U64(Box<[u64]>),
}

/// Adds `delta` to `slot` if the result fits, otherwise hands back the value that did not fit.
fn try_increment<T>(slot: &mut T, delta: u64) -> Result<(), u64>
where
    T: Copy + Into<u64> + TryFrom<u64>,
{
    let value = (*slot).into().saturating_add(delta);
    match T::try_from(value) {
        Ok(narrowed) => {
            *slot = narrowed;
            Ok(())
        }
        Err(_) => Err(value),
    }
}

/// A fixed-length array of counters that widens its backing storage on demand.
///
/// Counts start out stored as bytes. When an increment produces a value that the current width
/// cannot represent, the whole array is reallocated once at the narrowest width that fits, and
/// every existing count is carried over. Reads always return the exact count as a `u64`.
#[derive(Clone, Debug)]
pub struct AdaptingIntegerArray {
    cells: Cells,
}

impl AdaptingIntegerArray {
    /// Creates a zero-filled array of `len` counters at the narrowest width.
    pub fn new(len: usize) -> Self {
        Self { cells: Cells::U8(vec![0; len].into_boxed_slice()) }
    }

    /// Gets the number of counters in the array.
    pub fn len(&self) -> usize {
        match &self.cells {
            Cells::U8(c) => c.len(),
            Cells::U16(c) => c.len(),
            Cells::U32(c) => c.len(),
            Cells::U64(c) => c.len(),
        }
    }

    /// Returns `true` if the array holds no counters at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets the current element width.
    pub fn width(&self) -> Width {
        match &self.cells {
            Cells::U8(_) => Width::U8,
            Cells::U16(_) => Width::U16,
            Cells::U32(_) => Width::U32,
            Cells::U64(_) => Width::U64,
        }
    }

    /// Gets the count stored at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    pub fn get(&self, idx: usize) -> u64 {
        match &self.cells {
            Cells::U8(c) => u64::from(c[idx]),
            Cells::U16(c) => u64::from(c[idx]),
            Cells::U32(c) => u64::from(c[idx]),
            Cells::U64(c) => c[idx],
        }
    }

    /// Adds `delta` to the count stored at `idx`, widening the array if required.
    ///
    /// 64-bit counts saturate rather than wrap.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    pub fn increment(&mut self, idx: usize, delta: u64) {
        let overflow = match &mut self.cells {
            Cells::U8(c) => try_increment(&mut c[idx], delta),
            Cells::U16(c) => try_increment(&mut c[idx], delta),
            Cells::U32(c) => try_increment(&mut c[idx], delta),
            Cells::U64(c) => try_increment(&mut c[idx], delta),
        };

        if let Err(value) = overflow {
            self.widen(Width::required_for(value));
            match &mut self.cells {
                Cells::U8(c) => c[idx] = value as u8,
                Cells::U16(c) => c[idx] = value as u16,
                Cells::U32(c) => c[idx] = value as u32,
                Cells::U64(c) => c[idx] = value,
            }
        }
    }

    /// Resets every count to zero and returns to the narrowest width.
    pub fn clear(&mut self) {
        let len = self.len();
        self.cells = Cells::U8(vec![0; len].into_boxed_slice());
    }

    // Only ever called with a width wider than the current one, so the casts below never truncate.
    #[allow(clippy::cast_possible_truncation)]
    fn widen(&mut self, width: Width) {
        debug_assert!(width > self.width());

        let values = (0..self.len()).map(|idx| self.get(idx));
        let cells = match width {
            Width::U8 => Cells::U8(values.map(|v| v as u8).collect()),
            Width::U16 => Cells::U16(values.map(|v| v as u16).collect()),
            Width::U32 => Cells::U32(values.map(|v| v as u32).collect()),
            Width::U64 => Cells::U64(values.collect()),
        };
        self.cells = cells;
    }
}
