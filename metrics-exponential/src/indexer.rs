//! Mapping of values to exponential bucket indices.
//!
//! At a given scale `s`, bucket `i` covers the half-open range `(base^i, base^(i+1)]`, where
//! `base = 2^(2^-s)`.  Increasing the scale by one splits every bucket in two, and so an index at
//! a finer scale can always be converted to the index at a coarser scale with an arithmetic right
//! shift.

use once_cell::sync::OnceCell;

/// The finest supported scale.
pub const MAX_SCALE: i32 = 20;

/// The coarsest supported scale.
///
/// At this scale, every finite positive double falls into either bucket `-1` or bucket `0`.
pub const MIN_SCALE: i32 = -11;

/// Positive scales up to this one locate buckets through a precomputed boundary table.
const LOOKUP_TABLE_MAX_SCALE: i32 = 10;

const SIGNIFICAND_WIDTH: u32 = 52;
const SIGNIFICAND_MASK: u64 = (1 << SIGNIFICAND_WIDTH) - 1;
const EXPONENT_MASK: u64 = 0x7FF << SIGNIFICAND_WIDTH;
const EXPONENT_BIAS: i32 = 1023;
// Leading zeros of a significand whose highest set bit sits in the implicit-bit position.
const NORMALIZED_LEADING_ZEROS: u32 = 64 - SIGNIFICAND_WIDTH - 1;

const CACHE_LEN: usize = (MAX_SCALE - MIN_SCALE + 1) as usize;

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY: OnceCell<ExponentialHistogramIndexer> = OnceCell::new();
static INDEXERS: [OnceCell<ExponentialHistogramIndexer>; CACHE_LEN] = [EMPTY; CACHE_LEN];

/// Splits a finite, positive double into its unbiased base-2 exponent and the significand bits of
/// its normalized form.  Subnormals are normalized, so the exponent can go below -1022.
fn decompose(value: f64) -> (i32, u64) {
    let bits = value.to_bits();
    let raw_exponent = ((bits & EXPONENT_MASK) >> SIGNIFICAND_WIDTH) as i32;
    let significand = bits & SIGNIFICAND_MASK;

    if raw_exponent == 0 {
        let shift = significand.leading_zeros() - NORMALIZED_LEADING_ZEROS;
        let normalized = (significand << shift) & SIGNIFICAND_MASK;
        (1 - EXPONENT_BIAS - shift as i32, normalized)
    } else {
        (raw_exponent - EXPONENT_BIAS, significand)
    }
}

/// Computes `2^exponent` exactly, flushing to zero or infinity outside of the double range.
fn exp2i(exponent: i32) -> f64 {
    if exponent > EXPONENT_BIAS {
        f64::INFINITY
    } else if exponent >= 1 - EXPONENT_BIAS {
        f64::from_bits(((exponent + EXPONENT_BIAS) as u64) << SIGNIFICAND_WIDTH)
    } else if exponent >= 1 - EXPONENT_BIAS - SIGNIFICAND_WIDTH as i32 {
        f64::from_bits(1 << (exponent + EXPONENT_BIAS - 1 + SIGNIFICAND_WIDTH as i32))
    } else {
        0.0
    }
}

/// Lower boundary, within `[1, 2]`, of sub-bucket `j` at a positive scale.
///
/// `j / 2^scale` is exact in binary, so a boundary shared between two scales is computed from the
/// very same input at both of them, which keeps indices consistent across scales.
fn significand_boundary(j: i64, scale: i32) -> f64 {
    (j as f64 / (1u64 << scale) as f64).exp2()
}

/// Maps positive values to bucket indices at a fixed scale.
///
/// Indexers are immutable and cached per scale, see [`ExponentialHistogramIndexer::get`].
#[derive(Debug)]
pub struct ExponentialHistogramIndexer {
    scale: i32,
    scale_factor: f64,
    boundaries: Option<Box<[f64]>>,
}

impl ExponentialHistogramIndexer {
    /// Gets the shared indexer for the given scale.
    ///
    /// # Panics
    ///
    /// Panics if `scale` is outside of `[MIN_SCALE, MAX_SCALE]`.
    pub fn get(scale: i32) -> &'static ExponentialHistogramIndexer {
        assert!(
            (MIN_SCALE..=MAX_SCALE).contains(&scale),
            "scale {} outside of supported range",
            scale
        );
        INDEXERS[(scale - MIN_SCALE) as usize].get_or_init(|| Self::new(scale))
    }

    fn new(scale: i32) -> Self {
        let scale_factor = std::f64::consts::LOG2_E * exp2i(scale);
        let boundaries = (scale > 0 && scale <= LOOKUP_TABLE_MAX_SCALE).then(|| {
            (0..1i64 << scale).map(|j| significand_boundary(j, scale)).collect::<Box<[f64]>>()
        });

        Self { scale, scale_factor, boundaries }
    }

    /// Gets the scale of this indexer.
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// Computes the index of the bucket holding `value`.
    ///
    /// `value` must be finite and strictly positive: zero and negative values are tracked
    /// separately by the caller.
    pub fn compute_index(&self, value: f64) -> i32 {
        debug_assert!(value > 0.0 && value.is_finite(), "value must be finite and positive");

        let (exponent, significand) = decompose(value);
        if self.scale <= 0 {
            // Exact powers of two belong to the bucket below.
            let index = if significand == 0 { exponent - 1 } else { exponent };
            return index >> -self.scale;
        }

        if significand == 0 {
            return (exponent << self.scale) - 1;
        }

        let normalized = f64::from_bits(((EXPONENT_BIAS as u64) << SIGNIFICAND_WIDTH) | significand);
        let sub_index = match &self.boundaries {
            Some(boundaries) => self.sub_index_by_lookup(boundaries, normalized),
            None => self.sub_index_by_logarithm(normalized),
        };

        (exponent << self.scale) + sub_index
    }

    /// Gets the lower boundary of bucket `index`, `base^index`.
    ///
    /// Values equal to the boundary belong to bucket `index - 1`.
    pub fn lower_boundary(&self, index: i32) -> f64 {
        if self.scale <= 0 {
            let exponent = i64::from(index) << -self.scale;
            return exp2i(exponent.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32);
        }

        let exponent = index >> self.scale;
        let sub_index = i64::from(index & ((1 << self.scale) - 1));
        exp2i(exponent) * significand_boundary(sub_index, self.scale)
    }

    // Boundary 0 is 1.0, which is strictly below any normalized significand that got this far.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn sub_index_by_lookup(&self, boundaries: &[f64], normalized: f64) -> i32 {
        boundaries.partition_point(|boundary| *boundary < normalized) as i32 - 1
    }

    #[allow(clippy::cast_possible_truncation)]
    fn sub_index_by_logarithm(&self, normalized: f64) -> i32 {
        let len = 1i64 << self.scale;
        let mut sub_index = ((normalized.ln() * self.scale_factor).floor() as i64).clamp(0, len - 1);

        // The logarithm can land one bucket off near a boundary: check against the boundaries
        // themselves and nudge.
        if normalized <= significand_boundary(sub_index, self.scale) {
            sub_index -= 1;
        } else if sub_index + 1 < len
            && normalized > significand_boundary(sub_index + 1, self.scale)
        {
            sub_index += 1;
        }

        sub_index as i32
    }
}
