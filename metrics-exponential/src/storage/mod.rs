//! Counter storage backing exponential histogram buckets.

mod adapting;
pub use self::adapting::{AdaptingIntegerArray, Width};

mod circular;
pub use self::circular::CircularBufferCounter;
