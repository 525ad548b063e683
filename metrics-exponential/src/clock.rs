use std::time::{SystemTime, UNIX_EPOCH};

use quanta::{Clock, Instant};

/// A source of Unix epoch timestamps, in nanoseconds.
///
/// Wraps a [`quanta::Clock`] anchored to the wall clock once, at creation: later readings advance
/// with the monotonic clock, so timestamps never go backwards when the system time is adjusted.
/// Mocked clocks (see [`quanta::Clock::mock`]) make timestamps fully controllable in tests.
#[derive(Clone, Debug)]
pub struct TimeSource {
    clock: Clock,
    anchor: Instant,
    anchor_epoch_nanos: u64,
}

impl TimeSource {
    /// Creates a time source anchored to the current system time.
    pub fn new() -> Self {
        let epoch_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        Self::with_epoch(Clock::new(), epoch_nanos)
    }

    /// Creates a time source where the current reading of `clock` corresponds to `epoch_nanos`.
    pub fn with_epoch(clock: Clock, epoch_nanos: u64) -> Self {
        let anchor = clock.now();
        Self { clock, anchor, anchor_epoch_nanos: epoch_nanos }
    }

    /// Gets the current time, in nanoseconds since the Unix epoch.
    pub fn now_epoch_nanos(&self) -> u64 {
        let elapsed = self.clock.now().duration_since(self.anchor);
        self.anchor_epoch_nanos.saturating_add(elapsed.as_nanos() as u64)
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        TimeSource::new()
    }
}

#[cfg(test)]
mod tests {
    use super::TimeSource;
    use quanta::Clock;
    use std::time::Duration;

    #[test]
    fn test_mocked_time_source() {
        let (clock, mock) = Clock::mock();
        let time = TimeSource::with_epoch(clock, 1_000);
        assert_eq!(time.now_epoch_nanos(), 1_000);

        mock.increment(Duration::from_millis(3));
        assert_eq!(time.now_epoch_nanos(), 3_001_000);
    }

    #[test]
    fn test_system_time_source_is_monotonic() {
        let time = TimeSource::new();
        let first = time.now_epoch_nanos();
        let second = time.now_epoch_nanos();
        assert!(first > 0);
        assert!(second >= first);
    }
}
