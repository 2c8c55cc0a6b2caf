//! Capture timestamps.
//!
//! A thin wrapper over `std::time` rather than a full calendar library,
//! since the only consumers are duration arithmetic (cache timeouts) and
//! millisecond conversion for the IPFIX template bootstrap fields.

use std::time::{Duration, SystemTime};

/// A capture timestamp, `(seconds, microseconds)` since the Unix epoch.
///
/// This is the wire-level granularity used throughout the cache and
/// plugin runtime; all timeout comparisons are performed on this type
/// rather than on `Instant::now()`, since the model is driven by
/// packet-supplied capture time, not wall-clock time at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct Timestamp {
    pub secs: u32,
    pub micros: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { secs: 0, micros: 0 };

    pub fn new(secs: u32, micros: u32) -> Self {
        Self { secs, micros }
    }

    /// Milliseconds since the Unix epoch, used for the IPFIX template
    /// bootstrap fields `first_time`/`last_time` (both u64 ms).
    pub fn as_millis_since_epoch(&self) -> u64 {
        u64::from(self.secs) * 1000 + u64::from(self.micros) / 1000
    }

    /// Whole seconds elapsed between `self` and an earlier timestamp `since`.
    ///
    /// Saturates at zero if `self` is earlier than `since` (clock
    /// skew / out-of-order delivery should never panic the cache).
    pub fn secs_since(&self, since: Timestamp) -> u32 {
        self.secs.saturating_sub(since.secs)
    }

    pub fn to_system_time(self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.secs.into()) + Duration::from_micros(self.micros.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_conversion() {
        let ts = Timestamp::new(1, 500_000);
        assert_eq!(ts.as_millis_since_epoch(), 1_500);
    }

    #[test]
    fn secs_since_saturates() {
        let earlier = Timestamp::new(100, 0);
        let later = Timestamp::new(50, 0);
        assert_eq!(earlier.secs_since(later), 50);
        assert_eq!(later.secs_since(earlier), 0);
    }
}
