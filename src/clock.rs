//! Clock Abstraction
//!
//! Every epoch the service emits (exposition timestamps, trapper record
//! clocks, config refresh stamps, instance TTLs) is read through [`Clock`],
//! so tests can pin time with [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock instant in milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    pub fn from_millis(ms: u64) -> Self {
        UnixTimestamp(ms)
    }

    pub fn from_secs(secs: u64) -> Self {
        UnixTimestamp(secs.saturating_mul(1000))
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Whole seconds, truncated
    pub fn as_secs(&self) -> u64 {
        self.0 / 1000
    }

    pub fn saturating_sub(&self, other: UnixTimestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl std::ops::Add<Duration> for UnixTimestamp {
    type Output = UnixTimestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        UnixTimestamp(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

/// Source of the current time
///
/// Implementations:
/// - `SystemClock`: real system time
/// - `ManualClock`: controlled time for tests
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> UnixTimestamp;
}

/// Clock backed by `SystemTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTimestamp {
        // A host clock set before 1970 reads as the epoch itself.
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        UnixTimestamp(ms)
    }
}

/// Clock that only moves when told to
///
/// Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: UnixTimestamp) -> Self {
        ManualClock {
            time_ms: Arc::new(AtomicU64::new(start.0)),
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(UnixTimestamp::from_secs(secs))
    }

    pub fn advance(&self, duration: Duration) {
        self.time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, time: UnixTimestamp) {
        self.time_ms.store(time.0, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixTimestamp {
        UnixTimestamp(self.time_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_past_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now().as_secs() > 1_577_836_800);
    }

    #[test]
    fn test_manual_clock_only_moves_explicitly() {
        let clock = ManualClock::from_secs(100);
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().as_millis(), 100_000);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now().as_millis(), 101_500);
        assert_eq!(clock.now().as_secs(), 101);

        clock.set(UnixTimestamp::from_secs(5));
        assert_eq!(clock.now().as_millis(), 5_000);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::default();
        let other = clock.clone();
        clock.advance(Duration::from_secs(3));
        assert_eq!(other.now().as_secs(), 3);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let ts = UnixTimestamp::from_millis(1000);
        let later = ts + Duration::from_millis(500);
        assert_eq!(later.as_millis(), 1500);
        assert_eq!(later.saturating_sub(ts), Duration::from_millis(500));
        assert_eq!(ts.saturating_sub(later), Duration::ZERO);
    }
}
