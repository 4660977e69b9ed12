//! Time sources for window accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of wall-clock time in milliseconds since the Unix epoch.
///
/// Limiters sample the clock once per operation. Implementations must be
/// cheap and thread-safe.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Clock backed by [`SystemTime::now`].
///
/// The system clock can move backwards. Windows opened before a rollback keep
/// their original reset time, so affected keys may stay throttled for longer
/// than one window.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// A manually driven clock for deterministic tests and simulations.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock starting at `start_millis`.
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(by, Ordering::SeqCst);
    }

    /// Jump to an absolute time. Moving backwards is allowed.
    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Replays a fixed sequence of readings, then repeats the last one.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ScriptedClock {
    readings: parking_lot::Mutex<std::collections::VecDeque<u64>>,
    last: AtomicU64,
}

#[cfg(test)]
impl ScriptedClock {
    pub(crate) fn new(readings: &[u64]) -> Self {
        Self {
            readings: parking_lot::Mutex::new(readings.iter().copied().collect()),
            last: AtomicU64::new(readings.first().copied().unwrap_or(0)),
        }
    }
}

#[cfg(test)]
impl Clock for ScriptedClock {
    fn now_millis(&self) -> u64 {
        match self.readings.lock().pop_front() {
            Some(millis) => {
                self.last.store(millis, Ordering::SeqCst);
                millis
            }
            None => self.last.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_past_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_manual_clock_advance_and_set() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);

        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now_millis(), 1_500);

        clock.set_millis(200);
        assert_eq!(clock.now_millis(), 200);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(0);
        let other = clock.clone();

        clock.advance(Duration::from_secs(2));
        assert_eq!(other.now_millis(), 2_000);
    }

    #[test]
    fn test_scripted_clock_repeats_last_reading() {
        let clock = ScriptedClock::new(&[5, 9]);
        assert_eq!(clock.now_millis(), 5);
        assert_eq!(clock.now_millis(), 9);
        assert_eq!(clock.now_millis(), 9);
    }
}
