//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use super::clock::{Clock, SystemClock};
use super::observer::{AdmissionEvent, AdmissionObserver, NoopObserver};
use super::window::{window_millis, Decision, WindowStore};
use crate::error::{GatekeeperError, Result};

/// Configuration for a rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    /// Maximum requests allowed in the time window
    pub max_requests: u64,
    /// Length of the time window
    pub window: Duration,
}

impl LimitConfig {
    /// Create a new limit configuration.
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Check that the limit can be enforced.
    ///
    /// `name` identifies the limiter in the returned error.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.max_requests == 0 {
            return Err(GatekeeperError::invalid_tier(
                name,
                "max_requests must be positive",
            ));
        }
        if window_millis(self.window) == 0 {
            return Err(GatekeeperError::invalid_tier(
                name,
                "window must be at least one millisecond",
            ));
        }
        Ok(())
    }
}

/// A snapshot of one limiter's quota for a key.
///
/// This carries everything needed for rate-limit response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierStatus {
    /// Name of the limiter
    pub name: String,
    /// Per-window ceiling
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Epoch milliseconds at which the window resets
    pub reset_at: u64,
    /// Length of the window
    pub window: Duration,
    /// Time from the snapshot until the reset, zero if already due
    pub retry_after: Duration,
}

/// A named fixed-window rate limiter.
///
/// Each limiter owns its own [`WindowStore`]. Cloning is cheap and clones
/// share state, so a clone can be handed to a background sweeper.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    config: LimitConfig,
    store: WindowStore,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn AdmissionObserver>,
}

impl RateLimiter {
    /// Create a limiter on the system clock with no observer.
    pub fn new(name: impl Into<String>, config: LimitConfig) -> Result<Self> {
        Self::builder(name, config).build()
    }

    /// Start building a limiter with a custom clock or observer.
    pub fn builder(name: impl Into<String>, config: LimitConfig) -> RateLimiterBuilder {
        RateLimiterBuilder {
            name: name.into(),
            config,
            clock: Arc::new(SystemClock),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Decide whether `key` may make a request now, counting it if so.
    ///
    /// This is the only operation that consumes quota.
    pub fn is_allowed(&self, key: &str) -> bool {
        self.check(key).is_allowed()
    }

    /// Like [`RateLimiter::is_allowed`], but returns the full decision.
    pub fn check(&self, key: &str) -> Decision {
        self.record(key).0
    }

    /// Count a request and snapshot the quota it left behind.
    ///
    /// The snapshot is taken from the same clock sample and window as the
    /// decision, so a rejection always reports zero remaining and the reset
    /// time of the window that rejected.
    pub fn check_with_status(&self, key: &str) -> (Decision, TierStatus) {
        let (decision, now) = self.record(key);
        let inner = &*self.inner;
        let remaining = match decision {
            Decision::Allowed { count, .. } => inner.config.max_requests.saturating_sub(count),
            Decision::Rejected { .. } => 0,
        };

        let status = self.snapshot(now, remaining, decision.reset_at());
        (decision, status)
    }

    fn record(&self, key: &str) -> (Decision, u64) {
        let inner = &*self.inner;
        let now = inner.clock.now_millis();
        let decision = inner.store.record_and_check(
            key,
            now,
            inner.config.max_requests,
            inner.config.window,
        );

        trace!(
            limiter = %inner.name,
            key = %key,
            allowed = decision.is_allowed(),
            "Checked rate limit"
        );

        inner.observer.on_decision(&AdmissionEvent {
            limiter: &inner.name,
            key,
            decision,
            max_requests: inner.config.max_requests,
        });

        (decision, now)
    }

    /// Requests `key` may still make in its current window.
    pub fn remaining_requests(&self, key: &str) -> u64 {
        let now = self.inner.clock.now_millis();
        self.inner
            .store
            .remaining_for(key, now, self.inner.config.max_requests)
    }

    /// Epoch milliseconds at which `key`'s window resets.
    pub fn reset_time(&self, key: &str) -> u64 {
        let now = self.inner.clock.now_millis();
        self.inner
            .store
            .reset_time_for(key, now, self.inner.config.window)
    }

    /// Quota snapshot for `key` without consuming anything.
    pub fn status(&self, key: &str) -> TierStatus {
        let inner = &*self.inner;
        let now = inner.clock.now_millis();
        let remaining = inner
            .store
            .remaining_for(key, now, inner.config.max_requests);
        let reset_at = inner.store.reset_time_for(key, now, inner.config.window);

        self.snapshot(now, remaining, reset_at)
    }

    fn snapshot(&self, now: u64, remaining: u64, reset_at: u64) -> TierStatus {
        TierStatus {
            name: self.inner.name.clone(),
            limit: self.inner.config.max_requests,
            remaining,
            reset_at,
            window: self.inner.config.window,
            retry_after: Duration::from_millis(reset_at.saturating_sub(now)),
        }
    }

    /// Remove expired windows. Returns the number of keys dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = self.inner.clock.now_millis();
        self.inner.store.sweep_expired(now)
    }

    /// The limiter's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The limiter's per-window ceiling.
    pub fn max_requests(&self) -> u64 {
        self.inner.config.max_requests
    }

    /// The limiter's window length.
    pub fn window(&self) -> Duration {
        self.inner.config.window
    }

    /// The limiter's configuration.
    pub fn config(&self) -> LimitConfig {
        self.inner.config
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.inner.store.len()
    }

    /// Forget all windows.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.inner.store.clear();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("tracked_keys", &self.inner.store.len())
            .finish()
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    name: String,
    config: LimitConfig,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn AdmissionObserver>,
}

impl RateLimiterBuilder {
    /// Use a custom time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Install an observer for admission decisions.
    pub fn observer(mut self, observer: Arc<dyn AdmissionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validate the configuration and build the limiter.
    pub fn build(self) -> Result<RateLimiter> {
        self.config.validate(&self.name)?;

        Ok(RateLimiter {
            inner: Arc::new(Inner {
                name: self.name,
                config: self.config,
                store: WindowStore::new(),
                clock: self.clock,
                observer: self.observer,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::{ManualClock, ScriptedClock};
    use parking_lot::Mutex;

    const MINUTE: Duration = Duration::from_secs(60);

    fn limiter_at(max_requests: u64, window: Duration, clock: &ManualClock) -> RateLimiter {
        RateLimiter::builder("test", LimitConfig::new(max_requests, window))
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap()
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<(String, String, Decision)>>,
    }

    impl AdmissionObserver for RecordingObserver {
        fn on_decision(&self, event: &AdmissionEvent<'_>) {
            self.events.lock().push((
                event.limiter.to_string(),
                event.key.to_string(),
                event.decision,
            ));
        }
    }

    #[test]
    fn test_zero_max_requests_rejected() {
        let err = RateLimiter::new("burst", LimitConfig::new(0, MINUTE)).unwrap_err();
        assert!(matches!(err, GatekeeperError::InvalidTier { ref tier, .. } if tier == "burst"));
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = RateLimiter::new("burst", LimitConfig::new(1, Duration::ZERO)).unwrap_err();
        assert!(matches!(err, GatekeeperError::InvalidTier { .. }));

        let err =
            RateLimiter::new("burst", LimitConfig::new(1, Duration::from_micros(500))).unwrap_err();
        assert!(matches!(err, GatekeeperError::InvalidTier { .. }));
    }

    #[test]
    fn test_first_n_allowed_then_rejected() {
        let clock = ManualClock::new(0);
        let limiter = limiter_at(5, MINUTE, &clock);

        for i in 1..=5 {
            assert!(limiter.is_allowed("client"), "Request {} should be allowed", i);
        }
        assert!(!limiter.is_allowed("client"));
        assert_eq!(limiter.remaining_requests("client"), 0);
    }

    #[test]
    fn test_minute_window_example() {
        let clock = ManualClock::new(0);
        let limiter = limiter_at(10, Duration::from_millis(60_000), &clock);

        for _ in 0..10 {
            assert!(limiter.is_allowed("203.0.113.7"));
        }

        clock.set_millis(500);
        assert!(!limiter.is_allowed("203.0.113.7"));

        clock.set_millis(60_001);
        assert!(limiter.is_allowed("203.0.113.7"));
        assert_eq!(limiter.remaining_requests("203.0.113.7"), 9);
    }

    #[test]
    fn test_rollover_restarts_count_at_one() {
        let clock = ManualClock::new(0);
        let limiter = limiter_at(3, MINUTE, &clock);
        for _ in 0..4 {
            limiter.is_allowed("k");
        }

        clock.advance(MINUTE);

        assert_eq!(
            limiter.check("k"),
            Decision::Allowed {
                count: 1,
                new_window: true,
                reset_at: 120_000
            }
        );
        assert_eq!(limiter.remaining_requests("k"), 2);
    }

    #[test]
    fn test_remaining_only_moves_with_admissions_and_rollover() {
        let clock = ManualClock::new(0);
        let limiter = limiter_at(3, MINUTE, &clock);
        let mut last = limiter.remaining_requests("k");
        assert_eq!(last, 3);

        for step in 0..5 {
            let before = limiter.remaining_requests("k");
            let allowed = limiter.is_allowed("k");
            let after = limiter.remaining_requests("k");
            if allowed {
                assert_eq!(after, before - 1, "step {}", step);
            } else {
                assert_eq!(after, before, "step {}", step);
            }
            assert!(after <= last);
            last = after;
        }

        clock.advance(MINUTE);
        assert_eq!(limiter.remaining_requests("k"), 3);
    }

    #[test]
    fn test_reset_time_for_unseen_key_is_stable() {
        let clock = ManualClock::new(1_000);
        let limiter = limiter_at(3, MINUTE, &clock);

        assert_eq!(limiter.reset_time("new"), 61_000);
        assert_eq!(limiter.reset_time("new"), 61_000);
        assert_eq!(limiter.remaining_requests("new"), 3);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_reset_time_fixed_within_window() {
        let clock = ManualClock::new(0);
        let limiter = limiter_at(3, MINUTE, &clock);
        limiter.is_allowed("k");

        clock.advance(Duration::from_secs(20));
        limiter.is_allowed("k");

        assert_eq!(limiter.reset_time("k"), 60_000);
    }

    #[test]
    fn test_status_reports_quota() {
        let clock = ManualClock::new(0);
        let limiter = limiter_at(3, MINUTE, &clock);
        limiter.is_allowed("k");
        clock.advance(Duration::from_secs(15));

        let status = limiter.status("k");

        assert_eq!(
            status,
            TierStatus {
                name: "test".to_string(),
                limit: 3,
                remaining: 2,
                reset_at: 60_000,
                window: MINUTE,
                retry_after: Duration::from_secs(45),
            }
        );
    }

    #[test]
    fn test_status_retry_after_saturates() {
        let clock = ManualClock::new(0);
        let limiter = limiter_at(1, MINUTE, &clock);
        limiter.is_allowed("k");
        clock.advance(Duration::from_secs(120));

        assert_eq!(limiter.status("k").retry_after, Duration::ZERO);
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = ManualClock::new(0);
        let limiter = limiter_at(1, MINUTE, &clock);

        assert!(limiter.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));
        assert!(limiter.is_allowed("b"));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_sweep_expired_uses_clock() {
        let clock = ManualClock::new(0);
        let limiter = limiter_at(1, MINUTE, &clock);
        limiter.is_allowed("a");
        clock.advance(Duration::from_secs(30));
        limiter.is_allowed("b");

        clock.advance(Duration::from_secs(30));
        assert_eq!(limiter.sweep_expired(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
        assert_eq!(limiter.reset_time("a"), 120_000);
    }

    #[test]
    fn test_clones_share_state() {
        let clock = ManualClock::new(0);
        let limiter = limiter_at(1, MINUTE, &clock);
        let clone = limiter.clone();

        assert!(limiter.is_allowed("k"));
        assert!(!clone.is_allowed("k"));
    }

    #[test]
    fn test_observer_sees_every_decision() {
        let clock = ManualClock::new(0);
        let observer = Arc::new(RecordingObserver::default());
        let limiter = RateLimiter::builder("burst", LimitConfig::new(1, MINUTE))
            .clock(Arc::new(clock.clone()))
            .observer(observer.clone())
            .build()
            .unwrap();

        limiter.is_allowed("k");
        limiter.is_allowed("k");
        limiter.remaining_requests("k");
        limiter.reset_time("k");

        let events = observer.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            (
                "burst".to_string(),
                "k".to_string(),
                Decision::Allowed {
                    count: 1,
                    new_window: true,
                    reset_at: 60_000
                }
            )
        );
        assert_eq!(
            events[1].2,
            Decision::Rejected {
                count: 1,
                reset_at: 60_000
            }
        );
    }

    #[test]
    fn test_rejection_snapshot_matches_rejecting_window() {
        // The window is one read from rolling over when the second request
        // arrives; later reads are already past the reset.
        let clock = ScriptedClock::new(&[0, 9, 10]);
        let limiter = RateLimiter::builder("burst", LimitConfig::new(1, Duration::from_millis(10)))
            .clock(Arc::new(clock))
            .build()
            .unwrap();

        let (first, _) = limiter.check_with_status("k");
        assert!(first.is_allowed());

        let (decision, status) = limiter.check_with_status("k");
        assert!(!decision.is_allowed());
        assert_eq!(status.remaining, 0);
        assert_eq!(status.reset_at, 10);
        assert_eq!(status.retry_after, Duration::from_millis(1));
    }

    #[test]
    fn test_admitted_snapshot_reflects_this_request() {
        let clock = ManualClock::new(0);
        let limiter = limiter_at(3, MINUTE, &clock);

        let (_, first) = limiter.check_with_status("k");
        let (_, second) = limiter.check_with_status("k");

        assert_eq!(first.remaining, 2);
        assert_eq!(second.remaining, 1);
        assert_eq!(second.reset_at, 60_000);
        assert_eq!(second.retry_after, MINUTE);
    }

    #[test]
    fn test_concurrent_checks_admit_exactly_limit() {
        let limiter = RateLimiter::new("test", LimitConfig::new(25, Duration::from_secs(3600))).unwrap();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.is_allowed("shared"))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(admitted, 25);
    }
}
