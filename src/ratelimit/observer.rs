//! Instrumentation hooks for admission decisions.
//!
//! Limiters are silent by default. Callers that want visibility install an
//! [`AdmissionObserver`] when building a limiter; it is invoked once per
//! [`RateLimiter::is_allowed`](super::RateLimiter::is_allowed) call, after the
//! decision has been committed.

use tracing::debug;

use super::window::Decision;

/// A single committed admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionEvent<'a> {
    /// Name of the limiter that made the decision.
    pub limiter: &'a str,
    /// Caller key the decision applies to.
    pub key: &'a str,
    /// What the window store decided.
    pub decision: Decision,
    /// The limiter's per-window ceiling.
    pub max_requests: u64,
}

/// Receives admission decisions.
///
/// Called on the request path while no store locks are held. Implementations
/// should return quickly.
pub trait AdmissionObserver: Send + Sync {
    /// Called after every admission decision.
    fn on_decision(&self, event: &AdmissionEvent<'_>);
}

/// Observer that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl AdmissionObserver for NoopObserver {
    fn on_decision(&self, _event: &AdmissionEvent<'_>) {}
}

/// Observer that records decisions as `tracing` events at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl AdmissionObserver for TracingObserver {
    fn on_decision(&self, event: &AdmissionEvent<'_>) {
        match event.decision {
            Decision::Allowed {
                count,
                new_window: true,
                ..
            } => debug!(
                limiter = %event.limiter,
                key = %event.key,
                count,
                max = event.max_requests,
                "Window opened"
            ),
            Decision::Allowed { count, .. } => debug!(
                limiter = %event.limiter,
                key = %event.key,
                count,
                max = event.max_requests,
                "Request counted"
            ),
            Decision::Rejected { count, reset_at } => debug!(
                limiter = %event.limiter,
                key = %event.key,
                count,
                max = event.max_requests,
                reset_at,
                "Rate limit exceeded"
            ),
        }
    }
}
