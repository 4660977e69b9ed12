//! Rate limiting logic and state management.

mod backend;
mod clock;
mod limiter;
mod observer;
mod sweeper;
mod tiers;
mod window;

pub use backend::{Admission, AdmissionControl};
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{LimitConfig, RateLimiter, RateLimiterBuilder, TierStatus};
pub use observer::{AdmissionEvent, AdmissionObserver, NoopObserver, TracingObserver};
pub use sweeper::Sweeper;
pub use tiers::{default_tier_configs, tier, Tier, TieredLimiter, DEFAULT_REJECTION_MESSAGE};
pub(crate) use tiers::check_tier_names;
pub use window::{Decision, WindowState, WindowStore};
