//! Admission trait shared by single limiters and tier sets.

use super::limiter::{RateLimiter, TierStatus};
use super::tiers::DEFAULT_REJECTION_MESSAGE;

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Every tier admitted the request.
    Admitted {
        /// Quota of the most constrained tier after counting this request.
        status: Option<TierStatus>,
    },
    /// A tier rejected the request.
    Rejected {
        /// Quota of the tier that rejected.
        status: TierStatus,
        /// Client-facing explanation from that tier.
        message: String,
    },
}

impl Admission {
    /// Returns `true` if the request may proceed.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }

    /// The quota snapshot carried by this outcome.
    pub fn status(&self) -> Option<&TierStatus> {
        match self {
            Admission::Admitted { status } => status.as_ref(),
            Admission::Rejected { status, .. } => Some(status),
        }
    }
}

/// Trait for admission control implementations.
///
/// This lets the HTTP boundary work with either a single limiter or a full
/// tier set.
pub trait AdmissionControl: Send + Sync {
    /// Decide whether `key` may proceed, consuming quota where admitted.
    fn admit(&self, key: &str) -> Admission;
}

impl AdmissionControl for RateLimiter {
    fn admit(&self, key: &str) -> Admission {
        let (decision, status) = self.check_with_status(key);
        if decision.is_allowed() {
            Admission::Admitted {
                status: Some(status),
            }
        } else {
            Admission::Rejected {
                status,
                message: DEFAULT_REJECTION_MESSAGE.to_string(),
            }
        }
    }
}
