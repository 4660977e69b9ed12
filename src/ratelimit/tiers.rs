//! Tiered admission across several independent limiters.
//!
//! A request is admitted only if every tier admits it. Tiers are checked in
//! ascending window order so short burst limits fail fast before longer
//! sustained quotas are touched.
//!
//! Quota accounting: each tier that admits commits its increment at once.
//! When a later tier rejects, the earlier tiers keep the increment even though
//! the request never proceeds. Tiers after the rejecting one are not checked.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::backend::{Admission, AdmissionControl};
use super::clock::Clock;
use super::limiter::{LimitConfig, RateLimiter, TierStatus};
use super::observer::AdmissionObserver;
use super::sweeper::Sweeper;
use super::window::window_millis;
use crate::config::TierConfig;
use crate::error::{GatekeeperError, Result};

/// Message returned to clients when a tier has no message of its own.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// One tier: a limiter plus the message shown when it rejects.
#[derive(Debug, Clone)]
pub struct Tier {
    limiter: RateLimiter,
    message: String,
}

impl Tier {
    /// Create a tier with the default rejection message.
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            limiter,
            message: DEFAULT_REJECTION_MESSAGE.to_string(),
        }
    }

    /// Set the message returned when this tier rejects.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// The tier's limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The tier's rejection message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An ordered set of tiers that must all admit a request.
#[derive(Debug, Clone)]
pub struct TieredLimiter {
    tiers: Vec<Tier>,
}

impl TieredLimiter {
    /// Build from explicit tiers.
    ///
    /// Tiers are reordered by ascending window; ties keep the given order.
    /// Fails when `tiers` is empty or two tiers share a name.
    pub fn new(mut tiers: Vec<Tier>) -> Result<Self> {
        check_tier_names(tiers.iter().map(|t| t.limiter.name()))?;
        tiers.sort_by_key(|t| t.limiter.window());

        Ok(Self { tiers })
    }

    /// Build tiers from configuration, sharing one clock and observer.
    pub fn from_config(
        configs: &[TierConfig],
        clock: Arc<dyn Clock>,
        observer: Arc<dyn AdmissionObserver>,
    ) -> Result<Self> {
        let tiers = configs
            .iter()
            .map(|config| {
                let limiter = RateLimiter::builder(config.name.clone(), config.limit_config()?)
                    .clock(Arc::clone(&clock))
                    .observer(Arc::clone(&observer))
                    .build()?;
                let tier = Tier::new(limiter);
                Ok(match &config.message {
                    Some(message) => tier.with_message(message.clone()),
                    None => tier,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let limiter = Self::new(tiers)?;
        for tier in &limiter.tiers {
            info!(
                tier = %tier.limiter.name(),
                max_requests = tier.limiter.max_requests(),
                window_ms = window_millis(tier.limiter.window()),
                "Configured rate limit tier"
            );
        }
        Ok(limiter)
    }

    /// Run tiered admission for `key`.
    ///
    /// Reported statuses are the snapshots taken with each tier's decision,
    /// not a later re-read of the store.
    pub fn check(&self, key: &str) -> Admission {
        let mut admitted = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            let (decision, status) = tier.limiter.check_with_status(key);
            if !decision.is_allowed() {
                return Admission::Rejected {
                    status,
                    message: tier.message.clone(),
                };
            }
            admitted.push(status);
        }

        Admission::Admitted {
            status: admitted.into_iter().min_by_key(|status| status.remaining),
        }
    }

    /// Quota snapshots for every tier, in evaluation order.
    pub fn statuses(&self, key: &str) -> Vec<TierStatus> {
        self.tiers.iter().map(|t| t.limiter.status(key)).collect()
    }

    /// The tier with the least remaining quota for `key`.
    ///
    /// Ties go to the tier evaluated first.
    pub fn most_constrained(&self, key: &str) -> Option<TierStatus> {
        self.tiers
            .iter()
            .map(|t| t.limiter.status(key))
            .min_by_key(|status| status.remaining)
    }

    /// Look up a tier by name.
    pub fn tier(&self, name: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.limiter.name() == name)
    }

    /// The tiers in evaluation order.
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Remove expired windows from every tier.
    pub fn sweep_expired(&self) -> usize {
        self.tiers.iter().map(|t| t.limiter.sweep_expired()).sum()
    }

    /// Start a background task sweeping every tier each `interval`.
    pub fn spawn_sweeper(&self, interval: Duration) -> Result<Sweeper> {
        Sweeper::spawn(
            self.tiers.iter().map(|t| t.limiter.clone()).collect(),
            interval,
        )
    }
}

impl AdmissionControl for TieredLimiter {
    fn admit(&self, key: &str) -> Admission {
        self.check(key)
    }
}

/// Reject an empty tier list or duplicate tier names.
pub(crate) fn check_tier_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(GatekeeperError::invalid_tier(name, "duplicate tier name"));
        }
    }
    if seen.is_empty() {
        return Err(GatekeeperError::Config(
            "at least one rate limit tier is required".to_string(),
        ));
    }
    Ok(())
}

/// The default tiers: a short burst guard and a per-minute completion quota.
pub fn default_tier_configs() -> Vec<TierConfig> {
    vec![
        TierConfig {
            name: "burst".to_string(),
            max_requests: 3,
            window_secs: Some(10),
            window_ms: None,
            message: Some("Too many requests too quickly. Please slow down.".to_string()),
        },
        TierConfig {
            name: "completion".to_string(),
            max_requests: 10,
            window_secs: Some(60),
            window_ms: None,
            message: Some(
                "Completion rate limit exceeded. Please try again later.".to_string(),
            ),
        },
    ]
}

/// Build a tier directly from a limit, for callers that skip configuration.
pub fn tier(name: &str, max_requests: u64, window: Duration) -> Result<Tier> {
    Ok(Tier::new(RateLimiter::new(
        name,
        LimitConfig::new(max_requests, window),
    )?))
}
