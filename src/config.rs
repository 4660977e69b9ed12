//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{check_tier_names, default_tier_configs, LimitConfig};

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Upstream completion service
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Key callers on `X-Forwarded-For`/`X-Real-IP`. Enable only behind a
    /// proxy that sets these headers.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trust_forwarded_headers: false,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// How often expired windows are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Tiers a request must all pass
    #[serde(default = "default_tier_configs")]
    pub tiers: Vec<TierConfig>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            tiers: default_tier_configs(),
        }
    }
}

impl RateLimitingConfig {
    /// The sweep interval as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_sweep_interval() -> u64 {
    300
}

/// Longest accepted sweep interval (one day).
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 86_400;

/// A single rate limit tier.
///
/// The window is given as exactly one of `window_secs` or `window_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Unique tier name, reported to clients on rejection
    pub name: String,
    /// Requests allowed per window
    pub max_requests: u64,
    /// Window length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
    /// Window length in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    /// Message returned to clients when this tier rejects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TierConfig {
    /// Resolve the window length.
    pub fn window(&self) -> Result<Duration> {
        match (self.window_secs, self.window_ms) {
            (Some(secs), None) => Ok(Duration::from_secs(secs)),
            (None, Some(ms)) => Ok(Duration::from_millis(ms)),
            (Some(_), Some(_)) => Err(GatekeeperError::invalid_tier(
                &self.name,
                "set only one of window_secs and window_ms",
            )),
            (None, None) => Err(GatekeeperError::invalid_tier(
                &self.name,
                "a window (window_secs or window_ms) is required",
            )),
        }
    }

    /// Convert to a validated limit.
    pub fn limit_config(&self) -> Result<LimitConfig> {
        let config = LimitConfig::new(self.max_requests, self.window()?);
        config.validate(&self.name)?;
        Ok(config)
    }
}

/// Upstream completion service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// URL admitted requests are forwarded to
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl UpstreamConfig {
    /// The request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:9000/v1/feedback".to_string()
}

fn default_upstream_timeout() -> u64 {
    30
}

impl GatekeeperConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Check the whole configuration before anything is built from it.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.sweep_interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.rate_limiting.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS {
            return Err(GatekeeperError::Config(format!(
                "sweep_interval_secs must be at most {}",
                MAX_SWEEP_INTERVAL_SECS
            )));
        }
        if self.upstream.url.trim().is_empty() {
            return Err(GatekeeperError::Config(
                "upstream url is required".to_string(),
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(GatekeeperError::Config(
                "upstream timeout_secs must be positive".to_string(),
            ));
        }

        for tier in &self.rate_limiting.tiers {
            tier.limit_config()?;
        }
        check_tier_names(self.rate_limiting.tiers.iter().map(|t| t.name.as_str()))
    }
}
