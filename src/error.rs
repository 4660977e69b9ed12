//! Error types for the Gatekeeper service.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
///
/// Rate-limit rejections are not errors; they are reported as decisions.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tier definition that cannot be used
    #[error("Invalid tier '{tier}': {reason}")]
    InvalidTier { tier: String, reason: String },

    /// HTTP client or server setup errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatekeeperError {
    pub(crate) fn invalid_tier(tier: impl Into<String>, reason: impl Into<String>) -> Self {
        GatekeeperError::InvalidTier {
            tier: tier.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_tier_display() {
        let err = GatekeeperError::invalid_tier("burst", "max_requests must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid tier 'burst': max_requests must be positive"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let err: GatekeeperError = io.into();
        assert!(matches!(err, GatekeeperError::Io(_)));
        assert!(err.to_string().contains("port taken"));
    }
}
