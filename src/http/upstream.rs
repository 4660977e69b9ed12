//! Client for the upstream completion service.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::{GatekeeperError, Result};

/// Failures of the upstream service.
///
/// These map to `5xx` responses and are never reported as rate limiting.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The request exceeded the configured timeout
    #[error("upstream request timed out")]
    Timeout,

    /// The service could not be reached
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// The service answered with a non-success status
    #[error("upstream returned status {0}")]
    BadStatus(u16),

    /// The response body was not valid JSON
    #[error("upstream returned an invalid body: {0}")]
    InvalidBody(String),
}

impl UpstreamError {
    /// The status code reported to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UpstreamError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// The protected operation behind the admission layer.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send a completion request and return the service's JSON reply.
    async fn complete(&self, payload: Value) -> std::result::Result<Value, UpstreamError>;
}

/// Forwards JSON payloads to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    url: String,
}

impl HttpUpstream {
    /// Create a client for `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatekeeperError::Http(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// The endpoint requests are sent to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn complete(&self, payload: Value) -> std::result::Result<Value, UpstreamError> {
        debug!(url = %self.url, "Forwarding request upstream");

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::BadStatus(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::InvalidBody(e.to_string()))
    }
}
