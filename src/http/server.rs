//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Router};
use tracing::{error, info};

use super::handlers::{ai_feedback, health, AppState};
use super::middleware::{enforce_admission, AdmissionState};
use super::upstream::Upstream;
use crate::error::{GatekeeperError, Result};
use crate::ratelimit::AdmissionControl;

/// Build the service router.
///
/// `/health` is open; `/api/ai-feedback` sits behind admission control.
pub fn router(admission: AdmissionState, upstream: Arc<dyn Upstream>) -> Router {
    let protected = Router::new()
        .route("/api/ai-feedback", post(ai_feedback))
        .route_layer(middleware::from_fn_with_state(admission, enforce_admission))
        .with_state(AppState { upstream });

    Router::new()
        .route("/health", get(health))
        .merge(protected)
}

/// HTTP server for the admission gateway.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Admission control for protected routes
    admission: Arc<dyn AdmissionControl>,
    /// The protected upstream
    upstream: Arc<dyn Upstream>,
    /// Key callers on forwarding headers
    trust_forwarded_headers: bool,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        addr: SocketAddr,
        admission: Arc<dyn AdmissionControl>,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        Self {
            addr,
            admission,
            upstream,
            trust_forwarded_headers: false,
        }
    }

    /// Key callers on `X-Forwarded-For`/`X-Real-IP` rather than the peer.
    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            GatekeeperError::Io(e)
        })?;

        info!(
            addr = %self.addr,
            trust_forwarded_headers = self.trust_forwarded_headers,
            "Starting HTTP server with graceful shutdown"
        );

        let admission = AdmissionState::new(self.admission)
            .trust_forwarded_headers(self.trust_forwarded_headers);
        let app = router(admission, self.upstream);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            GatekeeperError::Io(e)
        })
    }
}
