//! Route handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use super::upstream::Upstream;

/// Shared state for protected routes.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) upstream: Arc<dyn Upstream>,
}

/// Liveness probe. Not rate limited.
pub(crate) async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Forward an admitted feedback request to the completion service.
pub(crate) async fn ai_feedback(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Response {
    match state.upstream.complete(payload).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            error!(error = %e, "Upstream completion failed");
            (
                e.status_code(),
                Json(json!({ "error": "Failed to get AI feedback" })),
            )
                .into_response()
        }
    }
}
