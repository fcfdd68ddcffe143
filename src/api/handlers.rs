use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

use super::AppState;

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

// ============================================================
// Metrics
// ============================================================

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

// ============================================================
// Discovery
// ============================================================

/// Capability advertisement. Unaffected by tool-name normalization.
pub async fn well_known(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": state.name,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoint": "/mcp",
    }))
}
