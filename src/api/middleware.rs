//! Authentication and request-metrics middleware.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::auth::{AuthError, TokenValidator};
use crate::observability::Metrics;

/// Authenticates the bearer token and stores the resulting `CallerIdentity` in the
/// request extensions, where the MCP handler picks it up.
pub async fn auth_middleware(
    State(validator): State<Arc<TokenValidator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let header = match request.headers().get(header::AUTHORIZATION) {
        Some(value) => match value.to_str() {
            Ok(value) => Some(value.to_string()),
            Err(_) => return unauthorized(AuthError::MalformedHeader),
        },
        None => None,
    };

    match validator.authenticate(header.as_deref()).await {
        Ok(identity) => {
            tracing::debug!(caller = %identity.subject, "authenticated HTTP request");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(error) => unauthorized(error),
    }
}

fn unauthorized(error: AuthError) -> Response {
    tracing::warn!(error = %error, "rejected HTTP request");
    (StatusCode::UNAUTHORIZED, error.to_string()).into_response()
}

/// Counts every request by method, route and status. Unrouted paths share one label.
pub async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics.record_http(&method, &path, response.status().as_u16());
    response
}
