// src/api/auth.rs

use crate::api::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::{Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// Rejects requests without the configured API key.
///
/// The key is looked up on every request, so a config update or a changed
/// environment takes effect immediately. Without a key, every request passes.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || request.uri().path() == "/" {
        return next.run(request).await;
    }
    let Some(expected) = state.config.api_key() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(presented_key);

    if presented == Some(expected.as_str()) {
        next.run(request).await
    } else {
        log::warn!(
            "Rejected {} {}: missing or invalid API key.",
            request.method(),
            request.uri().path()
        );
        ApiError::Unauthorized.into_response()
    }
}

/// Accepts both `Bearer <key>` and the bare key.
fn presented_key(value: &str) -> &str {
    let value = value.trim();
    match value.split_once(' ') {
        Some((scheme, key)) if scheme.eq_ignore_ascii_case("bearer") => key.trim(),
        _ => value,
    }
}
