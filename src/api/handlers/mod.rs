// src/api/handlers/mod.rs

pub mod config;
pub mod exec;
pub mod history;
pub mod scripts;

use crate::api::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

/// `GET /`: liveness and a few counters. Not behind authentication.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "scripts": state.catalog.len(),
        "running": state.engine.running().len(),
    }))
}

/// Parses an optional JSON body; an empty body yields the type's default.
pub(crate) fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}

/// Turns 1-based `page` and `limit` into an offset, with the given default limit.
pub(crate) fn paging(page: Option<usize>, limit: Option<usize>, default_limit: usize) -> (usize, usize) {
    let limit = limit.filter(|l| *l > 0).unwrap_or(default_limit);
    let page = page.filter(|p| *p > 0).unwrap_or(1);
    ((page - 1).saturating_mul(limit), limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecuteRequest;

    #[test]
    fn test_paging_defaults_and_offsets() {
        assert_eq!(paging(None, None, 20), (0, 20));
        assert_eq!(paging(Some(3), Some(5), 20), (10, 5));
        assert_eq!(paging(Some(0), Some(0), 20), (0, 20));
    }

    #[test]
    fn test_parse_body_accepts_empty_and_rejects_garbage() {
        let empty: ExecuteRequest = parse_body(&Bytes::from_static(b" \n")).unwrap();
        assert!(empty.args.is_empty());

        let parsed: ExecuteRequest =
            parse_body(&Bytes::from_static(br#"{"args":["a"],"env":{"K":"v"}}"#)).unwrap();
        assert_eq!(parsed.args, vec!["a".to_string()]);

        assert!(parse_body::<ExecuteRequest>(&Bytes::from_static(b"{oops")).is_err());
    }
}
