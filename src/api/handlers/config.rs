// src/api/handlers/config.rs

use crate::api::error::ApiError;
use crate::api::handlers::parse_body;
use crate::models::AppConfig;
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;

/// `GET /api/config`
pub async fn get_config(State(state): State<AppState>) -> Json<AppConfig> {
    Json(state.config.get())
}

/// `POST /api/config`: replaces the whole configuration.
///
/// The catalog is not rescanned; clients trigger that with the load action.
pub async fn update_config(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AppConfig>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BadRequest(
            "A complete configuration document is required.".to_string(),
        ));
    }
    let next: AppConfig = parse_body(&body)?;
    Ok(Json(state.config.update(next)?))
}
