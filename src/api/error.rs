// src/api/error.rs

use crate::core::catalog::{CatalogError, ScanError};
use crate::core::config_manager::ConfigError;
use crate::core::engine::ExecError;
use crate::core::history::StoreError;
use crate::system::editor::EditorError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Header carrying the id of the execution a response belongs to.
pub const EXECUTION_ID_HEADER: &str = "x-execution-id";
/// Header carrying the exit code of a finished execution.
pub const EXIT_CODE_HEADER: &str = "x-exit-code";

/// Every failure a handler can report. Rendered as `{"error": ..., "kind": ...}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Editor(#[from] EditorError),
    #[error("{0}")]
    BadRequest(String),
    #[error("A valid API key is required.")]
    Unauthorized,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// The HTTP status and the stable, kebab-case kind reported to clients.
    pub fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Exec(e) => match e {
                ExecError::ScriptNotFound { .. } => (StatusCode::NOT_FOUND, "script-not-found"),
                ExecError::UnsupportedExtension { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "unsupported-extension")
                }
                ExecError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid-input"),
                ExecError::InvalidCommand(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "invalid-command")
                }
                ExecError::Busy { .. } => (StatusCode::TOO_MANY_REQUESTS, "busy"),
                ExecError::TimedOut { .. } => (StatusCode::GATEWAY_TIMEOUT, "timed-out"),
                ExecError::Cancelled { .. } => (StatusCode::CONFLICT, "cancelled"),
                ExecError::ProcessSpawnFailure { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "process-spawn-failure")
                }
                ExecError::StoreWriteFailure { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "store-write-failure")
                }
                ExecError::NotRunning { .. } => (StatusCode::NOT_FOUND, "not-running"),
                ExecError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "shutting-down"),
                ExecError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
            Self::Config(ConfigError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, "config-validation")
            }
            Self::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config-failure"),
            Self::Catalog(CatalogError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "script-not-found")
            }
            Self::Catalog(CatalogError::Io { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "script-io")
            }
            Self::Scan(ScanError::NoFolders) => (StatusCode::BAD_REQUEST, "no-folders"),
            Self::Store(StoreError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "execution-not-found")
            }
            Self::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store-failure"),
            Self::Editor(_) => (StatusCode::INTERNAL_SERVER_ERROR, "editor-failure"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad-request"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            log::error!("{} ({})", self, kind);
        } else {
            log::debug!("{} ({})", self, kind);
        }

        let mut body = Map::new();
        body.insert("error".to_string(), json!(self.to_string()));
        body.insert("kind".to_string(), json!(kind));

        let mut execution_id = None;
        if let Self::Exec(e) = &self {
            execution_id = e.execution_id().map(str::to_string);
            if let Some(id) = &execution_id {
                body.insert("executionId".to_string(), json!(id));
            }
            if let Some(output) = e.output() {
                body.insert("output".to_string(), json!(output));
            }
        }

        let mut response = (status, Json(Value::Object(body))).into_response();
        if let Some(value) = execution_id.and_then(|id| id.parse().ok()) {
            response.headers_mut().insert(EXECUTION_ID_HEADER, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inputs::InputError;

    #[test]
    fn test_exec_errors_map_to_distinct_statuses() {
        let cases = [
            (
                ApiError::from(ExecError::ScriptNotFound { id: "x".into() }),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(ExecError::UnsupportedExtension {
                    extension: ".rb".into(),
                }),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ApiError::from(ExecError::InvalidInput(InputError::Missing {
                    name: "n".into(),
                })),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(ExecError::Busy {
                    script_id: "x".into(),
                }),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ApiError::from(ExecError::TimedOut {
                    execution_id: "1-x".into(),
                    output: String::new(),
                }),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ApiError::from(ExecError::Cancelled {
                    execution_id: "1-x".into(),
                    output: String::new(),
                }),
                StatusCode::CONFLICT,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.status_and_kind().0, status);
        }
    }

    #[test]
    fn test_response_carries_execution_id() {
        let response = ApiError::from(ExecError::TimedOut {
            execution_id: "00000000000000000001-abc".into(),
            output: "partial".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            response.headers().get(EXECUTION_ID_HEADER).unwrap(),
            "00000000000000000001-abc"
        );
    }

    #[test]
    fn test_config_validation_is_a_client_error() {
        let error = ApiError::from(ConfigError::Validation("dup".into()));
        assert_eq!(
            error.status_and_kind(),
            (StatusCode::BAD_REQUEST, "config-validation")
        );
    }
}
