// src/api/handlers/exec.rs

use crate::api::error::{ApiError, EXECUTION_ID_HEADER, EXIT_CODE_HEADER};
use crate::api::handlers::parse_body;
use crate::models::{ExecuteRequest, RunningExecution};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

#[derive(Deserialize, Debug, Default)]
pub struct ExecQuery {
    #[serde(default)]
    incognito: bool,
}

/// `POST /api/actions/exec/scripts/:id?incognito=`: runs the script and answers with
/// its raw output once the run is recorded, whatever the exit code.
pub async fn execute_script(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<ExecQuery>, QueryRejection>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let request: ExecuteRequest = parse_body(&body)?;

    let record = state.engine.execute(&id, request, query.incognito).await?;
    let exit_code = record
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_default();

    Ok((
        StatusCode::OK,
        [
            ("content-type", "text/plain; charset=utf-8".to_string()),
            (EXECUTION_ID_HEADER, record.id),
            (EXIT_CODE_HEADER, exit_code),
        ],
        record.output,
    )
        .into_response())
}

/// `GET /api/executions/running`
pub async fn list_running(State(state): State<AppState>) -> Json<Vec<RunningExecution>> {
    Json(state.engine.running())
}

/// `POST /api/actions/cancel/executions/:execution_id`: the execution's own request
/// then fails with `cancelled`.
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.cancel(&execution_id)?;
    Ok(StatusCode::ACCEPTED)
}
