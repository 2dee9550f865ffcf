// src/api/handlers/history.rs

use crate::api::error::ApiError;
use crate::api::handlers::paging;
use crate::constants::{DEFAULT_PAGE_LIMIT, DEFAULT_RECENT_LIMIT};
use crate::core::history::StoreError;
use crate::models::{ExecutionRecord, HistoryQuery, RecentScript, Script};
use crate::state::AppState;
use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;

#[derive(Deserialize, Debug, Default)]
pub struct RecentQuery {
    limit: Option<usize>,
}

/// `GET /api/history/scripts/recent`: distinct recently run scripts, newest first.
///
/// Scripts that left the catalog are still listed, rebuilt from the display fields
/// stored with their last execution and flagged as unavailable.
pub async fn recent_scripts(
    State(state): State<AppState>,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<Json<Vec<RecentScript>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_RECENT_LIMIT);

    let recent = state
        .history
        .latest_per_script(limit)
        .into_iter()
        .map(|last| {
            let (script, available) = match state.catalog.get(&last.script_id) {
                Some(script) => ((*script).clone(), true),
                None => (script_from_record(&last), false),
            };
            RecentScript {
                script,
                last_executed: last.started_at,
                last_execution_id: last.id,
                last_status: last.status,
                last_exit_code: last.exit_code,
                available,
            }
        })
        .collect();
    Ok(Json(recent))
}

fn script_from_record(record: &ExecutionRecord) -> Script {
    Script {
        id: record.script_id.clone(),
        name: record.script_name.clone(),
        description: String::new(),
        author: String::new(),
        version: None,
        category: None,
        tags: BTreeSet::new(),
        inputs: Vec::new(),
        path: record.script_path.clone(),
        content: None,
        fingerprint: String::new(),
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct ScriptHistoryQuery {
    limit: Option<usize>,
    page: Option<usize>,
    before: Option<DateTime<Utc>>,
}

/// `GET /api/history/scripts/:script_id`: works for scripts no longer in the catalog.
pub async fn script_history(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
    query: Result<Query<ScriptHistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (offset, limit) = paging(query.page, query.limit, DEFAULT_PAGE_LIMIT);
    let records = state.history.for_script(
        &script_id,
        &HistoryQuery {
            limit,
            offset,
            before: query.before,
        },
    );
    Ok(Json(records))
}

/// `GET /api/history/:execution_id`
pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    state
        .history
        .get(&execution_id)
        .map(Json)
        .ok_or_else(|| StoreError::NotFound { id: execution_id }.into())
}

/// `DELETE /api/history/:execution_id`
pub async fn delete_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.history.delete(&execution_id)?;
    log::info!("Execution '{}' deleted from history.", execution_id);
    Ok(StatusCode::NO_CONTENT)
}
