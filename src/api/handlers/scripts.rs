// src/api/handlers/scripts.rs

use crate::api::error::ApiError;
use crate::api::handlers::{paging, parse_body};
use crate::constants::DEFAULT_PAGE_LIMIT;
use crate::models::{CategoryCount, ScanReport, Script, ScriptFilter};
use crate::state::AppState;
use crate::system::editor;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug, Default)]
pub struct ListScriptsQuery {
    search: Option<String>,
    category: Option<String>,
    tag: Option<String>,
    limit: Option<usize>,
    page: Option<usize>,
}

/// `GET /api/scripts`: catalog order, summary fields only.
pub async fn list_scripts(
    State(state): State<AppState>,
    query: Result<Query<ListScriptsQuery>, QueryRejection>,
) -> Result<Json<Vec<Script>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let filter = ScriptFilter {
        search: query.search,
        category: query.category,
        tag: query.tag,
    };
    let (offset, limit) = paging(query.page, query.limit, DEFAULT_PAGE_LIMIT);

    let scripts = state
        .catalog
        .list(&filter)
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|s| (*s).clone())
        .collect();
    Ok(Json(scripts))
}

/// `GET /api/scripts/:id`: includes the file content.
pub async fn get_script(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Script>, ApiError> {
    Ok(Json(state.catalog.get_with_content(&id)?))
}

/// `PATCH /api/scripts/:id`: opens the script in the configured editor.
pub async fn open_in_editor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let script = state
        .catalog
        .get(&id)
        .ok_or(crate::core::catalog::CatalogError::NotFound { id })?;
    editor::launch(&state.config.get().editor, &script.path)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeleteScriptQuery {
    #[serde(default)]
    rm: bool,
    #[serde(default)]
    purge_history: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeleteScriptResponse {
    id: String,
    file_deleted: bool,
    purged_records: usize,
}

/// `DELETE /api/scripts/:id?rm=&purgeHistory=`: history is kept unless purged.
pub async fn delete_script(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<DeleteScriptQuery>, QueryRejection>,
) -> Result<Json<DeleteScriptResponse>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    state.catalog.remove(&id, query.rm)?;
    let purged_records = if query.purge_history {
        state.history.purge_script(&id)?
    } else {
        0
    };
    log::info!(
        "Script '{}' removed (file deleted: {}, history purged: {}).",
        id,
        query.rm,
        purged_records
    );
    Ok(Json(DeleteScriptResponse {
        id,
        file_deleted: query.rm,
        purged_records,
    }))
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct LoadFoldersRequest {
    folders: Vec<String>,
}

/// `POST /api/actions/scripts/load`: rescans configured plus requested folders.
pub async fn load_scripts(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ScanReport>, ApiError> {
    let request: LoadFoldersRequest = parse_body(&body)?;
    let config = state.config.get();
    let catalog = state.catalog.clone();
    // Walking and parsing files is blocking work.
    let report = tokio::task::spawn_blocking(move || catalog.load_folders(&config, &request.folders))
        .await
        .map_err(|e| ApiError::Internal(format!("Scan task failed: {}", e)))??;
    Ok(Json(report))
}

/// `GET /api/categories`
pub async fn list_categories(State(state): State<AppState>) -> Json<Vec<CategoryCount>> {
    Json(state.catalog.categories())
}
