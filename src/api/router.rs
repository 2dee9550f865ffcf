// src/api/router.rs

use crate::api::auth;
use crate::api::handlers::{config, exec, history, scripts};
use crate::state::AppState;
use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

/// Builds the full HTTP surface on top of `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(crate::api::handlers::health))
        .route("/api/config", get(config::get_config).post(config::update_config))
        .route("/api/scripts", get(scripts::list_scripts))
        .route(
            "/api/scripts/:id",
            get(scripts::get_script)
                .patch(scripts::open_in_editor)
                .delete(scripts::delete_script),
        )
        .route("/api/actions/scripts/load", post(scripts::load_scripts))
        .route("/api/categories", get(scripts::list_categories))
        .route("/api/history/scripts/recent", get(history::recent_scripts))
        .route("/api/history/scripts/:script_id", get(history::script_history))
        .route(
            "/api/history/:execution_id",
            get(history::get_execution).delete(history::delete_execution),
        )
        .route("/api/actions/exec/scripts/:id", post(exec::execute_script))
        .route("/api/executions/running", get(exec::list_running))
        .route(
            "/api/actions/cancel/executions/:execution_id",
            post(exec::cancel_execution),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Permissive CORS for browser clients; preflight requests are answered directly.
async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Origin, Content-Type, Accept, Authorization"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("x-execution-id, x-exit-code"),
    );
    response
}
