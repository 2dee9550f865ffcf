//! What reaches the log when executions fail. Runs as its own binary because it
//! installs a global logger.

#![cfg(unix)]

mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use common::{TestContext, id_of};
use devloop::api::build_router;
use devloop::core::engine::ExecError;
use devloop::models::ExecuteRequest;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs;
use std::sync::{Mutex, PoisonError};
use tower::ServiceExt;

// ============================================================================
// TEST FIXTURES
// ============================================================================

static LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());

struct CapturingLogger;

impl Log for CapturingLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let line = format!("[{}] {}: {}", record.level(), record.target(), record.args());
        LINES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger;

fn capture_logs() {
    // Only the first call installs; the other tests share the same sink.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
}

fn captured() -> Vec<String> {
    LINES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

const SECRET_ARG: &str = "TOP-SECRET-ARGUMENT";
const SECRET_ENV: &str = "TOP-SECRET-TOKEN";

fn broken_interpreter_context() -> TestContext {
    let ctx = TestContext::new();
    ctx.write_script("deploy.sh", "# @name: Deploy\necho \"$1\"\n");
    ctx
}

fn start_with_missing_interpreter(ctx: &TestContext) -> devloop::state::AppState {
    let mut config = ctx.config();
    config
        .extension_commands
        .insert(".sh".to_string(), "devloop-no-such-interpreter".to_string());
    ctx.start_with(&config)
}

// ============================================================================
// SPAWN FAILURES
// ============================================================================

#[tokio::test]
async fn test_incognito_spawn_failure_keeps_arguments_out_of_logs() {
    capture_logs();
    let ctx = broken_interpreter_context();
    let state = start_with_missing_interpreter(&ctx);
    let id = id_of(&state, "Deploy");

    let mut request = ExecuteRequest {
        args: vec![SECRET_ARG.to_string()],
        ..ExecuteRequest::default()
    };
    request.env.insert("TOKEN".to_string(), SECRET_ENV.to_string());
    let err = state.engine.execute(&id, request, true).await.unwrap_err();

    assert!(matches!(err, ExecError::ProcessSpawnFailure { .. }));
    assert!(err.to_string().contains("devloop-no-such-interpreter"));
    assert!(!err.to_string().contains(SECRET_ARG));

    let lines = captured();
    assert!(lines.iter().any(|l| l.contains("failed to start")));
    assert!(lines.iter().all(|l| !l.contains(SECRET_ARG) && !l.contains(SECRET_ENV)));

    let history = fs::read_to_string(state.history.log_path()).unwrap();
    assert!(!history.contains(SECRET_ARG));
    assert!(!history.contains(SECRET_ENV));
}

#[tokio::test]
async fn test_incognito_spawn_failure_over_http_keeps_arguments_out_of_logs() {
    capture_logs();
    let ctx = broken_interpreter_context();
    let state = start_with_missing_interpreter(&ctx);
    let id = id_of(&state, "Deploy");
    let app = build_router(state);

    let body = serde_json::json!({ "args": [SECRET_ARG], "env": { "TOKEN": SECRET_ENV } });
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/api/actions/exec/scripts/{}?incognito=true", id))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8_lossy(&body);
    assert!(body.contains("process-spawn-failure"));
    assert!(!body.contains(SECRET_ARG));

    let lines = captured();
    assert!(lines.iter().any(|l| l.contains("process-spawn-failure")));
    assert!(lines.iter().all(|l| !l.contains(SECRET_ARG) && !l.contains(SECRET_ENV)));
}
