// src/bin/devloop.rs

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use devloop::{api, cli::Cli, core::paths::DataDir, state::AppState};
use std::net::SocketAddr;
use std::time::Duration;

/// How long shutdown waits for cancelled executions to be recorded.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The entry point of the `devloop` service.
/// It sets up logging, initializes the shared state, serves HTTP until a shutdown
/// signal arrives, and reports fatal errors in one place.
#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let data_dir = DataDir::resolve(cli.data_dir).context("Failed to prepare the data directory")?;
    log::info!("Using data directory '{}'.", data_dir.root().display());

    let state = tokio::task::spawn_blocking(move || AppState::initialize(data_dir))
        .await
        .context("Initialization task failed")??;
    let engine = state.engine.clone();

    let addr = SocketAddr::new(cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Could not listen on {}", addr))?;
    println!("{} {}", "devloop listening on".green(), format!("http://{}", addr).bold());

    axum::serve(listener, api::build_router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            log::info!("Shutting down; cancelling running executions.");
            engine.shutdown(SHUTDOWN_GRACE).await;
        })
        .await
        .context("HTTP server failed")?;

    log::info!("Bye.");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Could not listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
