// src/state.rs

use crate::core::catalog::Catalog;
use crate::core::config_manager::ConfigManager;
use crate::core::engine::ExecutionEngine;
use crate::core::history::HistoryStore;
use crate::core::paths::DataDir;
use anyhow::{Context, Result};
use std::sync::Arc;

/// The process-wide services, shared by every request handler.
///
/// Built once by [`AppState::initialize`]; cloning only bumps reference counts.
#[derive(Debug, Clone)]
pub struct AppState {
    pub data_dir: Arc<DataDir>,
    pub config: Arc<ConfigManager>,
    pub catalog: Arc<Catalog>,
    pub history: Arc<HistoryStore>,
    pub engine: Arc<ExecutionEngine>,
}

impl AppState {
    /// Brings the services up in dependency order:
    ///
    /// 1. Load (or create) the configuration.
    /// 2. Open the history log and turn executions cut short by a previous shutdown
    ///    into `interrupted` records.
    /// 3. Scan the configured folders. A scan that finds nothing to scan leaves the
    ///    catalog empty instead of failing startup.
    pub fn initialize(data_dir: DataDir) -> Result<Self> {
        let config = Arc::new(
            ConfigManager::load(data_dir.config_path()).context("Failed to load configuration")?,
        );

        let history = Arc::new(
            HistoryStore::open(data_dir.history_path(), data_dir.inflight_dir())
                .context("Failed to open execution history")?,
        );
        let recovered = history
            .reconcile_interrupted()
            .context("Failed to recover interrupted executions")?;
        if !recovered.is_empty() {
            log::warn!(
                "Recorded {} executions interrupted by the previous shutdown.",
                recovered.len()
            );
        }

        let catalog = Arc::new(Catalog::new());
        match catalog.load_folders(&config.get(), &[]) {
            Ok(report) => log::info!(
                "Catalog ready: {} scripts, {} warnings.",
                report.total,
                report.warnings.len()
            ),
            Err(e) => log::warn!("Initial scan skipped: {}", e),
        }

        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&catalog),
            Arc::clone(&config),
            Arc::clone(&history),
        ));

        Ok(Self {
            data_dir: Arc::new(data_dir),
            config,
            catalog,
            history,
            engine,
        })
    }
}
