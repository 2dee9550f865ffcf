//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use devloop::core::paths::DataDir;
use devloop::models::{AppConfig, RunningExecution, ScriptFilter};
use devloop::state::AppState;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// An isolated data directory and script folder, torn down on drop.
pub struct TestContext {
    pub scripts_dir: PathBuf,
    pub data_root: PathBuf,
    _temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let scripts_dir = temp_dir.path().join("scripts");
        let data_root = temp_dir.path().join("data");
        fs::create_dir_all(&scripts_dir).expect("Failed to create scripts dir");
        Self {
            scripts_dir,
            data_root,
            _temp_dir: temp_dir,
        }
    }

    /// A config scanning only this context's script folder, mapping `.sh` to `sh`.
    pub fn config(&self) -> AppConfig {
        let mut config = AppConfig::new();
        config.script_folders = vec![self.scripts_dir.display().to_string()];
        config
            .extension_commands
            .insert(".sh".to_string(), "sh".to_string());
        config
    }

    pub fn write_script(&self, name: &str, content: &str) -> PathBuf {
        let path = self.scripts_dir.join(name);
        fs::write(&path, content).expect("Failed to write script");
        path
    }

    /// Writes `config` and brings the services up, as the binary does.
    pub fn start_with(&self, config: &AppConfig) -> AppState {
        let data_dir = DataDir::open(&self.data_root).expect("Failed to open data dir");
        fs::write(
            data_dir.config_path(),
            toml::to_string_pretty(config).expect("Failed to serialize config"),
        )
        .expect("Failed to write config");
        AppState::initialize(data_dir).expect("Failed to initialize state")
    }

    pub fn start(&self) -> AppState {
        self.start_with(&self.config())
    }

    /// Brings the services up again on the existing data directory.
    pub fn restart(&self) -> AppState {
        let data_dir = DataDir::open(&self.data_root).expect("Failed to open data dir");
        AppState::initialize(data_dir).expect("Failed to initialize state")
    }

    pub fn inflight_dir(&self) -> PathBuf {
        self.data_root.join("inflight")
    }
}

/// The catalog id of the script named `name`.
pub fn id_of(state: &AppState, name: &str) -> String {
    state
        .catalog
        .list(&ScriptFilter::default())
        .into_iter()
        .find(|s| s.name == name)
        .map(|s| s.id.clone())
        .unwrap_or_else(|| panic!("Script '{}' is not in the catalog", name))
}

/// Polls until `state` reports `count` started executions, ignoring queued ones.
pub async fn wait_for_running(state: &AppState, count: usize) -> Vec<RunningExecution> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let running: Vec<RunningExecution> = state
            .engine
            .running()
            .into_iter()
            .filter(|r| !r.queued)
            .collect();
        if running.len() == count {
            return running;
        }
        assert!(Instant::now() < deadline, "Timed out waiting for running executions");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// True when `program --version` runs.
pub fn has_program(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Polls until `state` reports `count` queued executions.
pub async fn wait_for_queued(state: &AppState, count: usize) -> Vec<RunningExecution> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let queued: Vec<RunningExecution> = state
            .engine
            .running()
            .into_iter()
            .filter(|r| r.queued)
            .collect();
        if queued.len() == count {
            return queued;
        }
        assert!(Instant::now() < deadline, "Timed out waiting for queued executions");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
