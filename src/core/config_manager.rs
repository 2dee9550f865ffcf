// src/core/config_manager.rs

use crate::constants::{API_KEY_ENV_VAR, MAX_TIMEOUT_SECS};
use crate::core::paths;
use crate::models::AppConfig;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Filesystem error on config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Owns the persisted [`AppConfig`].
///
/// Every update replaces the whole document. A rejected update leaves both the
/// in-memory and the on-disk configuration unchanged.
#[derive(Debug)]
pub struct ConfigManager {
    path: PathBuf,
    current: RwLock<AppConfig>,
}

impl ConfigManager {
    /// Loads the configuration at `path`, writing the defaults there on first run.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let config: AppConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                source: e,
            })?;
            if let Err(e) = validate(&config) {
                // A hand-edited file may be invalid. Keep serving it; updates still validate.
                log::warn!("Loaded configuration does not validate: {}", e);
            }
            config
        } else {
            log::info!(
                "No configuration found. Writing defaults to '{}'.",
                path.display()
            );
            let config = AppConfig::new();
            write_atomically(&path, &config)?;
            config
        };
        Ok(Self {
            path,
            current: RwLock::new(config),
        })
    }

    /// A snapshot of the current configuration.
    pub fn get(&self) -> AppConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validates, persists and then publishes `next`.
    ///
    /// The write lock is held across the file write, so concurrent updates are
    /// serialized and the last successful one wins both in memory and on disk.
    pub fn update(&self, next: AppConfig) -> Result<AppConfig, ConfigError> {
        validate(&next)?;
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        write_atomically(&self.path, &next)?;
        *current = next.clone();
        log::info!("Configuration updated.");
        Ok(next)
    }

    /// The API key clients must present. `DEV_LOOP_API_KEY` wins over the file;
    /// `None` disables authentication.
    pub fn api_key(&self) -> Option<String> {
        match std::env::var(API_KEY_ENV_VAR) {
            Ok(key) if !key.is_empty() => Some(key),
            _ => self
                .current
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .api_key
                .clone()
                .filter(|k| !k.is_empty()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Checks a candidate configuration before it replaces the current one.
pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for folder in &config.script_folders {
        let trimmed = folder.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::Validation(
                "Script folder entries must not be empty.".to_string(),
            ));
        }
        let key = paths::expand_folder(trimmed)
            .map(|p| p.to_string_lossy().trim_end_matches(['/', '\\']).to_string())
            .unwrap_or_else(|_| trimmed.to_string());
        if !seen.insert(key) {
            return Err(ConfigError::Validation(format!(
                "Script folder '{}' is listed more than once.",
                trimmed
            )));
        }
    }

    let mut extensions = HashSet::new();
    for (extension, command) in &config.extension_commands {
        let bare = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        if bare.is_empty() {
            return Err(ConfigError::Validation(
                "Extension keys must not be empty.".to_string(),
            ));
        }
        if !extensions.insert(bare) {
            return Err(ConfigError::Validation(format!(
                "Extension '{}' is mapped more than once.",
                extension
            )));
        }
        match shlex::split(command) {
            Some(parts) if !parts.is_empty() => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "Command for extension '{}' is empty or malformed.",
                    extension
                )));
            }
        }
    }

    if config
        .environment_variables
        .keys()
        .any(|k| k.is_empty() || k.contains('='))
    {
        return Err(ConfigError::Validation(
            "Environment variable names must be non-empty and must not contain '='.".to_string(),
        ));
    }
    if config.execution.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "execution.timeoutSecs must be greater than zero.".to_string(),
        ));
    }
    if config.execution.timeout_secs > MAX_TIMEOUT_SECS {
        return Err(ConfigError::Validation(format!(
            "execution.timeoutSecs must not exceed {} seconds.",
            MAX_TIMEOUT_SECS
        )));
    }
    if config.execution.max_output_bytes == 0 {
        return Err(ConfigError::Validation(
            "execution.maxOutputBytes must be greater than zero.".to_string(),
        ));
    }
    Ok(())
}

/// Writes to a temporary sibling file, flushes it to disk and renames it over `path`.
fn write_atomically(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let toml_string = toml::to_string_pretty(config)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(toml_string.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ConfigError::Io(e.error))?;
    Ok(())
}
