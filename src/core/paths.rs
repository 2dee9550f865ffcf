// src/core/paths.rs

use crate::constants::{CONFIG_FILENAME, DATA_DIR_NAME, HISTORY_LOG_FILENAME, HOME_ENV_VAR, INFLIGHT_DIR};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find the user's home directory.")]
    HomeDirNotFound,
    #[error("Could not create data directory at '{path}': {source}")]
    DataDirCreation {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not expand folder '{template}': {message}")]
    Expansion { template: String, message: String },
}

/// The directory holding configuration, history and in-flight markers.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Uses `root` as the data directory, creating it (and the in-flight subdirectory)
    /// if it does not exist.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PathError> {
        let root = root.into();
        for dir in [root.clone(), root.join(INFLIGHT_DIR)] {
            if !dir.exists() {
                fs::create_dir_all(&dir).map_err(|e| PathError::DataDirCreation {
                    path: dir.display().to_string(),
                    source: e,
                })?;
            }
        }
        Ok(Self { root })
    }

    /// Resolves the data directory from, in order: the explicit argument,
    /// `DEV_LOOP_HOME`, and `~/.dev-loop`.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self, PathError> {
        let root = match explicit {
            Some(path) => path,
            None => match std::env::var_os(HOME_ENV_VAR) {
                Some(value) if !value.is_empty() => PathBuf::from(value),
                _ => dirs::home_dir()
                    .ok_or(PathError::HomeDirNotFound)?
                    .join(DATA_DIR_NAME),
            },
        };
        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILENAME)
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_LOG_FILENAME)
    }

    pub fn inflight_dir(&self) -> PathBuf {
        self.root.join(INFLIGHT_DIR)
    }
}

/// Expands a configured folder entry, resolving the home directory (`~`) and
/// environment variables (`$VAR`).
pub fn expand_folder(template: &str) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template.trim()).map_err(|e| PathError::Expansion {
        template: template.to_string(),
        message: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// Produces the canonical form of a path used for identity: symlinks resolved when the
/// file exists, otherwise made absolute against the current directory.
/// `dunce` keeps Windows paths free of the `\\?\` prefix.
pub fn normalize(path: &Path) -> PathBuf {
    match dunce::canonicalize(path) {
        Ok(canonical) => canonical,
        Err(_) if path.is_absolute() => path.to_path_buf(),
        Err(_) => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nested").join("data");
        let data_dir = DataDir::open(&root).unwrap();

        assert!(root.is_dir());
        assert!(data_dir.inflight_dir().is_dir());
        assert_eq!(data_dir.config_path(), root.join(CONFIG_FILENAME));
        assert_eq!(data_dir.history_path(), root.join(HISTORY_LOG_FILENAME));
    }

    #[test]
    fn test_expand_folder_resolves_home() {
        let home = dirs::home_dir().unwrap();
        let expanded = expand_folder("~/scripts").unwrap();
        assert_eq!(expanded, home.join("scripts"));
    }

    #[test]
    fn test_expand_folder_rejects_unknown_variable() {
        let result = expand_folder("$DEV_LOOP_SURELY_UNSET_VARIABLE_123/scripts");
        assert!(matches!(result, Err(PathError::Expansion { .. })));
    }

    #[test]
    fn test_normalize_resolves_relative_components() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.sh");
        fs::write(&file, "echo hi").unwrap();
        let roundabout = tmp.path().join(".").join("a.sh");
        assert_eq!(normalize(&roundabout), normalize(&file));
    }
}
