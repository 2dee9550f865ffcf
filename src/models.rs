// src/models.rs

use crate::constants::{
    DEFAULT_EDITOR, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT_SECS, REDACTED, UNCATEGORIZED,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

// --- SCRIPT CATALOG MODELS ---

/// The declared type of a script input.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    String,
    Number,
    Boolean,
    Select,
    File,
}

/// One typed input declared in a script's `@inputs:` header.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptInput {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: InputType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: String,
    /// Allowed values for `select` inputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// A catalogued, runnable script file plus its declared metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub id: String,
    pub name: String,
    pub description: String,
    pub author: String,
    pub version: Option<String>,
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    pub inputs: Vec<ScriptInput>,
    pub path: PathBuf,
    /// File text, only populated for single-script reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Content hash used to tell an updated file from an unchanged one across rescans.
    #[serde(skip)]
    pub fingerprint: String,
}

impl Script {
    /// The key this script is counted under in category aggregations.
    pub fn category_key(&self) -> &str {
        match self.category.as_deref() {
            Some(c) if !c.trim().is_empty() => c,
            _ => UNCATEGORIZED,
        }
    }

    /// The lowercase file extension including its leading dot (e.g. `.js`).
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
    }
}

/// Optional filters applied to a catalog listing.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ScriptFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub tag: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

/// A non-fatal problem met while scanning a folder or parsing a file.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub message: String,
}

/// The outcome of a catalog rescan.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
    pub total: usize,
    pub warnings: Vec<ScanWarning>,
}

/// A script that was run recently, annotated with its last run.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RecentScript {
    #[serde(flatten)]
    pub script: Script,
    pub last_executed: DateTime<Utc>,
    pub last_execution_id: String,
    pub last_status: ExecutionStatus,
    pub last_exit_code: Option<i32>,
    /// False when the script is no longer in the catalog.
    pub available: bool,
}

// --- EXECUTION MODELS ---

/// How an execution ended.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    /// The process exited on its own; `exitCode` tells how.
    Completed,
    TimedOut,
    Cancelled,
    /// The interpreter could not be spawned.
    FailedToStart,
    /// The service stopped while the process was running.
    Interrupted,
}

/// The durable record of one execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub script_id: String,
    /// Display fields captured at execution time, so history outlives the script.
    pub script_name: String,
    pub script_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub command: String,
    pub args: Vec<String>,
    /// Only the variables supplied by the caller, never the full process environment.
    pub env: BTreeMap<String, String>,
    pub exit_code: Option<i32>,
    pub status: ExecutionStatus,
    pub output: String,
    #[serde(default)]
    pub output_truncated: bool,
    pub incognito: bool,
}

impl ExecutionRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// An execution record whose sensitive fields have been scrubbed when the execution
/// was incognito. The history store only accepts this type.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistableRecord(ExecutionRecord);

impl PersistableRecord {
    pub fn new(mut record: ExecutionRecord) -> Self {
        if record.incognito {
            for arg in record.args.iter_mut() {
                *arg = REDACTED.to_string();
            }
            for value in record.env.values_mut() {
                *value = REDACTED.to_string();
            }
            record.output = REDACTED.to_string();
            record.output_truncated = false;
        }
        Self(record)
    }

    pub fn record(&self) -> &ExecutionRecord {
        &self.0
    }

    pub fn into_record(self) -> ExecutionRecord {
        self.0
    }
}

/// Body of `POST /api/actions/exec/scripts/:id`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ExecuteRequest {
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Overrides the interpreter mapped to the script's extension when non-empty.
    pub command: String,
}

/// An execution that is waiting for its turn or currently running.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RunningExecution {
    pub id: String,
    pub script_id: String,
    /// When it was queued, or when its process started once it has.
    pub started_at: DateTime<Utc>,
    /// Waiting behind an earlier execution of the same script.
    pub queued: bool,
}

/// Paging for per-script history reads.
#[derive(Debug, Clone, Copy)]
pub struct HistoryQuery {
    pub limit: usize,
    pub offset: usize,
    /// Only records started strictly before this instant.
    pub before: Option<DateTime<Utc>>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: usize::MAX,
            offset: 0,
            before: None,
        }
    }
}

// --- CONFIGURATION MODELS ---

/// What to do when a script is asked to run while it is already running.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Wait for the running execution to finish.
    #[default]
    Queue,
    /// Fail immediately with a `Busy` error.
    Reject,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Features {
    pub show_categories: bool,
    pub show_recent: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            show_categories: true,
            show_recent: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionSettings {
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    pub busy_policy: BusyPolicy,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            busy_policy: BusyPolicy::Queue,
        }
    }
}

/// The persisted application configuration. Updates always replace the whole document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub script_folders: Vec<String>,
    #[serde(default = "default_editor")]
    pub editor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub extension_commands: BTreeMap<String, String>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub execution: ExecutionSettings,
}

fn default_editor() -> String {
    DEFAULT_EDITOR.to_string()
}

impl AppConfig {
    /// The configuration written on first run.
    pub fn new() -> Self {
        let extension_commands = [
            (".py", "python"),
            (".js", "node"),
            (".ts", "ts-node"),
            (".go", "go run"),
            (".sh", "bash"),
            (".bash", "bash"),
            (".zsh", "zsh"),
            (".zx", "zx"),
        ]
        .into_iter()
        .map(|(ext, cmd)| (ext.to_string(), cmd.to_string()))
        .collect();

        Self {
            script_folders: vec![format!("~/{}/scripts", crate::constants::DATA_DIR_NAME)],
            editor: default_editor(),
            api_key: None,
            extension_commands,
            environment_variables: BTreeMap::new(),
            features: Features::default(),
            execution: ExecutionSettings::default(),
        }
    }

    /// Looks up the interpreter for an extension, accepting keys with or without a leading dot.
    pub fn interpreter_for(&self, extension: &str) -> Option<&str> {
        let bare = extension.trim_start_matches('.');
        self.extension_commands
            .iter()
            .find(|(key, _)| key.trim_start_matches('.').eq_ignore_ascii_case(bare))
            .map(|(_, cmd)| cmd.as_str())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(incognito: bool) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            id: "1-abc".to_string(),
            script_id: "abc".to_string(),
            script_name: "Hello".to_string(),
            script_path: PathBuf::from("/tmp/hello.sh"),
            started_at: now,
            finished_at: now,
            command: "bash /tmp/hello.sh".to_string(),
            args: vec!["secret-arg".to_string()],
            env: BTreeMap::from([("TOKEN".to_string(), "secret-env".to_string())]),
            exit_code: Some(0),
            status: ExecutionStatus::Completed,
            output: "secret-output".to_string(),
            output_truncated: false,
            incognito,
        }
    }

    #[test]
    fn test_persistable_record_scrubs_incognito_fields() {
        let persisted = PersistableRecord::new(sample_record(true)).into_record();
        assert_eq!(persisted.args, vec![REDACTED.to_string()]);
        assert_eq!(persisted.env.get("TOKEN").map(String::as_str), Some(REDACTED));
        assert_eq!(persisted.output, REDACTED);
        assert_eq!(persisted.exit_code, Some(0));

        let json = serde_json::to_string(&persisted).unwrap();
        assert!(!json.contains("secret-"));
    }

    #[test]
    fn test_persistable_record_keeps_regular_fields() {
        let original = sample_record(false);
        let persisted = PersistableRecord::new(original.clone()).into_record();
        assert_eq!(persisted, original);
    }

    #[test]
    fn test_interpreter_lookup_accepts_dotted_and_bare_keys() {
        let mut config = AppConfig::new();
        config
            .extension_commands
            .insert("rb".to_string(), "ruby".to_string());
        assert_eq!(config.interpreter_for(".js"), Some("node"));
        assert_eq!(config.interpreter_for("js"), Some("node"));
        assert_eq!(config.interpreter_for(".rb"), Some("ruby"));
        assert_eq!(config.interpreter_for(".exe"), None);
    }

    #[test]
    fn test_script_category_key_buckets_missing_category() {
        let mut script = Script {
            id: "x".to_string(),
            name: "x".to_string(),
            description: String::new(),
            author: String::new(),
            version: None,
            category: None,
            tags: BTreeSet::new(),
            inputs: Vec::new(),
            path: PathBuf::from("/a/x.py"),
            content: None,
            fingerprint: String::new(),
        };
        assert_eq!(script.category_key(), UNCATEGORIZED);
        script.category = Some("  ".to_string());
        assert_eq!(script.category_key(), UNCATEGORIZED);
        script.category = Some("Ops".to_string());
        assert_eq!(script.category_key(), "Ops");
        assert_eq!(script.extension().as_deref(), Some(".py"));
    }

    #[test]
    fn test_app_config_round_trips_through_toml() {
        let config = AppConfig::new();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
