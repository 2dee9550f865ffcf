// src/constants.rs

/// The name of the data directory created under the user's home (`~/.dev-loop`).
pub const DATA_DIR_NAME: &str = ".dev-loop";

/// The name of the configuration file (inside the data directory).
pub const CONFIG_FILENAME: &str = "config.toml";

/// The name of the append-only execution history log (inside the data directory).
pub const HISTORY_LOG_FILENAME: &str = "history.jsonl";

/// The directory holding markers for executions that have started but not yet been recorded.
pub const INFLIGHT_DIR: &str = "inflight";

/// Extension of in-flight marker files.
pub const INFLIGHT_MARKER_EXT: &str = "bin";

/// Environment variable overriding the data directory.
pub const HOME_ENV_VAR: &str = "DEV_LOOP_HOME";

/// Environment variable overriding the HTTP port.
pub const PORT_ENV_VAR: &str = "DEV_LOOP_PORT";

/// Environment variable overriding the configured API key.
pub const API_KEY_ENV_VAR: &str = "DEV_LOOP_API_KEY";

pub const DEFAULT_PORT: u16 = 8997;

/// Input names starting with this prefix are routed to the environment instead of argv.
pub const ENV_INPUT_PREFIX: &str = "env:";

/// Category bucket for scripts that declare none.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Replacement for every sensitive value of an incognito execution.
pub const REDACTED: &str = "*****";

/// How many leading lines of a script are searched for metadata.
pub const HEADER_SCAN_LINES: usize = 60;

pub const DEFAULT_EDITOR: &str = "code";
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
/// Upper bound on `execution.timeoutSecs`: thirty days.
pub const MAX_TIMEOUT_SECS: u64 = 30 * 24 * 60 * 60;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const DEFAULT_RECENT_LIMIT: usize = 10;
