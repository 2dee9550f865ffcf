// src/core/history.rs

use crate::constants::INFLIGHT_MARKER_EXT;
use crate::models::{ExecutionRecord, ExecutionStatus, HistoryQuery, PersistableRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Filesystem error in history store: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode history entry: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to encode in-flight marker: {0}")]
    MarkerEncode(#[from] bincode::error::EncodeError),
    #[error("Failed to decode in-flight marker: {0}")]
    MarkerDecode(#[from] bincode::error::DecodeError),
    #[error("Execution '{id}' not found.")]
    NotFound { id: String },
}

type StoreResult<T> = Result<T, StoreError>;

/// One line of the history log.
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "op", rename_all = "camelCase")]
enum LogEntry {
    Append { record: ExecutionRecord },
    Delete { id: String },
}

/// The durable, append-only log of executions.
///
/// Records are kept in memory keyed by execution id. Ids start with the zero-padded
/// admission time, so key order is chronological order.
#[derive(Debug)]
pub struct HistoryStore {
    log_path: PathBuf,
    inflight_dir: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    records: BTreeMap<String, ExecutionRecord>,
    file: File,
    /// Length of the log up to its last complete line.
    committed_len: u64,
}

impl Inner {
    /// Appends whole lines and syncs them. A failed write is cut back to the last
    /// complete line, and so is any tail found past it before writing.
    fn write_lines(&mut self, text: &str) -> StoreResult<()> {
        if self.file.metadata()?.len() != self.committed_len {
            log::warn!("Discarding an incomplete tail of the history log.");
            self.file.set_len(self.committed_len)?;
        }
        let written = self
            .file
            .write_all(text.as_bytes())
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            if let Err(trunc) = self.file.set_len(self.committed_len) {
                log::error!("Could not cut back a failed history write: {}", trunc);
            }
            return Err(e.into());
        }
        self.committed_len += text.len() as u64;
        Ok(())
    }
}

impl HistoryStore {
    /// Opens (or creates) the log at `log_path` and replays it.
    ///
    /// A log holding deletions or unreadable lines is compacted on open.
    pub fn open(log_path: impl Into<PathBuf>, inflight_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let log_path = log_path.into();
        let inflight_dir = inflight_dir.into();
        fs::create_dir_all(&inflight_dir)?;

        let (records, needs_compaction) = replay(&log_path)?;
        if needs_compaction {
            log::info!("Compacting history log '{}'.", log_path.display());
            rewrite(&log_path, records.values())?;
        }
        let mut file = open_for_append(&log_path)?;
        if !ends_at_line_break(&log_path)? {
            file.write_all(b"\n")?;
            file.sync_data()?;
        }
        let committed_len = file.metadata()?.len();
        log::debug!("History store opened with {} records.", records.len());

        Ok(Self {
            log_path,
            inflight_dir,
            inner: Mutex::new(Inner {
                records,
                file,
                committed_len,
            }),
        })
    }

    /// Durably appends a record. It is visible to readers once this returns `Ok`.
    pub fn append(&self, record: PersistableRecord) -> StoreResult<()> {
        let entry = LogEntry::Append {
            record: record.into_record(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.write_lines(&line)?;

        if let LogEntry::Append { record } = entry {
            inner.records.insert(record.id.clone(), record);
        }
        Ok(())
    }

    pub fn get(&self, execution_id: &str) -> Option<ExecutionRecord> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.records.get(execution_id).cloned()
    }

    /// Records of one script, newest first.
    pub fn for_script(&self, script_id: &str, query: &HistoryQuery) -> Vec<ExecutionRecord> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .records
            .values()
            .rev()
            .filter(|r| r.script_id == script_id)
            .filter(|r| query.before.is_none_or(|before| r.started_at < before))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect()
    }

    /// The latest record of each of the `limit` most recently run scripts, newest first.
    pub fn latest_per_script(&self, limit: usize) -> Vec<ExecutionRecord> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut seen = HashSet::new();
        inner
            .records
            .values()
            .rev()
            .filter(|r| seen.insert(r.script_id.as_str()))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Deletes one record.
    pub fn delete(&self, execution_id: &str) -> StoreResult<ExecutionRecord> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.records.contains_key(execution_id) {
            return Err(StoreError::NotFound {
                id: execution_id.to_string(),
            });
        }
        inner.write_lines(&delete_lines(std::iter::once(execution_id))?)?;
        inner
            .records
            .remove(execution_id)
            .ok_or_else(|| StoreError::NotFound {
                id: execution_id.to_string(),
            })
    }

    /// Deletes every record of a script and returns how many were removed.
    pub fn purge_script(&self, script_id: &str) -> StoreResult<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let ids: Vec<String> = inner
            .records
            .values()
            .filter(|r| r.script_id == script_id)
            .map(|r| r.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        inner.write_lines(&delete_lines(ids.iter().map(String::as_str))?)?;
        for id in &ids {
            inner.records.remove(id);
        }
        log::info!("Purged {} history records of script '{}'.", ids.len(), script_id);
        Ok(ids.len())
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    // --- IN-FLIGHT MARKERS ---

    fn marker_path(&self, execution_id: &str) -> PathBuf {
        self.inflight_dir
            .join(format!("{}.{}", execution_id, INFLIGHT_MARKER_EXT))
    }

    /// Records that an execution has started and has not been written to the log yet.
    pub fn write_marker(&self, marker: &InFlightMarker) -> StoreResult<()> {
        let bytes = bincode::serde::encode_to_vec(marker, bincode::config::standard())?;
        let mut file = File::create(self.marker_path(&marker.id))?;
        file.write_all(&bytes)?;
        file.sync_data()?;
        Ok(())
    }

    pub fn remove_marker(&self, execution_id: &str) -> StoreResult<()> {
        match fs::remove_file(self.marker_path(execution_id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Turns every marker left behind by a previous run into an `interrupted` record.
    ///
    /// A marker is only removed once its record has been appended. Markers that
    /// cannot be decoded are moved aside with a warning.
    pub fn reconcile_interrupted(&self) -> StoreResult<Vec<ExecutionRecord>> {
        let mut recovered = Vec::new();
        let ext = std::ffi::OsStr::new(INFLIGHT_MARKER_EXT);

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.inflight_dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension() == Some(ext))
            .collect();
        paths.sort();

        for path in paths {
            let marker = match read_marker(&path) {
                Ok(marker) => marker,
                Err(e) => {
                    log::warn!("Discarding unreadable in-flight marker '{}': {}", path.display(), e);
                    fs::rename(&path, path.with_extension("corrupt"))?;
                    continue;
                }
            };
            if self.get(&marker.id).is_none() {
                let record = marker.into_interrupted(Utc::now());
                log::warn!(
                    "Execution '{}' of script '{}' was interrupted by a shutdown.",
                    record.record().id,
                    record.record().script_id
                );
                recovered.push(record.record().clone());
                self.append(record)?;
            }
            fs::remove_file(&path)?;
        }
        Ok(recovered)
    }
}

// --- MARKER FORMAT ---

/// What is known about an execution before it ends. Stored with `bincode`, which
/// needs every field present, so this is kept separate from `ExecutionRecord`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InFlightMarker {
    pub id: String,
    pub script_id: String,
    pub script_name: String,
    pub script_path: String,
    pub started_at_micros: i64,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub incognito: bool,
}

impl InFlightMarker {
    /// Builds the marker from the already scrubbed start state of an execution.
    pub fn new(start: &PersistableRecord) -> Self {
        let record = start.record();
        Self {
            id: record.id.clone(),
            script_id: record.script_id.clone(),
            script_name: record.script_name.clone(),
            script_path: record.script_path.to_string_lossy().into_owned(),
            started_at_micros: record.started_at.timestamp_micros(),
            command: record.command.clone(),
            args: record.args.clone(),
            env: record.env.clone().into_iter().collect(),
            incognito: record.incognito,
        }
    }

    fn into_interrupted(self, finished_at: DateTime<Utc>) -> PersistableRecord {
        let started_at = DateTime::from_timestamp_micros(self.started_at_micros).unwrap_or(finished_at);
        PersistableRecord::new(ExecutionRecord {
            id: self.id,
            script_id: self.script_id,
            script_name: self.script_name,
            script_path: PathBuf::from(self.script_path),
            started_at,
            finished_at: finished_at.max(started_at),
            command: self.command,
            args: self.args,
            env: self.env.into_iter().collect(),
            exit_code: None,
            status: ExecutionStatus::Interrupted,
            output: String::new(),
            output_truncated: false,
            incognito: self.incognito,
        })
    }
}

fn read_marker(path: &Path) -> StoreResult<InFlightMarker> {
    let bytes = fs::read(path)?;
    let (marker, _): (InFlightMarker, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
    Ok(marker)
}

// --- LOG FILE HELPERS ---

fn open_for_append(path: &Path) -> StoreResult<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// True for an empty file or one whose last byte is a newline.
fn ends_at_line_break(path: &Path) -> StoreResult<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Replays the log. Returns the live records and whether the file should be compacted.
fn replay(path: &Path) -> StoreResult<(BTreeMap<String, ExecutionRecord>, bool)> {
    let mut records = BTreeMap::new();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((records, false)),
        Err(e) => return Err(e.into()),
    };

    let mut needs_compaction = false;
    let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
    let last = lines.len().saturating_sub(1);

    for (number, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(line) {
            Ok(LogEntry::Append { record }) => {
                records.insert(record.id.clone(), record);
            }
            Ok(LogEntry::Delete { id }) => {
                records.remove(&id);
                needs_compaction = true;
            }
            Err(e) => {
                needs_compaction = true;
                if number == last {
                    log::warn!("Skipping torn final line of history log: {}", e);
                } else {
                    log::warn!("Skipping corrupt history line {}: {}", number + 1, e);
                }
            }
        }
    }
    Ok((records, needs_compaction))
}

fn delete_lines<'a>(ids: impl Iterator<Item = &'a str>) -> StoreResult<String> {
    let mut buffer = String::new();
    for id in ids {
        buffer.push_str(&serde_json::to_string(&LogEntry::Delete { id: id.to_string() })?);
        buffer.push('\n');
    }
    Ok(buffer)
}

/// Atomically replaces the log with one `append` line per record.
fn rewrite<'a>(path: &Path, records: impl Iterator<Item = &'a ExecutionRecord>) -> StoreResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    for record in records {
        let entry = LogEntry::Append {
            record: record.clone(),
        };
        serde_json::to_writer(&mut tmp, &entry)?;
        tmp.write_all(b"\n")?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
