// src/core/engine.rs

use crate::CancellationToken;
use crate::core::catalog::Catalog;
use crate::core::config_manager::ConfigManager;
use crate::core::history::{HistoryStore, InFlightMarker, StoreError};
use crate::core::inputs::{self, InputError};
use crate::models::{
    BusyPolicy, ExecuteRequest, ExecutionRecord, ExecutionStatus, PersistableRecord,
    RunningExecution, Script,
};
use crate::system::executor::{self, ExecutorError, Outcome, ProcessResult, ProcessSpec};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Last admission time handed out, in microseconds. Keeps execution ids strictly
/// increasing within the process even when the clock does not move.
static LAST_ADMISSION_MICROS: AtomicU64 = AtomicU64::new(0);
/// How often a queued execution checks whether its turn has come.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Script '{id}' not found.")]
    ScriptNotFound { id: String },
    #[error("No interpreter is configured for extension '{extension}'.")]
    UnsupportedExtension { extension: String },
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] InputError),
    #[error("Interpreter command '{0}' is empty or malformed.")]
    InvalidCommand(String),
    #[error("Script '{script_id}' is already running.")]
    Busy { script_id: String },
    #[error("Execution '{execution_id}' timed out.")]
    TimedOut { execution_id: String, output: String },
    #[error("Execution '{execution_id}' was cancelled.")]
    Cancelled { execution_id: String, output: String },
    #[error("Execution '{execution_id}' failed to start: {source}")]
    ProcessSpawnFailure {
        execution_id: String,
        #[source]
        source: ExecutorError,
    },
    #[error("Execution '{execution_id}' could not be recorded: {source}")]
    StoreWriteFailure {
        execution_id: String,
        #[source]
        source: StoreError,
    },
    #[error("Execution '{execution_id}' is not running.")]
    NotRunning { execution_id: String },
    #[error("The service is shutting down.")]
    ShuttingDown,
    #[error("Execution task failed: {0}")]
    Internal(String),
}

impl ExecError {
    /// The id of the execution this error belongs to, once one was assigned.
    pub fn execution_id(&self) -> Option<&str> {
        match self {
            Self::TimedOut { execution_id, .. }
            | Self::Cancelled { execution_id, .. }
            | Self::ProcessSpawnFailure { execution_id, .. }
            | Self::StoreWriteFailure { execution_id, .. }
            | Self::NotRunning { execution_id } => Some(execution_id),
            _ => None,
        }
    }

    /// Output captured before the execution was stopped.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::TimedOut { output, .. } | Self::Cancelled { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct RunningEntry {
    script_id: String,
    /// Admission time while queued, process start time afterwards.
    since: DateTime<Utc>,
    queued: bool,
    token: CancellationToken,
}

/// Everything resolved about an execution before its process starts.
#[derive(Debug)]
struct Plan {
    script: Arc<Script>,
    spec: ProcessSpec,
    /// Interpreter plus script path, without the caller's arguments.
    command: String,
    args: Vec<String>,
    recorded_env: BTreeMap<String, String>,
    busy_policy: BusyPolicy,
}

/// Runs catalogued scripts as supervised child processes and records every run.
#[derive(Debug)]
pub struct ExecutionEngine {
    catalog: Arc<Catalog>,
    config: Arc<ConfigManager>,
    history: Arc<HistoryStore>,
    /// Admitted executions per script in admission order. Only the front one runs.
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    /// Every admitted execution, queued or started, until its record is written.
    running: Mutex<HashMap<String, RunningEntry>>,
    shutting_down: AtomicBool,
}

impl ExecutionEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        config: Arc<ConfigManager>,
        history: Arc<HistoryStore>,
    ) -> Self {
        Self {
            catalog,
            config,
            history,
            queues: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Runs a script and returns its record once the record is durable.
    ///
    /// The run happens on its own task: dropping the returned future (for example
    /// because an HTTP client went away) does not stop the process or lose its record.
    pub async fn execute(
        self: &Arc<Self>,
        script_id: &str,
        request: ExecuteRequest,
        incognito: bool,
    ) -> Result<ExecutionRecord, ExecError> {
        let engine = Arc::clone(self);
        let script_id = script_id.to_string();
        tokio::spawn(async move { engine.run(&script_id, request, incognito).await })
            .await
            .map_err(|e| ExecError::Internal(e.to_string()))?
    }

    async fn run(
        &self,
        script_id: &str,
        request: ExecuteRequest,
        incognito: bool,
    ) -> Result<ExecutionRecord, ExecError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ExecError::ShuttingDown);
        }
        // Unknown scripts and bad inputs fail before anything is queued.
        let busy_policy = self.plan(script_id, &request)?.busy_policy;

        let token: CancellationToken = Arc::new(AtomicBool::new(false));
        let execution_id = self.admit(script_id, busy_policy, &token)?;
        let _admission = scopeguard::guard(execution_id.clone(), |id| {
            self.release(script_id, &id);
        });

        let granted = self.wait_for_turn(script_id, &execution_id, &token).await;
        if self.shutting_down.load(Ordering::SeqCst) {
            log::info!("Execution '{}' dropped from the queue at shutdown.", execution_id);
            return Err(ExecError::ShuttingDown);
        }
        if !granted {
            log::info!("Execution '{}' cancelled while queued.", execution_id);
            return Err(ExecError::Cancelled {
                execution_id,
                output: String::new(),
            });
        }

        // Resolved again: the catalog or config may have changed while queued.
        let plan = self.plan(script_id, &request)?;
        let started_at = self.mark_started(&execution_id);

        let start = PersistableRecord::new(ExecutionRecord {
            id: execution_id.clone(),
            script_id: plan.script.id.clone(),
            script_name: plan.script.name.clone(),
            script_path: plan.script.path.clone(),
            started_at,
            finished_at: started_at,
            command: plan.command.clone(),
            args: plan.args.clone(),
            env: plan.recorded_env.clone(),
            exit_code: None,
            status: ExecutionStatus::Interrupted,
            output: String::new(),
            output_truncated: false,
            incognito,
        });
        self.history
            .write_marker(&InFlightMarker::new(&start))
            .map_err(|source| ExecError::StoreWriteFailure {
                execution_id: execution_id.clone(),
                source,
            })?;

        log::info!("Execution '{}' started.", execution_id);
        let result = executor::run_supervised(&plan.spec, &token).await;

        let mut record = start.into_record();
        // Keep the caller's real values; the store only ever sees the scrubbed copy.
        record.args = plan.args;
        record.env = plan.recorded_env;
        record.finished_at = Utc::now().max(started_at);

        let spawn_error = match result {
            Ok(ProcessResult {
                outcome,
                output,
                truncated,
            }) => {
                (record.status, record.exit_code) = match outcome {
                    Outcome::Exited(code) => (ExecutionStatus::Completed, code),
                    Outcome::TimedOut => (ExecutionStatus::TimedOut, None),
                    Outcome::Cancelled => (ExecutionStatus::Cancelled, None),
                };
                record.output = output;
                record.output_truncated = truncated;
                None
            }
            Err(e) => {
                log::warn!("Execution '{}' failed to start: {}", execution_id, e);
                record.status = ExecutionStatus::FailedToStart;
                record.output = e.to_string();
                Some(e)
            }
        };

        if let Err(source) = self.history.append(PersistableRecord::new(record.clone())) {
            log::error!("Execution '{}' could not be recorded: {}", execution_id, source);
            return Err(ExecError::StoreWriteFailure {
                execution_id,
                source,
            });
        }
        if let Err(e) = self.history.remove_marker(&execution_id) {
            log::warn!("Could not remove in-flight marker of '{}': {}", execution_id, e);
        }
        log::info!(
            "Execution '{}' finished: {:?} (exit code {:?}, {} ms).",
            execution_id,
            record.status,
            record.exit_code,
            record.duration_ms()
        );

        match (record.status, spawn_error) {
            (ExecutionStatus::FailedToStart, Some(source)) => Err(ExecError::ProcessSpawnFailure {
                execution_id,
                source,
            }),
            (ExecutionStatus::TimedOut, _) => Err(ExecError::TimedOut {
                execution_id,
                output: record.output,
            }),
            (ExecutionStatus::Cancelled, _) => Err(ExecError::Cancelled {
                execution_id,
                output: record.output,
            }),
            _ => Ok(record),
        }
    }

    /// Resolves interpreter, arguments and environment from a snapshot of the
    /// catalog entry and the configuration.
    fn plan(&self, script_id: &str, request: &ExecuteRequest) -> Result<Plan, ExecError> {
        let script = self
            .catalog
            .get(script_id)
            .ok_or_else(|| ExecError::ScriptNotFound {
                id: script_id.to_string(),
            })?;
        let config = self.config.get();

        let extension = script.extension().unwrap_or_default();
        let interpreter = config
            .interpreter_for(&extension)
            .ok_or_else(|| ExecError::UnsupportedExtension {
                extension: if extension.is_empty() {
                    "(none)".to_string()
                } else {
                    extension.clone()
                },
            })?;
        let command = match request.command.trim() {
            "" => interpreter.to_string(),
            custom => custom.to_string(),
        };
        let interpreter_parts = shlex::split(&command)
            .filter(|parts| !parts.is_empty())
            .ok_or_else(|| ExecError::InvalidCommand(command.clone()))?;
        let Some((program, interpreter_args)) = interpreter_parts.split_first() else {
            return Err(ExecError::InvalidCommand(command));
        };

        let bound = inputs::bind(&script.inputs, &request.args)?;
        let script_path = script.path.to_string_lossy().into_owned();

        let mut process_args = interpreter_args.to_vec();
        process_args.push(script_path.clone());
        process_args.extend(bound.argv);

        // Inherited < global < env: inputs < caller.
        let mut process_env = config.environment_variables.clone();
        process_env.extend(bound.env.clone());
        process_env.extend(request.env.clone());

        let mut recorded_env = bound.env;
        recorded_env.extend(request.env.clone());

        let cwd = script
            .path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();

        Ok(Plan {
            spec: ProcessSpec {
                program: program.clone(),
                args: process_args,
                cwd,
                env: process_env,
                timeout: Duration::from_secs(config.execution.timeout_secs),
                max_output_bytes: config.execution.max_output_bytes,
            },
            command: format!("{} {}", command, shlex::try_quote(&script_path).unwrap_or_default()),
            args: request.args.clone(),
            recorded_env,
            busy_policy: config.execution.busy_policy,
            script,
        })
    }

    /// Registers a new execution at the back of its script's queue and assigns its id.
    /// Under `Reject` a script with anything admitted is busy.
    fn admit(
        &self,
        script_id: &str,
        policy: BusyPolicy,
        token: &CancellationToken,
    ) -> Result<String, ExecError> {
        let mut queues = self.lock_queues();
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ExecError::ShuttingDown);
        }
        let queue = queues.entry(script_id.to_string()).or_default();
        if policy == BusyPolicy::Reject && !queue.is_empty() {
            return Err(ExecError::Busy {
                script_id: script_id.to_string(),
            });
        }

        let (admitted_at, micros) = next_admission();
        let execution_id = format!("{:020}-{}", micros, script_id);
        queue.push_back(execution_id.clone());
        self.lock_running().insert(
            execution_id.clone(),
            RunningEntry {
                script_id: script_id.to_string(),
                since: admitted_at,
                queued: true,
                token: Arc::clone(token),
            },
        );
        if queue.len() > 1 {
            log::info!("Execution '{}' queued behind {} others.", execution_id, queue.len() - 1);
        }
        Ok(execution_id)
    }

    /// Waits until `execution_id` is first in its script's queue. False when the
    /// token was set first.
    async fn wait_for_turn(
        &self,
        script_id: &str,
        execution_id: &str,
        token: &CancellationToken,
    ) -> bool {
        let mut poll = tokio::time::interval(QUEUE_POLL_INTERVAL);
        loop {
            poll.tick().await;
            if token.load(Ordering::SeqCst) {
                return false;
            }
            let first = self
                .lock_queues()
                .get(script_id)
                .and_then(|queue| queue.front().cloned());
            if first.as_deref() == Some(execution_id) {
                return true;
            }
        }
    }

    fn mark_started(&self, execution_id: &str) -> DateTime<Utc> {
        let mut running = self.lock_running();
        let Some(entry) = running.get_mut(execution_id) else {
            return Utc::now();
        };
        entry.since = Utc::now().max(entry.since);
        entry.queued = false;
        entry.since
    }

    /// Takes a finished or abandoned execution out of its queue and the running set.
    fn release(&self, script_id: &str, execution_id: &str) {
        let mut queues = self.lock_queues();
        if let Some(queue) = queues.get_mut(script_id) {
            queue.retain(|id| id != execution_id);
            if queue.is_empty() {
                queues.remove(script_id);
            }
        }
        self.lock_running().remove(execution_id);
    }

    fn lock_queues(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<String>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunningEntry>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Executions currently in flight, queued ones included, oldest first.
    pub fn running(&self) -> Vec<RunningExecution> {
        let mut running: Vec<RunningExecution> = self
            .lock_running()
            .iter()
            .map(|(id, entry)| RunningExecution {
                id: id.clone(),
                script_id: entry.script_id.clone(),
                started_at: entry.since,
                queued: entry.queued,
            })
            .collect();
        running.sort_by(|a, b| a.id.cmp(&b.id));
        running
    }

    /// Asks an execution to stop. A started one is recorded as `cancelled`; a queued
    /// one leaves the queue without a record.
    pub fn cancel(&self, execution_id: &str) -> Result<(), ExecError> {
        let running = self.lock_running();
        let entry = running
            .get(execution_id)
            .ok_or_else(|| ExecError::NotRunning {
                execution_id: execution_id.to_string(),
            })?;
        entry.token.store(true, Ordering::SeqCst);
        log::info!("Cancellation requested for execution '{}'.", execution_id);
        Ok(())
    }

    /// Refuses new executions, cancels running ones and waits up to `grace` for their
    /// records to be written.
    pub async fn shutdown(&self, grace: Duration) {
        {
            // Under the queue lock so nothing is admitted after the flag is seen unset.
            let _queues = self.lock_queues();
            self.shutting_down.store(true, Ordering::SeqCst);
            for entry in self.lock_running().values() {
                entry.token.store(true, Ordering::SeqCst);
            }
        }
        let deadline = tokio::time::Instant::now() + grace;
        while !self.lock_running().is_empty() {
            if tokio::time::Instant::now() >= deadline {
                log::warn!(
                    "{} executions still running at shutdown.",
                    self.lock_running().len()
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Admission time of a new execution, strictly later than every earlier one.
fn next_admission() -> (DateTime<Utc>, u64) {
    let now = Utc::now();
    let now_micros = u64::try_from(now.timestamp_micros()).unwrap_or_default();
    let previous = LAST_ADMISSION_MICROS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now_micros.max(last + 1))
        })
        .unwrap_or(now_micros);
    let assigned = now_micros.max(previous + 1);
    let admitted_at = i64::try_from(assigned)
        .ok()
        .and_then(DateTime::from_timestamp_micros)
        .unwrap_or(now);
    (admitted_at, assigned)
}
