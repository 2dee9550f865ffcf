// src/system/executor.rs

use crate::CancellationToken;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How often a running process checks its cancellation token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Time between SIGTERM and SIGKILL when stopping a process group.
const TERMINATION_GRACE: Duration = Duration::from_secs(2);
/// How long to keep reading output after the process exited. Grandchildren that
/// outlive the script may hold the pipes open.
const DRAIN_GRACE: Duration = Duration::from_secs(2);
const READ_CHUNK: usize = 8 * 1024;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("No command specified to run.")]
    EmptyCommand,
    #[error("Command '{0}' could not be executed: {1}")]
    SpawnFailed(String, #[source] std::io::Error),
    #[error("Lost track of command '{0}': {1}")]
    Wait(String, #[source] std::io::Error),
}

/// Everything needed to start one supervised process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Added on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The process ended on its own. Death by signal `n` is reported as `128 + n`.
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub outcome: Outcome,
    /// Interleaved stdout and stderr, lossily decoded as UTF-8.
    pub output: String,
    /// Set when the oldest output was dropped to stay within the limit.
    pub truncated: bool,
}

// --- OUTPUT CAPTURE ---

/// Keeps the most recent `limit` bytes of combined output.
#[derive(Debug)]
struct OutputBuffer {
    data: VecDeque<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: VecDeque::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.data.extend(chunk);
        if self.data.len() > self.limit {
            let excess = self.data.len() - self.limit;
            self.data.drain(..excess);
            self.truncated = true;
        }
    }

    fn into_text(self) -> (String, bool) {
        let bytes = Vec::from(self.data);
        // After truncation the first bytes may be the tail of a multi-byte character.
        let start = if self.truncated {
            bytes.iter().take_while(|b| (**b & 0xC0) == 0x80).count()
        } else {
            0
        };
        let text = bytes
            .get(start..)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        (text, self.truncated)
    }
}

fn spawn_reader<R>(mut reader: R, buffer: Arc<Mutex<OutputBuffer>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Some(read) = chunk.get(..n) {
                        buffer
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(read);
                    }
                }
                Err(e) => {
                    log::debug!("Output reader stopped: {}", e);
                    break;
                }
            }
        }
    })
}

// --- SPAWN & SUPERVISION ---

fn build_command(spec: &ProcessSpec) -> Command {
    let mut command = std::process::Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(dunce::simplified(&spec.cwd))
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group, so the whole tree can be signalled at once.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut command = Command::from(command);
    command.kill_on_drop(true);
    command
}

/// Starts the process described by `spec` and supervises it until it exits, its
/// timeout elapses, or `token` is set. Only a failure to start is an error;
/// everything after that is described by the returned [`Outcome`].
pub async fn run_supervised(
    spec: &ProcessSpec,
    token: &CancellationToken,
) -> Result<ProcessResult, ExecutorError> {
    if spec.program.trim().is_empty() {
        return Err(ExecutorError::EmptyCommand);
    }

    let mut child = build_command(spec)
        .spawn()
        .map_err(|e| ExecutorError::SpawnFailed(spec.program.clone(), e))?;
    log::debug!("Spawned '{}' (PID: {:?}).", spec.program, child.id());

    let buffer = Arc::new(Mutex::new(OutputBuffer::new(spec.max_output_bytes)));
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Arc::clone(&buffer)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Arc::clone(&buffer)));
    }

    let outcome = supervise(&mut child, spec, token).await;

    for mut reader in readers {
        if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
            log::warn!("Output of '{}' still open after exit; closing it.", spec.program);
            reader.abort();
        }
    }

    let outcome = outcome?;
    let buffer = match Arc::try_unwrap(buffer) {
        Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
        Err(shared) => {
            let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, OutputBuffer::new(spec.max_output_bytes))
        }
    };
    let (output, truncated) = buffer.into_text();
    Ok(ProcessResult {
        outcome,
        output,
        truncated,
    })
}

enum Wake {
    Exited(std::io::Result<ExitStatus>),
    Deadline,
    Tick,
}

async fn supervise(
    child: &mut Child,
    spec: &ProcessSpec,
    token: &CancellationToken,
) -> Result<Outcome, ExecutorError> {
    // A timeout too large to represent never fires.
    let deadline = Instant::now().checked_add(spec.timeout);
    let mut poll = tokio::time::interval(CANCEL_POLL_INTERVAL);

    loop {
        let wake = tokio::select! {
            status = child.wait() => Wake::Exited(status),
            _ = deadline_elapsed(deadline) => Wake::Deadline,
            _ = poll.tick() => Wake::Tick,
        };
        match wake {
            Wake::Exited(status) => {
                let status = status.map_err(|e| ExecutorError::Wait(spec.program.clone(), e))?;
                return Ok(Outcome::Exited(exit_code(status)));
            }
            Wake::Deadline => {
                log::debug!("'{}' exceeded its timeout of {:?}.", spec.program, spec.timeout);
                terminate(child).await;
                return Ok(Outcome::TimedOut);
            }
            Wake::Tick => {
                if token.load(Ordering::SeqCst) {
                    log::debug!("Cancellation requested, stopping '{}'.", spec.program);
                    terminate(child).await;
                    return Ok(Outcome::Cancelled);
                }
            }
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn exit_code(status: ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(128 + signal);
        }
    }
    status.code()
}

/// Stops the child's whole process group: SIGTERM, a grace period, then SIGKILL.
#[cfg(unix)]
async fn terminate(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pgid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        // Already reaped.
        return;
    };
    let group = Pid::from_raw(pgid);

    if let Err(e) = killpg(group, Signal::SIGTERM) {
        log::warn!("Failed to send SIGTERM to process group {}: {}", pgid, e);
    }
    if tokio::time::timeout(TERMINATION_GRACE, child.wait()).await.is_ok() {
        // The leader is gone; make sure nothing it started lingers.
        let _ = killpg(group, Signal::SIGKILL);
        return;
    }
    log::warn!("Process group {} ignored SIGTERM, sending SIGKILL.", pgid);
    if let Err(e) = killpg(group, Signal::SIGKILL) {
        log::warn!("Failed to send SIGKILL to process group {}: {}", pgid, e);
        let _ = child.start_kill();
    }
    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        log::warn!("Failed to kill child process: {}", e);
    }
    let _ = child.wait().await;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    fn sh(script: &str, cwd: &std::path::Path) -> ProcessSpec {
        ProcessSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: cwd.to_path_buf(),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(10),
            max_output_bytes: 1024,
        }
    }

    fn token() -> CancellationToken {
        Arc::new(AtomicBool::new(false))
    }

    #[tokio::test]
    async fn test_captures_both_streams_and_exit_code() {
        let tmp = TempDir::new().unwrap();
        let result = run_supervised(&sh("echo out; echo err >&2; exit 3", tmp.path()), &token())
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Exited(Some(3)));
        assert!(result.output.contains("out\n"));
        assert!(result.output.contains("err\n"));
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_runs_in_cwd_with_extra_env() {
        let tmp = TempDir::new().unwrap();
        let mut spec = sh("pwd; echo \"$GREETING\"", tmp.path());
        spec.env.insert("GREETING".to_string(), "hola".to_string());
        let result = run_supervised(&spec, &token()).await.unwrap();

        let cwd = dunce::canonicalize(tmp.path()).unwrap();
        assert!(result.output.contains(&cwd.display().to_string()));
        assert!(result.output.contains("hola"));
    }

    #[tokio::test]
    async fn test_timeout_stops_the_process() {
        let tmp = TempDir::new().unwrap();
        let mut spec = sh("echo begin; sleep 30", tmp.path());
        spec.timeout = Duration::from_millis(300);

        let started = std::time::Instant::now();
        let result = run_supervised(&spec, &token()).await.unwrap();
        assert_eq!(result.outcome, Outcome::TimedOut);
        assert!(result.output.contains("begin"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_sigterm_is_escalated_to_sigkill() {
        let tmp = TempDir::new().unwrap();
        let mut spec = sh("trap '' TERM; sleep 30", tmp.path());
        spec.timeout = Duration::from_millis(200);

        let started = std::time::Instant::now();
        let result = run_supervised(&spec, &token()).await.unwrap();
        assert_eq!(result.outcome, Outcome::TimedOut);
        assert!(started.elapsed() >= TERMINATION_GRACE);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation_token_stops_the_process() {
        let tmp = TempDir::new().unwrap();
        let cancel = token();
        let setter = Arc::clone(&cancel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            setter.store(true, Ordering::SeqCst);
        });

        let result = run_supervised(&sh("sleep 30", tmp.path()), &cancel).await.unwrap();
        assert_eq!(result.outcome, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn test_output_keeps_most_recent_bytes() {
        let tmp = TempDir::new().unwrap();
        let mut spec = sh("i=0; while [ $i -lt 200 ]; do echo line$i; i=$((i+1)); done", tmp.path());
        spec.max_output_bytes = 64;

        let result = run_supervised(&spec, &token()).await.unwrap();
        assert!(result.truncated);
        assert!(result.output.len() <= 64);
        assert!(result.output.ends_with("line199\n"));
        assert!(!result.output.contains("line0\n"));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_failure() {
        let tmp = TempDir::new().unwrap();
        let spec = ProcessSpec {
            program: "definitely-not-a-real-interpreter-42".to_string(),
            ..sh("", tmp.path())
        };
        assert!(matches!(
            run_supervised(&spec, &token()).await,
            Err(ExecutorError::SpawnFailed(..))
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_names_only_the_program() {
        let tmp = TempDir::new().unwrap();
        let spec = ProcessSpec {
            program: "definitely-not-a-real-interpreter-42".to_string(),
            args: vec!["script.sh".to_string(), "hunter2-password".to_string()],
            ..sh("", tmp.path())
        };
        let err = run_supervised(&spec, &token()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("definitely-not-a-real-interpreter-42"));
        assert!(!message.contains("hunter2-password"));
        assert!(!format!("{:?}", err).contains("hunter2-password"));
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_never_fires() {
        let tmp = TempDir::new().unwrap();
        let mut spec = sh("echo done", tmp.path());
        spec.timeout = Duration::MAX;

        let result = run_supervised(&spec, &token()).await.unwrap();
        assert_eq!(result.outcome, Outcome::Exited(Some(0)));
        assert!(result.output.contains("done"));
    }

    #[test]
    fn test_output_buffer_skips_split_characters() {
        let mut buffer = OutputBuffer::new(3);
        buffer.push("añb".as_bytes());
        buffer.push(b"c");
        let (text, truncated) = buffer.into_text();
        assert!(truncated);
        assert_eq!(text, "bc");
    }
}
