//! Process service
//!
//! Runs shell commands under a deadline and delivers their output in one of
//! three modes: blocking, streaming to a [`ChunkSink`], or detached into a log
//! file under the working directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::domain::types::{
    ChunkSource, ExecMode, ExecutionRequest, ExecutionResult, OutputLimits, StreamChunk,
};
use crate::error::{Error, Result};
use crate::infra::process_group::{RunState, RunningProcess, EXIT_CODE_TIMEOUT, EXIT_CODE_UNKNOWN};
use crate::infra::task::spawn_supervised;
use crate::service::truncate::{format_metadata, truncate_output};

/// Deadline applied when a request does not carry its own
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Interpreter every command is handed to
pub const DEFAULT_SHELL: &str = "bash";

/// Where detached runs write their output, relative to the working directory
pub const BACKGROUND_OUTPUT_DIR: &str = ".logs/background_outputs";

/// How long readers may keep draining after the group was killed
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Receives output lines while a streaming run is in progress.
///
/// Chunks of one stream arrive in order. Delivery awaits the sink, so a slow
/// sink slows the reader down instead of buffering without bound.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn on_chunk(&self, chunk: StreamChunk);
}

#[async_trait]
impl ChunkSink for mpsc::Sender<StreamChunk> {
    async fn on_chunk(&self, chunk: StreamChunk) {
        // The receiver hung up; the run still completes and returns its buffers
        let _ = self.send(chunk).await;
    }
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Process service for executing commands
#[derive(Clone)]
pub struct ProcessService {
    shell: String,
    default_timeout: Duration,
    span: Span,
}

impl ProcessService {
    /// Create a new process service. A zero `default_timeout` means no deadline.
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            default_timeout,
            span: tracing::info_span!("process"),
        }
    }

    /// Emit this service's logs under `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Dispatch on the request's mode. Streaming without a sink degrades to blocking.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        sink: Option<Arc<dyn ChunkSink>>,
    ) -> Result<ExecutionResult> {
        match (request.mode, sink) {
            (ExecMode::Detached, _) => self.run_detached(request).await,
            (ExecMode::Streaming, Some(sink)) => self.run_streaming(request, sink).await,
            _ => self.run(request).await,
        }
    }

    /// Run a command and wait for completion
    pub async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        self.run_captured(request, None)
            .instrument(self.span.clone())
            .await
    }

    /// Run a command, forwarding each output line to `sink` as it is read
    pub async fn run_streaming(
        &self,
        request: &ExecutionRequest,
        sink: Arc<dyn ChunkSink>,
    ) -> Result<ExecutionResult> {
        self.run_captured(request, Some(sink))
            .instrument(self.span.clone())
            .await
    }

    /// Start a command in the background and return at once.
    ///
    /// Output goes to a fresh log file under [`BACKGROUND_OUTPUT_DIR`]. The
    /// deadline is still enforced by a supervisor task, which logs the final
    /// exit status.
    pub async fn run_detached(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let span = self.span.clone();
        async move {
            validate_cwd(&request.cwd).await?;
            let start = Instant::now();

            let output_dir = request.cwd.join(BACKGROUND_OUTPUT_DIR);
            tokio::fs::create_dir_all(&output_dir)
                .await
                .map_err(|e| Error::OutputDirectory(format!("{}: {}", output_dir.display(), e)))?;
            let (output_file, log) = create_log_file(&output_dir).await?;
            let log_err = log.try_clone()?;

            let mut command = self.shell_command(request);
            command
                .stdin(Stdio::null())
                .stdout(Stdio::from(log))
                .stderr(Stdio::from(log_err));

            let child = match command.spawn() {
                Ok(child) => child,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&output_file).await;
                    return Err(Error::SpawnFailed(e.to_string()));
                }
            };
            let process = RunningProcess::new(child);
            let pid = process.id().unwrap_or_default();
            let timeout = self.effective_timeout(request);

            info!(
                pid,
                output_file = %output_file.display(),
                "Started background command: {}",
                request.command
            );
            spawn_supervised(
                "detached-command",
                Span::current(),
                supervise_detached(process, pid, timeout),
            );

            Ok(ExecutionResult {
                output: format!("Command started in background (PID: {})", pid),
                exit_code: 0,
                duration_ms: start.elapsed().as_millis() as u64,
                output_file: Some(output_file),
                pid: Some(pid),
                ..Default::default()
            })
        }
        .instrument(span)
        .await
    }

    async fn run_captured(
        &self,
        request: &ExecutionRequest,
        sink: Option<Arc<dyn ChunkSink>>,
    ) -> Result<ExecutionResult> {
        validate_cwd(&request.cwd).await?;
        let timeout = self.effective_timeout(request);
        let start = Instant::now();

        let mut command = self.shell_command(request);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = command
            .spawn()
            .map_err(|e| Error::SpawnFailed(e.to_string()))?;
        let mut process = RunningProcess::new(child);
        debug!(pid = ?process.id(), "Running command: {}", request.command);

        let stdout_buf = SharedBuffer::default();
        let stderr_buf = SharedBuffer::default();
        let mut readers = JoinSet::new();
        if let Some(stdout) = process.take_stdout() {
            readers.spawn(read_stream(
                stdout,
                ChunkSource::Stdout,
                stdout_buf.clone(),
                sink.clone(),
            ));
        }
        if let Some(stderr) = process.take_stderr() {
            readers.spawn(read_stream(
                stderr,
                ChunkSource::Stderr,
                stderr_buf.clone(),
                sink,
            ));
        }

        // Both pipes hit EOF before the exit status is read
        let finished = {
            let completion = async {
                while readers.join_next().await.is_some() {}
                process.wait().await.clone()
            };
            match timeout {
                Some(limit) => tokio::time::timeout(limit, completion).await.ok(),
                None => Some(completion.await),
            }
        };

        let state = match finished {
            Some(state) => state,
            None => {
                process.expire().await;
                let drained = tokio::time::timeout(DRAIN_GRACE, async {
                    while readers.join_next().await.is_some() {}
                })
                .await;
                if drained.is_err() {
                    warn!("Output readers still open after kill, abandoning them");
                    readers.abort_all();
                }
                process.state().clone()
            }
        };

        let result = build_result(
            take_string(&stdout_buf),
            take_string(&stderr_buf),
            &state,
            start.elapsed(),
            timeout,
            request.limits,
        );
        info!(
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            truncated = result.truncated,
            duration_ms = result.duration_ms,
            "Command finished"
        );
        Ok(result)
    }

    fn effective_timeout(&self, request: &ExecutionRequest) -> Option<Duration> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        (!timeout.is_zero()).then_some(timeout)
    }

    fn shell_command(&self, request: &ExecutionRequest) -> Command {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&request.command)
            .current_dir(&request.cwd)
            .envs(&request.env);
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

async fn read_stream<R>(
    reader: R,
    source: ChunkSource,
    buffer: SharedBuffer,
    sink: Option<Arc<dyn ChunkSink>>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                append(&buffer, &line);
                if let Some(sink) = &sink {
                    sink.on_chunk(StreamChunk {
                        data: line.clone(),
                        source,
                    })
                    .await;
                }
            }
            Err(e) => {
                append(&buffer, format!("read error: {}\n", e).as_bytes());
                break;
            }
        }
    }
}

fn append(buffer: &SharedBuffer, bytes: &[u8]) {
    match buffer.lock() {
        Ok(mut guard) => guard.extend_from_slice(bytes),
        Err(poisoned) => poisoned.into_inner().extend_from_slice(bytes),
    }
}

fn take_string(buffer: &SharedBuffer) -> String {
    let bytes = match buffer.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Assemble the caller-facing result: combined output, bounding, metadata
fn build_result(
    stdout: String,
    stderr: String,
    state: &RunState,
    elapsed: Duration,
    timeout: Option<Duration>,
    limits: Option<OutputLimits>,
) -> ExecutionResult {
    let mut result = ExecutionResult {
        output: format!("{}{}", stdout, stderr),
        stdout,
        stderr,
        duration_ms: elapsed.as_millis() as u64,
        ..Default::default()
    };
    let mut notes = Vec::new();

    match state {
        RunState::Exited { code } => result.exit_code = *code,
        RunState::TimedOut | RunState::Terminated => {
            result.timed_out = true;
            result.exit_code = EXIT_CODE_TIMEOUT;
            notes.push(format!(
                "command timed out after {:?}",
                timeout.unwrap_or_default()
            ));
        }
        RunState::Failed(e) => {
            result.exit_code = EXIT_CODE_UNKNOWN;
            notes.push(format!("command execution failed: {}", e));
        }
        RunState::Running => {
            result.exit_code = EXIT_CODE_UNKNOWN;
            notes.push("command execution failed: exit status unavailable".to_string());
        }
    }

    if let Some(limits) = limits.filter(OutputLimits::is_enabled) {
        let (bounded, truncated) = truncate_output(&result.output, limits.max_lines, limits.max_bytes);
        if truncated {
            result.output = bounded;
            result.truncated = true;
            notes.push("output was truncated due to size limits".to_string());
        }
    }

    if !notes.is_empty() {
        let metadata = format_metadata(&notes);
        result.output.push('\n');
        result.output.push_str(&metadata);
        result.metadata = Some(metadata);
    }

    result
}

async fn supervise_detached(mut process: RunningProcess, pid: u32, timeout: Option<Duration>) {
    match process.wait_with_deadline(timeout).await {
        RunState::Exited { code } => info!(pid, exit_code = code, "Background command exited"),
        RunState::Terminated | RunState::TimedOut => warn!(
            pid,
            "Background command timed out after {:?}, process group killed",
            timeout.unwrap_or_default()
        ),
        RunState::Failed(e) => error!(pid, "Background command failed: {}", e),
        RunState::Running => {}
    }
}

async fn validate_cwd(cwd: &Path) -> Result<()> {
    match tokio::fs::metadata(cwd).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::InvalidWorkingDirectory(format!(
            "{} is not a directory",
            cwd.display()
        ))),
        Err(e) => Err(Error::InvalidWorkingDirectory(format!(
            "{}: {}",
            cwd.display(),
            e
        ))),
    }
}

/// Create `bg_<unix nanos>.log`, never reusing an existing name
async fn create_log_file(dir: &Path) -> Result<(PathBuf, std::fs::File)> {
    let stamp = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();

    let mut attempt = 0u32;
    loop {
        let name = match attempt {
            0 => format!("bg_{}.log", stamp),
            n => format!("bg_{}_{}.log", stamp, n),
        };
        let path = dir.join(name);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file.into_std().await)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt < 16 => {
                attempt += 1;
            }
            Err(e) => {
                return Err(Error::OutputDirectory(format!("{}: {}", path.display(), e)));
            }
        }
    }
}
