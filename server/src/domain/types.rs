//! Common domain types

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a command's output is delivered to the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Wait for completion, return everything at once
    #[default]
    Blocking,
    /// Push lines to a sink as they arrive, then return the full result
    Streaming,
    /// Return immediately, persist output to a log file
    Detached,
}

/// Output bounding policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLimits {
    pub max_lines: usize,
    pub max_bytes: usize,
}

impl OutputLimits {
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            max_lines,
            max_bytes,
        }
    }

    /// A policy with a zero bound disables truncation
    pub fn is_enabled(&self) -> bool {
        self.max_lines > 0 && self.max_bytes > 0
    }
}

/// A single command execution request
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Shell command text, handed to the interpreter as-is
    pub command: String,
    /// Working directory, must exist
    pub cwd: PathBuf,
    /// Extra environment variables merged over the server's environment
    pub env: HashMap<String, String>,
    /// `None` uses the runner default, `Some(Duration::ZERO)` disables the deadline
    pub timeout: Option<Duration>,
    pub mode: ExecMode,
    pub limits: Option<OutputLimits>,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            env: HashMap::new(),
            timeout: None,
            mode: ExecMode::default(),
            limits: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_limits(mut self, limits: OutputLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// stdout followed by stderr, bounded and annotated
    pub output: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Which pipe a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkSource {
    Stdout,
    Stderr,
}

/// One line of output delivered while streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub data: Vec<u8>,
    pub source: ChunkSource,
}

impl StreamChunk {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// Terminal window size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}
