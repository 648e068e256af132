//! Server configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Prefix of every environment variable the server reads
pub const ENV_PREFIX: &str = "SANDBOX";

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server host
    #[serde(default = "default_http_host")]
    pub http_host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Base directory commands run in; per-session workspaces live below it
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    /// Deadline for blocking runs without an explicit timeout
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Upper bound for caller-supplied blocking timeouts
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,

    /// Deadline for background runs without an explicit timeout
    #[serde(default = "default_background_timeout_ms")]
    pub background_timeout_ms: u64,

    /// Deadline for MCP tool calls without an explicit timeout
    #[serde(default = "default_mcp_timeout_ms")]
    pub mcp_timeout_ms: u64,

    /// Upper bound for MCP tool call timeouts
    #[serde(default = "default_mcp_max_timeout_ms")]
    pub mcp_max_timeout_ms: u64,

    /// Line budget for returned output
    #[serde(default = "default_output_max_lines")]
    pub output_max_lines: usize,

    /// Byte budget for returned output
    #[serde(default = "default_output_max_bytes")]
    pub output_max_bytes: usize,

    /// Character cap on MCP tool replies
    #[serde(default = "default_mcp_output_max_chars")]
    pub mcp_output_max_chars: usize,

    /// Shell for interactive terminals
    #[serde(default = "default_terminal_shell")]
    pub terminal_shell: String,

    /// Maximum concurrently open terminals
    #[serde(default = "default_max_terminals")]
    pub max_terminals: usize,

    /// A terminal socket with no inbound frame for this long is closed
    #[serde(default = "default_terminal_idle_timeout_secs")]
    pub terminal_idle_timeout_secs: u64,

    /// MCP server mode: "disabled" or "stdio"
    #[serde(default = "default_mcp_mode")]
    pub mcp_mode: String,

    /// Log output format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_workspace_dir() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/home/sandbox/workspace"))
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_timeout_ms() -> u64 {
    600_000 // 10 minutes
}

fn default_background_timeout_ms() -> u64 {
    600_000
}

fn default_mcp_timeout_ms() -> u64 {
    30_000
}

fn default_mcp_max_timeout_ms() -> u64 {
    60_000
}

fn default_output_max_lines() -> usize {
    2000
}

fn default_output_max_bytes() -> usize {
    50 * 1024
}

fn default_mcp_output_max_chars() -> usize {
    30_000
}

fn default_terminal_shell() -> String {
    "/bin/bash".to_string()
}

fn default_max_terminals() -> usize {
    16
}

fn default_terminal_idle_timeout_secs() -> u64 {
    60
}

fn default_mcp_mode() -> String {
    "disabled".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from `SANDBOX_*` environment variables
    pub fn load() -> anyhow::Result<Self> {
        Self::from_env(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_env(source: config::Environment) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(source.try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }

    pub fn background_timeout(&self) -> Duration {
        Duration::from_millis(self.background_timeout_ms)
    }

    pub fn mcp_timeout(&self) -> Duration {
        Duration::from_millis(self.mcp_timeout_ms)
    }

    pub fn mcp_max_timeout(&self) -> Duration {
        Duration::from_millis(self.mcp_max_timeout_ms)
    }

    pub fn terminal_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.terminal_idle_timeout_secs)
    }

    pub fn is_stdio_mcp(&self) -> bool {
        self.mcp_mode == "stdio"
    }

    pub fn is_json_log(&self) -> bool {
        self.log_format == "json"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            workspace_dir: default_workspace_dir(),
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            background_timeout_ms: default_background_timeout_ms(),
            mcp_timeout_ms: default_mcp_timeout_ms(),
            mcp_max_timeout_ms: default_mcp_max_timeout_ms(),
            output_max_lines: default_output_max_lines(),
            output_max_bytes: default_output_max_bytes(),
            mcp_output_max_chars: default_mcp_output_max_chars(),
            terminal_shell: default_terminal_shell(),
            max_terminals: default_max_terminals(),
            terminal_idle_timeout_secs: default_terminal_idle_timeout_secs(),
            mcp_mode: default_mcp_mode(),
            log_format: default_log_format(),
        }
    }
}
