//! MCP Tool Parameter Types

use rmcp::schemars;
use serde::Deserialize;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct BashParams {
    /// The command to execute
    #[schemars(description = "The command to execute")]
    pub command: String,

    /// Timeout in milliseconds
    #[schemars(description = "Optional timeout in milliseconds (max 60000 unless run_in_background)")]
    pub timeout_ms: Option<u64>,

    /// Run without waiting, writing output to a log file
    #[schemars(
        description = "Set to true for dev servers and other long-running processes. \
        The command returns immediately and its output is written to a file that can be \
        viewed later with the Read tool."
    )]
    pub run_in_background: Option<bool>,

    /// What the command does, in a few words
    #[schemars(
        description = "Clear, concise description of what this command does in active voice, \
        e.g. \"List files in current directory\""
    )]
    pub description: Option<String>,
}
