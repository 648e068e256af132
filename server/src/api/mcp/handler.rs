//! MCP Server Handler implementation
//!
//! One tool, `Bash`, backed by the process service. Blocking calls return
//! bounded output; background calls return the log file to read later.

use std::time::Duration;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use tracing::{error, info};

use super::types::BashParams;
use crate::domain::types::{ExecMode, ExecutionRequest, OutputLimits};
use crate::AppState;

const TRUNCATED_SUFFIX: &str = "\n... (output truncated)";

/// MCP Handler for sandbox command execution
#[derive(Clone)]
pub struct SandboxMcpHandler {
    state: AppState,
    tool_router: ToolRouter<Self>,
}

impl SandboxMcpHandler {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    fn request(&self, params: &BashParams) -> ExecutionRequest {
        let config = &self.state.config;
        let requested = params
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        let background = params.run_in_background.unwrap_or(false);

        let request = ExecutionRequest::new(params.command.clone(), config.workspace_dir.clone());
        if background {
            request
                .with_mode(ExecMode::Detached)
                .with_timeout(requested.unwrap_or_else(|| config.background_timeout()))
        } else {
            let timeout = requested
                .unwrap_or_else(|| config.mcp_timeout())
                .min(config.mcp_max_timeout());
            request.with_timeout(timeout).with_limits(OutputLimits::new(
                config.output_max_lines,
                config.output_max_bytes,
            ))
        }
    }
}

#[tool_router]
impl SandboxMcpHandler {
    #[tool(
        name = "Bash",
        description = "Executes a given bash command with optional timeout. \
        Working directory persists between commands; shell state (everything else) does not.\n\n\
        IMPORTANT: This tool is for terminal operations like git, npm, docker, etc. Do not use it \
        for file operations (reading, writing, editing, searching, finding files).\n\n\
        Usage notes:\n\
          - The command argument is required.\n\
          - You can specify an optional timeout in milliseconds. Blocking commands time out after \
        30000ms by default and at most 60000ms.\n\
          - Always quote file paths that contain spaces with double quotes.\n\
          - If the output exceeds 30000 characters, output will be truncated before being returned to you.\n\
          - Set run_in_background to true to run the command in background. Output will be written \
        to a file and you can use Read tool to view it later."
    )]
    async fn bash(
        &self,
        Parameters(params): Parameters<BashParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.command.trim().is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(
                "Error: command is required",
            )]));
        }
        info!(
            "MCP: Bash ({}): {}",
            params.description.as_deref().unwrap_or("no description"),
            params.command
        );

        let request = self.request(&params);
        let result = match self.state.process_service.execute(&request, None).await {
            Ok(result) => result,
            Err(e) => {
                error!("MCP: Bash failed: {}", e);
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Error: {}",
                    e
                ))]));
            }
        };

        if request.mode == ExecMode::Detached {
            let output_file = result
                .output_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            let text = format!(
                "{}\n\nOutput file: {}\nUse Read tool to view the output.",
                result.output, output_file
            );
            return Ok(CallToolResult::success(vec![Content::text(text)]));
        }

        let output = cap_chars(result.output, self.state.config.mcp_output_max_chars);
        if result.exit_code != 0 || result.timed_out {
            Ok(CallToolResult::error(vec![Content::text(output)]))
        } else {
            Ok(CallToolResult::success(vec![Content::text(output)]))
        }
    }
}

#[tool_handler]
impl ServerHandler for SandboxMcpHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Elevo Sandbox - Run shell commands in the sandbox workspace. \
                Use Bash to execute commands; set run_in_background for long-running processes."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Keep at most `max_chars` characters, marking the cut
fn cap_chars(mut output: String, max_chars: usize) -> String {
    if let Some((cut, _)) = output.char_indices().nth(max_chars) {
        output.truncate(cut);
        output.push_str(TRUNCATED_SUFFIX);
    }
    output
}
