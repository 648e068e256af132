//! MCP (Model Context Protocol) API layer
//!
//! Exposes command execution to AI assistants as a single `Bash` tool.

mod handler;
mod types;

pub use handler::SandboxMcpHandler;

use rmcp::transport::stdio;
use rmcp::ServiceExt;
use tracing::info;

use crate::AppState;

/// Start MCP server in stdio mode
///
/// This runs the MCP server using stdin/stdout for communication,
/// suitable for local CLI usage with AI assistants.
pub async fn serve_stdio(state: AppState) -> anyhow::Result<()> {
    info!("Starting MCP server in stdio mode");

    let handler = SandboxMcpHandler::new(state);
    let service = handler.serve(stdio()).await?;

    info!("MCP server ready, waiting for requests...");
    service.waiting().await?;

    info!("MCP server shutdown");
    Ok(())
}
