//! Elevo Sandbox Server
//!
//! Serves the HTTP API (command execution, SSE streaming, WebSocket
//! terminals), or the MCP tool server over stdio when `SANDBOX_MCP_MODE=stdio`.

use std::net::SocketAddr;

use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sandbox_server::{api, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first to check MCP mode
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    init_tracing(&config);

    let http_addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port).parse()?;
    tokio::fs::create_dir_all(&config.workspace_dir).await?;
    info!("Workspace directory: {}", config.workspace_dir.display());

    let stdio_mcp = config.is_stdio_mcp();
    let state = AppState::new(config);

    // MCP stdio mode runs exclusively
    if stdio_mcp {
        info!("Running in MCP stdio mode");
        let result = api::mcp::serve_stdio(state.clone()).await;
        state.terminals.close_all();
        return result;
    }

    info!("Starting Sandbox Server");
    info!("HTTP listening on {}", http_addr);

    let app = api::http::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.terminals.close_all();
    info!("Server shutdown complete");
    Ok(())
}

/// Logs go to stderr in stdio mode so they never corrupt the MCP stream
fn init_tracing(config: &Config) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    match (config.is_json_log(), config.is_stdio_mcp()) {
        (true, true) => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init(),
        (true, false) => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
        (false, true) => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init(),
        (false, false) => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
