//! Elevo Sandbox Execution Server
//!
//! Runs shell commands and interactive terminals on behalf of automated
//! agents, exposed over HTTP, server-sent events, WebSocket and MCP.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod service;

use std::sync::Arc;

pub use config::Config;
pub use error::{Error, Result};

use infra::terminal_registry::TerminalRegistry;
use service::process::ProcessService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub process_service: Arc<ProcessService>,
    pub terminals: Arc<TerminalRegistry>,
}

impl AppState {
    /// Build the services from configuration
    pub fn new(config: Config) -> Self {
        let process_service = ProcessService::new(config.default_timeout())
            .with_span(tracing::info_span!("process"));
        let terminals = TerminalRegistry::new(config.max_terminals);

        Self {
            config: Arc::new(config),
            process_service: Arc::new(process_service),
            terminals: Arc::new(terminals),
        }
    }
}
