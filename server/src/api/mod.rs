//! API layer
//!
//! Transport adapters over the execution services: HTTP (JSON, SSE and
//! WebSocket) and MCP over stdio.

pub mod http;
pub mod mcp;
