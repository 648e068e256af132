//! Command execution HTTP handlers

use std::collections::HashMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use super::workspace::resolve_workspace;
use super::ApiResponse;
use crate::domain::types::{ExecMode, ExecutionRequest, ExecutionResult, OutputLimits, StreamChunk};
use crate::{AppState, Error, Result};

/// Command execution request
#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    /// Relative paths resolve against the workspace
    pub cwd: Option<String>,
    pub timeout_ms: Option<u64>,
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub run_in_background: bool,
    pub max_lines: Option<usize>,
    pub max_bytes: Option<usize>,
}

/// Command execution result
#[derive(Debug, Serialize)]
pub struct ExecResponse {
    pub output: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub timed_out: bool,
    pub truncated: bool,
    pub duration_ms: u64,
}

impl From<ExecutionResult> for ExecResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            output: result.output,
            exit_code: result.exit_code,
            output_file: result.output_file.map(|p| p.display().to_string()),
            pid: result.pid,
            timed_out: result.timed_out,
            truncated: result.truncated,
            duration_ms: result.duration_ms,
        }
    }
}

/// Run a command and wait for it (or start it in the background)
pub async fn exec_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ExecRequest>,
) -> Result<Json<ApiResponse<ExecResponse>>> {
    let request = build_request(&state, &headers, req, ExecMode::Blocking).await?;
    info!("Executing command in {}: {}", request.cwd.display(), request.command);

    let result = state.process_service.execute(&request, None).await?;
    Ok(ApiResponse::ok(result.into()))
}

/// Run a command, streaming its output as server-sent events.
///
/// Every frame is `data: {"event": ..., "data": ...}`: any number of `chunk`
/// events followed by exactly one `done` or `error`.
pub async fn exec_command_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ExecRequest>,
) -> Result<impl IntoResponse> {
    let request = build_request(&state, &headers, req, ExecMode::Streaming).await?;
    info!("Streaming command in {}: {}", request.cwd.display(), request.command);

    let (tx, rx) = mpsc::channel::<Event>(64);
    tokio::spawn(stream_execution(state, request, tx));

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    ))
}

async fn stream_execution(state: AppState, request: ExecutionRequest, tx: mpsc::Sender<Event>) {
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<StreamChunk>(64);

    let forward = {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                let event = stream_event(
                    "chunk",
                    json!({ "data": chunk.text(), "source": chunk.source }),
                );
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        })
    };

    let result = tokio::select! {
        result = state.process_service.execute(&request, Some(Arc::new(chunk_tx))) => result,
        _ = tx.closed() => {
            // Dropping the run kills its process group
            debug!("Stream client disconnected, abandoning command");
            return;
        }
    };
    let _ = forward.await;

    let event = match result {
        Ok(result) => stream_event("done", json!(ExecResponse::from(result))),
        Err(e) => stream_event("error", json!({ "message": e.to_string() })),
    };
    let _ = tx.send(event).await;
}

fn stream_event(event: &str, data: serde_json::Value) -> Event {
    Event::default().data(json!({ "event": event, "data": data }).to_string())
}

async fn build_request(
    state: &AppState,
    headers: &HeaderMap,
    req: ExecRequest,
    mode: ExecMode,
) -> Result<ExecutionRequest> {
    if req.command.trim().is_empty() {
        return Err(Error::InvalidParameter("command is required".to_string()));
    }

    let config = &state.config;
    let workspace = resolve_workspace(headers, config).await?;
    let cwd = match req.cwd.filter(|cwd| !cwd.is_empty()) {
        Some(cwd) => workspace.join(PathBuf::from(cwd)),
        None => workspace,
    };

    let mode = if req.run_in_background {
        ExecMode::Detached
    } else {
        mode
    };
    let requested = req.timeout_ms.filter(|ms| *ms > 0).map(std::time::Duration::from_millis);
    let timeout = match (mode, requested) {
        (ExecMode::Detached, Some(timeout)) => timeout,
        (ExecMode::Detached, None) => config.background_timeout(),
        (_, Some(timeout)) => timeout.min(config.max_timeout()),
        (_, None) => config.default_timeout(),
    };

    let limits = OutputLimits::new(
        req.max_lines.unwrap_or(config.output_max_lines),
        req.max_bytes.unwrap_or(config.output_max_bytes),
    );

    Ok(ExecutionRequest::new(req.command, cwd)
        .with_env(req.env.unwrap_or_default())
        .with_timeout(timeout)
        .with_mode(mode)
        .with_limits(limits))
}
