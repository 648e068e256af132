//! Integration test helpers
//!
//! Boots the sandbox HTTP router in-process on an ephemeral port, with a
//! throwaway workspace directory.

use std::path::Path;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sandbox_server::{api::http::create_router, AppState, Config};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type TerminalSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running server plus a client pointed at it
pub struct TestServer {
    pub client: reqwest::Client,
    pub workspace: TempDir,
    addr: std::net::SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with a tweaked configuration
    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let workspace = TempDir::new().expect("Failed to create workspace");
        let mut config = Config {
            http_host: "127.0.0.1".to_string(),
            http_port: 0,
            workspace_dir: workspace.path().to_path_buf(),
            ..Config::default()
        };
        configure(&mut config);

        let app = create_router(AppState::new(config));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Failed to read local addr");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            workspace,
            addr,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    /// POST a command to the blocking endpoint
    pub async fn exec(&self, request: &ExecRequest) -> reqwest::Response {
        self.client
            .post(self.url("/v1/bash/exec"))
            .json(request)
            .send()
            .await
            .expect("Failed to send exec request")
    }

    /// POST a command to the streaming endpoint and collect every event
    pub async fn exec_stream(&self, request: &ExecRequest) -> Vec<StreamEvent> {
        let response = self
            .client
            .post(self.url("/v1/bash/exec/stream"))
            .json(request)
            .send()
            .await
            .expect("Failed to send stream request");
        assert!(
            response.status().is_success(),
            "Stream request failed: {}",
            response.status()
        );

        let body = response.text().await.expect("Failed to read stream body");
        parse_sse(&body)
    }

    pub async fn open_terminal(&self, query: &str) -> TerminalSocket {
        let (socket, _) = connect_async(self.ws_url(&format!("/v1/terminal/ws{}", query)))
            .await
            .expect("Failed to connect terminal socket");
        socket
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Extract the JSON payloads of `data:` lines
pub fn parse_sse(body: &str) -> Vec<StreamEvent> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .map(|data| serde_json::from_str(data).expect("Malformed SSE payload"))
        .collect()
}

/// Send one JSON frame
pub async fn send_frame(socket: &mut TerminalSocket, frame: serde_json::Value) {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("Failed to send frame");
}

/// Send a text frame verbatim
pub async fn send_raw(socket: &mut TerminalSocket, text: &str) {
    socket
        .send(Message::Text(text.to_string().into()))
        .await
        .expect("Failed to send frame");
}

/// Next JSON frame from the server, or `None` on close or timeout
pub async fn next_frame(socket: &mut TerminalSocket, timeout: Duration) -> Option<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let message = tokio::time::timeout_at(deadline, socket.next()).await.ok()??.ok()?;
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Read frames until one of type `kind` satisfies `pred`
pub async fn wait_for_frame(
    socket: &mut TerminalSocket,
    kind: &str,
    timeout: Duration,
    pred: impl Fn(&serde_json::Value) -> bool,
) -> Option<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let frame = next_frame(socket, remaining).await?;
        if frame["type"] == kind && pred(&frame) {
            return Some(frame);
        }
    }
}

/// Read output frames until their concatenation contains `needle`
pub async fn wait_for_output(socket: &mut TerminalSocket, needle: &str, timeout: Duration) -> String {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut output = String::new();
    while !output.contains(needle) {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Some(frame) = next_frame(socket, remaining).await else {
            break;
        };
        if frame["type"] == "output" {
            output.push_str(frame["data"].as_str().unwrap_or_default());
        }
    }
    output
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ExecRequest {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<std::collections::HashMap<String, String>>,
    pub run_in_background: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<usize>,
}

impl ExecRequest {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u32,
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecResult {
    pub output: String,
    pub exit_code: i32,
    pub output_file: Option<String>,
    pub pid: Option<u32>,
    pub timed_out: bool,
    pub truncated: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct StreamEvent {
    pub event: String,
    pub data: serde_json::Value,
}
