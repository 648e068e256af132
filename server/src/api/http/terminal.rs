//! Terminal WebSocket handler
//!
//! Client frames are `{"type": "input" | "resize" | "ping", "data": ...}`.
//! Server frames are `{"type": "output", "data": text}`, `{"type": "pong"}`
//! or `{"type": "error", "data": message}`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::workspace::resolve_workspace;
use crate::domain::types::TerminalSize;
use crate::service::pty::{TerminalOptions, TerminalSession};
use crate::{AppState, Result};

const READ_BUFFER_SIZE: usize = 4096;

/// Optional terminal parameters
#[derive(Debug, Default, Deserialize)]
pub struct TerminalQuery {
    pub shell: Option<String>,
    pub rows: Option<u16>,
    pub cols: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ServerMessage {
    Output(String),
    Pong,
    Error(String),
}

/// Upgrade to a WebSocket bound to a fresh shell in the caller's workspace
pub async fn terminal_websocket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TerminalQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let workdir = resolve_workspace(&headers, &state.config).await?;
    Ok(ws.on_upgrade(move |socket| handle_terminal_socket(socket, state, workdir, query)))
}

async fn handle_terminal_socket(
    socket: WebSocket,
    state: AppState,
    workdir: PathBuf,
    query: TerminalQuery,
) {
    let (mut sender, mut receiver) = socket.split();

    let defaults = TerminalSize::default();
    let options = TerminalOptions {
        shell: query
            .shell
            .unwrap_or_else(|| state.config.terminal_shell.clone()),
        workdir,
        env: HashMap::new(),
        size: TerminalSize {
            rows: query.rows.unwrap_or(defaults.rows),
            cols: query.cols.unwrap_or(defaults.cols),
        },
    };

    let registry = state.terminals.clone();
    let opened = tokio::task::spawn_blocking(move || registry.open(options)).await;
    let session = match opened {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            error!("Failed to open terminal: {}", e);
            let frame = encode(&ServerMessage::Error(e.to_string()));
            let _ = sender.send(Message::Text(frame.into())).await;
            let _ = sender.close().await;
            return;
        }
        Err(e) => {
            error!("Terminal open task failed: {}", e);
            let _ = sender.close().await;
            return;
        }
    };
    info!("Terminal {} attached", session.id());

    // Single writer to the socket; both the pump and the inbound loop feed it
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(64);
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let frame = encode(&message);
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut pump = {
        let session = session.clone();
        let out_tx = out_tx.clone();
        tokio::task::spawn_blocking(move || pump_output(&session, &out_tx))
    };

    let idle = state.config.terminal_idle_timeout();
    let mut pump_done = false;
    loop {
        let message = tokio::select! {
            _ = &mut pump, if !pump_done => {
                pump_done = true;
                debug!("Terminal {} output ended", session.id());
                break;
            }
            next = tokio::time::timeout(idle, receiver.next()) => match next {
                Err(_) => {
                    info!("Terminal {} idle for {:?}, closing", session.id(), idle);
                    break;
                }
                Ok(None) | Ok(Some(Err(_))) => break,
                Ok(Some(Ok(message))) => message,
            },
        };

        let text = match message {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };

        let Ok(client) = serde_json::from_str::<ClientMessage>(&text) else {
            let _ = out_tx
                .send(ServerMessage::Error("invalid message format".to_string()))
                .await;
            continue;
        };

        match client.kind.as_str() {
            "input" => {
                let Some(input) = client.data.as_str() else {
                    let _ = out_tx
                        .send(ServerMessage::Error("invalid message format".to_string()))
                        .await;
                    continue;
                };
                if !write_input(&session, input.as_bytes().to_vec()).await {
                    break;
                }
            }
            "resize" => match serde_json::from_value::<TerminalSize>(client.data) {
                Ok(size) => {
                    if let Err(e) = session.resize(size) {
                        warn!("Failed to resize terminal {}: {}", session.id(), e);
                    }
                }
                Err(_) => {
                    let _ = out_tx
                        .send(ServerMessage::Error("invalid message format".to_string()))
                        .await;
                }
            },
            "ping" => {
                let _ = out_tx.send(ServerMessage::Pong).await;
            }
            _ => {
                let _ = out_tx
                    .send(ServerMessage::Error("unknown message type".to_string()))
                    .await;
            }
        }
    }

    if let Err(e) = session.close() {
        warn!("Failed to close terminal {}: {}", session.id(), e);
    }
    let waiter = session.clone();
    match tokio::task::spawn_blocking(move || waiter.wait()).await {
        Ok(Ok(code)) => info!("Terminal {} shell exited with {}", session.id(), code),
        Ok(Err(e)) => warn!("Failed to wait for terminal {}: {}", session.id(), e),
        Err(e) => warn!("Terminal {} wait task failed: {}", session.id(), e),
    }
    if !pump_done {
        let _ = pump.await;
    }

    // Let queued frames reach the client before the socket closes
    drop(out_tx);
    let _ = writer.await;

    state.terminals.remove(session.id());
    info!("Terminal {} detached", session.id());
}

/// Returns false when the loop should stop
async fn write_input(session: &Arc<TerminalSession>, bytes: Vec<u8>) -> bool {
    let session = session.clone();
    match tokio::task::spawn_blocking(move || session.write(&bytes)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) if e.is_closed() => false,
        Ok(Err(e)) => {
            warn!("Failed to write terminal input: {}", e);
            false
        }
        Err(e) => {
            warn!("Terminal write task failed: {}", e);
            false
        }
    }
}

/// Forward PTY output until the shell goes away. Runs on a blocking thread.
fn pump_output(session: &TerminalSession, out_tx: &mpsc::Sender<ServerMessage>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut decoder = Utf8Decoder::default();
    loop {
        match session.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if text.is_empty() {
                    continue;
                }
                if out_tx.blocking_send(ServerMessage::Output(text)).is_err() {
                    break;
                }
            }
            Err(e) if e.is_closed() => break,
            Err(e) => {
                debug!("Terminal {} read failed: {}", session.id(), e);
                break;
            }
        }
    }
}

fn encode(message: &ServerMessage) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| {
        format!(r#"{{"type":"error","data":"failed to encode frame: {}"}}"#, e)
    })
}

/// Turns a byte stream into text without splitting multi-byte characters
/// across frames. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, input: &[u8]) -> String {
        self.pending.extend_from_slice(input);
        let mut text = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&self.pending[..valid_up_to]) {
                        text.push_str(valid);
                    }
                    match e.error_len() {
                        // Incomplete trailing sequence, wait for more bytes
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + len);
                        }
                    }
                }
            }
        }

        text
    }
}
