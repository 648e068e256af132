//! Integration tests for the Sandbox Server
//!
//! Each test boots its own server in-process against a temporary workspace.

use integration_tests::*;
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};

// ============================================================================
// Health Tests
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::start().await;

    let response = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .expect("Failed to send health request");

    assert!(
        response.status().is_success(),
        "Health check failed with status: {}",
        response.status()
    );

    let health: HealthResponse = response.json().await.expect("Failed to parse health response");
    assert_eq!(health.status, "healthy");
    assert!(!health.version.is_empty());
}

// ============================================================================
// Exec Tests
// ============================================================================

#[tokio::test]
async fn test_exec_echo() {
    let server = TestServer::start().await;

    let response = server.exec(&ExecRequest::new("echo hello")).await;
    assert!(response.status().is_success());

    let body: ApiResponse<ExecResult> = response.json().await.expect("Failed to parse response");
    assert_eq!(body.code, 0);
    assert_eq!(body.data.exit_code, 0);
    assert_eq!(body.data.output, "hello\n");
    assert!(!body.data.timed_out);
    assert!(!body.data.truncated);
}

#[tokio::test]
async fn test_exec_nonzero_exit_is_not_an_http_error() {
    let server = TestServer::start().await;

    let response = server.exec(&ExecRequest::new("exit 42")).await;
    assert!(response.status().is_success());

    let body: ApiResponse<ExecResult> = response.json().await.unwrap();
    assert_eq!(body.data.exit_code, 42);
}

#[tokio::test]
async fn test_exec_runs_in_workspace_with_env() {
    let server = TestServer::start().await;

    let request = ExecRequest {
        env: Some(HashMap::from([("GREETING".to_string(), "hi there".to_string())])),
        ..ExecRequest::new("echo $GREETING; pwd")
    };
    let body: ApiResponse<ExecResult> = server.exec(&request).await.json().await.unwrap();

    let mut lines = body.data.output.lines();
    assert_eq!(lines.next(), Some("hi there"));
    let pwd = std::path::PathBuf::from(lines.next().unwrap());
    assert_eq!(
        pwd.canonicalize().unwrap(),
        server.workspace_path().canonicalize().unwrap()
    );
}

#[tokio::test]
async fn test_exec_empty_command_rejected() {
    let server = TestServer::start().await;

    let response = server.exec(&ExecRequest::new("   ")).await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let error: ErrorResponse = response.json().await.unwrap();
    assert_ne!(error.code, 0);
    assert!(error.message.contains("command"));
}

#[tokio::test]
async fn test_exec_missing_cwd_rejected() {
    let server = TestServer::start().await;

    let request = ExecRequest {
        cwd: Some("does/not/exist".to_string()),
        ..ExecRequest::new("pwd")
    };
    let response = server.exec(&request).await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_exec_timeout() {
    let server = TestServer::start().await;

    let request = ExecRequest {
        timeout_ms: Some(300),
        ..ExecRequest::new("echo before; sleep 10")
    };
    let start = Instant::now();
    let body: ApiResponse<ExecResult> = server.exec(&request).await.json().await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(body.data.timed_out);
    assert!(body.data.output.starts_with("before\n"));
    assert!(body.data.output.contains("command timed out"));
}

#[tokio::test]
async fn test_exec_timeout_is_clamped() {
    let server = TestServer::start_with(|config| config.max_timeout_ms = 300).await;

    let request = ExecRequest {
        timeout_ms: Some(60_000),
        ..ExecRequest::new("sleep 10")
    };
    let body: ApiResponse<ExecResult> = server.exec(&request).await.json().await.unwrap();
    assert!(body.data.timed_out);
}

#[tokio::test]
async fn test_exec_truncation() {
    let server = TestServer::start().await;

    let request = ExecRequest {
        max_lines: Some(10),
        ..ExecRequest::new("seq 1 1000")
    };
    let body: ApiResponse<ExecResult> = server.exec(&request).await.json().await.unwrap();

    assert!(body.data.truncated);
    assert!(body.data.output.starts_with("1\n2\n3\n"));
    assert!(body.data.output.contains("990 lines"));
    assert!(body.data.output.contains("<bash_metadata>"));
}

#[tokio::test]
async fn test_exec_background() {
    let server = TestServer::start().await;

    let request = ExecRequest {
        run_in_background: true,
        ..ExecRequest::new("echo from-background")
    };
    let start = Instant::now();
    let body: ApiResponse<ExecResult> = server.exec(&request).await.json().await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));

    assert_eq!(body.data.exit_code, 0);
    let pid = body.data.pid.expect("background pid");
    assert!(body.data.output.contains(&pid.to_string()));

    let output_file = body.data.output_file.expect("background output file");
    assert!(output_file.contains(".logs/background_outputs/bg_"));

    let mut contents = String::new();
    for _ in 0..40 {
        contents = tokio::fs::read_to_string(&output_file).await.unwrap_or_default();
        if contents.contains("from-background") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(contents.contains("from-background"));
}

// ============================================================================
// Session Workspace Tests
// ============================================================================

#[tokio::test]
async fn test_session_header_selects_workspace() {
    let server = TestServer::start().await;
    let session_id = uuid::Uuid::new_v4().to_string();

    let response = server
        .client
        .post(server.url("/v1/bash/exec"))
        .header("X-Session-ID", &session_id)
        .json(&ExecRequest::new("pwd"))
        .send()
        .await
        .unwrap();
    let body: ApiResponse<ExecResult> = response.json().await.unwrap();

    let expected = server.workspace_path().join(&session_id);
    assert!(expected.is_dir());
    assert_eq!(
        std::path::PathBuf::from(body.data.output.trim())
            .canonicalize()
            .unwrap(),
        expected.canonicalize().unwrap()
    );
}

#[tokio::test]
async fn test_session_header_traversal_rejected() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url("/v1/bash/exec"))
        .header("X-Session-ID", "../escape")
        .json(&ExecRequest::new("pwd"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

// ============================================================================
// Streaming Tests
// ============================================================================

#[tokio::test]
async fn test_stream_chunks_then_done() {
    let server = TestServer::start().await;

    let events = server
        .exec_stream(&ExecRequest::new("echo one; echo two >&2; echo three"))
        .await;

    let (last, chunks) = events.split_last().expect("at least one event");
    assert_eq!(last.event, "done");
    assert_eq!(last.data["exit_code"], 0);
    assert_eq!(last.data["timed_out"], false);

    assert!(chunks.iter().all(|e| e.event == "chunk"));
    let stdout: String = chunks
        .iter()
        .filter(|e| e.data["source"] == "stdout")
        .map(|e| e.data["data"].as_str().unwrap().to_string())
        .collect();
    let stderr: String = chunks
        .iter()
        .filter(|e| e.data["source"] == "stderr")
        .map(|e| e.data["data"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(stdout, "one\nthree\n");
    assert_eq!(stderr, "two\n");
    assert_eq!(last.data["output"], "one\nthree\ntwo\n");
}

#[tokio::test]
async fn test_stream_timeout() {
    let server = TestServer::start().await;

    let request = ExecRequest {
        timeout_ms: Some(300),
        ..ExecRequest::new("echo started; sleep 10")
    };
    let events = server.exec_stream(&request).await;

    assert_eq!(events.first().map(|e| e.event.as_str()), Some("chunk"));
    let last = events.last().unwrap();
    assert_eq!(last.event, "done");
    assert_eq!(last.data["timed_out"], true);
}

#[tokio::test]
async fn test_stream_error_event() {
    let server = TestServer::start().await;

    let request = ExecRequest {
        cwd: Some("missing-dir".to_string()),
        ..ExecRequest::new("echo unreachable")
    };
    let events = server.exec_stream(&request).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "error");
    assert!(events[0].data["message"]
        .as_str()
        .unwrap()
        .contains("working directory"));
}

// ============================================================================
// Terminal Tests
// ============================================================================

#[tokio::test]
async fn test_terminal_echo() {
    let server = TestServer::start().await;
    let mut socket = server.open_terminal("").await;

    send_frame(&mut socket, json!({"type": "input", "data": "echo ws-$((40 + 2))\n"})).await;
    let output = wait_for_output(&mut socket, "ws-42", Duration::from_secs(5)).await;
    assert!(output.contains("ws-42"), "output: {:?}", output);
}

#[tokio::test]
async fn test_terminal_control_frames() {
    let server = TestServer::start().await;
    let mut socket = server.open_terminal("?rows=30&cols=100").await;

    send_frame(&mut socket, json!({"type": "ping"})).await;
    assert!(wait_for_frame(&mut socket, "pong", Duration::from_secs(5), |_| true)
        .await
        .is_some());

    send_frame(&mut socket, json!({"type": "bogus"})).await;
    let frame = wait_for_frame(&mut socket, "error", Duration::from_secs(5), |_| true)
        .await
        .expect("error frame");
    assert_eq!(frame["data"], "unknown message type");

    send_raw(&mut socket, "not json at all").await;
    let frame = wait_for_frame(&mut socket, "error", Duration::from_secs(5), |_| true)
        .await
        .expect("error frame");
    assert_eq!(frame["data"], "invalid message format");

    // Resize takes effect for programs started afterwards
    send_frame(&mut socket, json!({"type": "resize", "data": {"rows": 40, "cols": 120}})).await;
    send_frame(&mut socket, json!({"type": "input", "data": "stty size\n"})).await;
    let output = wait_for_output(&mut socket, "40 120", Duration::from_secs(5)).await;
    assert!(output.contains("40 120"), "output: {:?}", output);
}

#[tokio::test]
async fn test_terminal_shell_exit_closes_socket() {
    let server = TestServer::start().await;
    let mut socket = server.open_terminal("").await;

    send_frame(&mut socket, json!({"type": "input", "data": "exit\n"})).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut closed = false;
    while Instant::now() < deadline {
        if next_frame(&mut socket, Duration::from_secs(1)).await.is_none() {
            closed = true;
            break;
        }
    }
    assert!(closed, "socket stayed open after the shell exited");
}

#[tokio::test]
async fn test_terminal_limit() {
    let server = TestServer::start_with(|config| config.max_terminals = 1).await;

    let mut first = server.open_terminal("").await;
    send_frame(&mut first, json!({"type": "ping"})).await;
    assert!(wait_for_frame(&mut first, "pong", Duration::from_secs(5), |_| true)
        .await
        .is_some());

    let mut second = server.open_terminal("").await;
    let frame = wait_for_frame(&mut second, "error", Duration::from_secs(5), |_| true)
        .await
        .expect("limit error frame");
    assert!(frame["data"].as_str().unwrap().contains("limit"));
}
