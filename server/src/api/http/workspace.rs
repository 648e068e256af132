//! Workspace resolution
//!
//! Requests may carry an `X-Session-ID` header; each session gets its own
//! directory below the configured workspace.

use std::path::{Path, PathBuf};

use axum::http::HeaderMap;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// Header naming the caller's session
pub const SESSION_HEADER: &str = "x-session-id";

/// Directory the request should run in, created on demand
pub async fn resolve_workspace(headers: &HeaderMap, config: &Config) -> Result<PathBuf> {
    let session_id = match headers.get(SESSION_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| Error::InvalidSessionId("header is not valid UTF-8".to_string()))?
            .trim(),
        None => "",
    };

    if session_id.is_empty() {
        return Ok(config.workspace_dir.clone());
    }

    session_workspace(&config.workspace_dir, session_id).await
}

/// `<base>/<session_id>`, rejecting ids that could escape `base`
pub async fn session_workspace(base: &Path, session_id: &str) -> Result<PathBuf> {
    validate_session_id(session_id)?;

    let dir = base.join(session_id);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| Error::Internal(format!("failed to create workspace {}: {}", dir.display(), e)))?;
    debug!("Resolved session {} to {}", session_id, dir.display());
    Ok(dir)
}

fn validate_session_id(session_id: &str) -> Result<()> {
    let invalid = session_id == "."
        || session_id.contains("..")
        || session_id.contains('/')
        || session_id.contains('\\')
        || session_id.contains('\0');
    if invalid {
        return Err(Error::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}
