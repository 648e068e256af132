//! Error types for the sandbox server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sandbox server.
///
/// Only setup-class failures live here. Command outcomes (non-zero exit,
/// timeout, truncation) are data on `ExecutionResult`, never errors.
#[derive(Debug, Error)]
pub enum Error {
    // Workspace errors (3000-3999)
    #[error("Invalid working directory: {0}")]
    InvalidWorkingDirectory(String),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Failed to create output directory: {0}")]
    OutputDirectory(String),

    // Process errors (4000-4099)
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    // PTY errors (4100-4199)
    #[error("PTY limit exceeded")]
    PtyLimitExceeded,

    #[error("PTY already closed")]
    PtyAlreadyClosed,

    #[error("PTY I/O error: {0}")]
    PtyIo(#[source] std::io::Error),

    // General errors (1000-1999)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the error code
    pub fn code(&self) -> u32 {
        match self {
            // Workspace errors (3000-3999)
            Error::InvalidWorkingDirectory(_) => 3001,
            Error::InvalidSessionId(_) => 3002,
            Error::OutputDirectory(_) => 3003,

            // Process errors (4000-4099)
            Error::SpawnFailed(_) => 4001,

            // PTY errors (4100-4199)
            Error::PtyLimitExceeded => 4102,
            Error::PtyAlreadyClosed => 4103,
            Error::PtyIo(_) => 4104,

            // General errors (1000-1999)
            Error::InvalidParameter(_) => 1002,
            Error::Internal(_) => 1003,
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidParameter(_)
            | Error::InvalidWorkingDirectory(_)
            | Error::InvalidSessionId(_) => StatusCode::BAD_REQUEST,

            Error::PtyLimitExceeded => StatusCode::TOO_MANY_REQUESTS,

            Error::PtyAlreadyClosed => StatusCode::GONE,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this is the "session already closed" condition
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::PtyAlreadyClosed)
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
