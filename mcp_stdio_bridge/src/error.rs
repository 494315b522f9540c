//! Error types for the stdio bridge

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The HTTP body was not a single well-formed JSON value.
    #[error("{0}")]
    InvalidMessage(serde_json::Error),

    #[error("Server process error: {0}")]
    ServerProcess(String),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Timed out after {0:?} waiting for the MCP server")]
    Timeout(Duration),

    #[error("MCP server has exited ({0})")]
    SubprocessExited(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP server error: {0}")]
    HttpServer(String),
}

impl BridgeError {
    /// HTTP status reported to the client when a call fails with this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::SubprocessExited(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
