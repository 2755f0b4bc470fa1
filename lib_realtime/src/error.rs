//! # Error Taxonomy
//!
//! Errors that can cross the library boundary. Failures that happen inside the
//! connection driver (socket errors, heartbeat timeouts, handler failures) never
//! reach callers as `Err`; they become state transitions and
//! [`Diagnostic`](crate::core::status::Diagnostic) events instead.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to open a link to the remote endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[cfg(feature = "tungstenite")]
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Failure to decode or encode a wire frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has an empty `type` field")]
    EmptyTopic,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid option `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors returned when constructing a [`RealtimeClient`](crate::RealtimeClient).
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("invalid endpoint url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,
}

/// Failure to set up the process logger.
#[cfg(feature = "loggers")]
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("log directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global logger is already installed: {0}")]
    AlreadySet(#[from] log::SetLoggerError),
}
