//! Error taxonomy for queue submissions and direct calls.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::events::EventKind;

/// Boxed error returned by lifecycle subscribers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classes callers branch on when deciding whether to retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidArgument,
    QueueFull,
    Protocol,
    Transport,
    Subscriber,
}

/// Top-level error type for the gradio-client crate.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid server configuration: {0}")]
    InvalidConfiguration(String),
    #[error("the server queue is full")]
    QueueFull,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("queue stream ended before a process_completed message arrived")]
    IncompleteResult,
    #[error("no queue message received within {0:?}")]
    Timeout(Duration),
    #[error("http request failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket transport error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("failed to read file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{kind} subscriber failed: {source}")]
    Subscriber {
        kind: EventKind,
        #[source]
        source: BoxError,
    },
}

impl ClientError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument(_) | Self::InvalidConfiguration(_) => {
                ErrorCategory::InvalidArgument
            }
            Self::QueueFull => ErrorCategory::QueueFull,
            Self::Protocol(_) | Self::IncompleteResult | Self::Json(_) => ErrorCategory::Protocol,
            Self::Timeout(_)
            | Self::HttpStatus { .. }
            | Self::Http(_)
            | Self::WebSocket(_)
            | Self::File { .. }
            | Self::Io(_) => ErrorCategory::Transport,
            Self::Subscriber { .. } => ErrorCategory::Subscriber,
        }
    }

    pub fn is_queue_full(&self) -> bool {
        matches!(self, Self::QueueFull)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
