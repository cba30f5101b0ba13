//! Wire messages exchanged with the server queue.
//!
//! Incoming messages are discriminated by their `msg` field. Outgoing frames
//! are only ever written on the socket framing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ClientError;

/// One message received from the queue, on either framing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum Message {
    SendHash,
    QueueFull,
    Estimation(Estimation),
    SendData,
    ProcessStarts(ProcessStarts),
    ProcessGenerating(ProcessGenerating),
    ProcessCompleted(ProcessCompleted),
    Heartbeat,
}

impl Message {
    /// Decodes one JSON record. Anything that is not a known message shape
    /// is a protocol error carrying the raw record.
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        serde_json::from_str(raw.trim())
            .map_err(|err| ClientError::protocol(format!("unrecognized message {raw}: {err}")))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendHash => "send_hash",
            Self::QueueFull => "queue_full",
            Self::Estimation(_) => "estimation",
            Self::SendData => "send_data",
            Self::ProcessStarts(_) => "process_starts",
            Self::ProcessGenerating(_) => "process_generating",
            Self::ProcessCompleted(_) => "process_completed",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// Queue position and wait estimate. Informational only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Estimation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_eta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_eta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_event_process_time: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessStarts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<f64>,
}

/// Intermediate output of a generator function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessGenerating {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub output: Option<Output>,
}

/// Terminal message of a queued call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessCompleted {
    pub success: bool,
    #[serde(default)]
    pub output: Option<Output>,
}

fn default_success() -> bool {
    true
}

/// Decoded return value(s) of an invoked function.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub is_generating: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of the direct call and of the event-stream join call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallBody<'a> {
    pub data: &'a [Value],
    pub fn_index: usize,
    pub session_hash: &'a str,
}

/// Replies written on the socket framing.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutgoingFrame {
    Hash {
        fn_index: usize,
        session_hash: String,
    },
    Data {
        fn_index: usize,
        session_hash: String,
        data: Vec<Value>,
        event_data: Option<Value>,
    },
}
