use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Caller-side settings for a [`crate::Client`].
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    /// Base URL of the remote app, e.g. `https://host.example/`.
    pub src: String,
    /// Access token sent as a bearer credential on every request.
    pub hf_token: Option<String>,
    /// Upper bound on each wait for the server: every queue message and every
    /// HTTP response. `None` waits forever.
    pub read_timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl ClientOptions {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            hf_token: None,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Builds options for `src`, taking the token and read timeout from
    /// `HF_TOKEN` and `GRADIO_READ_TIMEOUT_SECS` when they are set.
    pub fn from_env(src: impl Into<String>) -> Self {
        let mut options = Self::new(src);
        options.hf_token = std::env::var("HF_TOKEN")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(secs) = std::env::var("GRADIO_READ_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
        {
            options.read_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        options
    }

    pub fn with_hf_token(mut self, token: impl Into<String>) -> Self {
        self.hf_token = Some(token.into());
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Queue protocol advertised by the server configuration document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Protocol {
    SseV1,
    SseV2,
    /// Socket framing; carries whatever identifier the server reported.
    Legacy(String),
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SseV1 => "sse_v1",
            Self::SseV2 => "sse_v2",
            Self::Legacy(name) => name,
        }
    }

    pub fn uses_event_stream(&self) -> bool {
        matches!(self, Self::SseV1 | Self::SseV2)
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::Legacy("ws".to_string())
    }
}

impl From<&str> for Protocol {
    fn from(value: &str) -> Self {
        match value {
            "sse_v1" => Self::SseV1,
            "sse_v2" => Self::SseV2,
            other => Self::Legacy(other.to_string()),
        }
    }
}

impl Serialize for Protocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// The server's static configuration document (`GET config`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_true")]
    pub enable_queue: bool,
    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,
}

/// One callable function as described by the configuration document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyConfig {
    #[serde(default, deserialize_with = "api_name_or_none")]
    pub api_name: Option<String>,
    #[serde(default)]
    pub queue: Option<bool>,
    #[serde(default = "default_true")]
    pub backend_fn: bool,
}

fn default_true() -> bool {
    true
}

// Servers mark unnamed functions with `false` as well as `null`.
fn api_name_or_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(name) if !name.is_empty() => Some(name),
        _ => None,
    })
}
