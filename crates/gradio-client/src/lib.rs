//! Client for invoking the functions ("endpoints") of a remote Gradio app.
//!
//! Skip-queue endpoints are called with one HTTP request. Everything else
//! goes through the server's execution queue, which speaks one of two
//! framings:
//!
//! - legacy: a WebSocket at `queue/join` carrying one JSON message per frame;
//! - `sse_v1` / `sse_v2`: an HTTP `queue/join` call followed by a
//!   `text/event-stream` body from `queue/data`.
//!
//! Both framings implement [`QueueTransport`] and are driven by the same
//! [`QueueRun`] state machine, which emits [`LifecycleEvent`]s to any
//! subscribers registered on the [`Client`].

pub mod client;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod events;
pub mod http;
pub mod message;
pub mod payload;
pub mod queue;
pub mod session;
pub mod testing;
pub mod transport;

pub use client::Client;
pub use config::{ClientOptions, DependencyConfig, Protocol, ServerConfig};
pub use endpoint::{Endpoint, EndpointSelector, EndpointTable};
pub use errors::{BoxError, ClientError, ErrorCategory};
pub use events::{
    BufferedSubscriber, EventDispatcher, EventKind, EventPayload, EventSubscriber, LifecycleEvent,
};
pub use message::{
    CallBody, Estimation, Message, OutgoingFrame, Output, ProcessCompleted, ProcessGenerating,
    ProcessStarts,
};
pub use payload::{Argument, DataUri, FileData, decode_data_uri, detect_mime, prepare_payload};
pub use queue::{QueueRun, QueueState};
pub use session::SessionHash;
pub use transport::{EventStreamTransport, Framing, QueueTransport, WebSocketTransport};
