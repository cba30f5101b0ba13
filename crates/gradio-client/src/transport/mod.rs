//! Framing adapters the queue state machine reads messages from.

pub mod event_stream;
pub mod websocket;

use async_trait::async_trait;

use crate::errors::ClientError;
use crate::message::{Message, OutgoingFrame};

pub use event_stream::{ByteStream, EventStreamTransport, RecordDecoder};
pub use websocket::WebSocketTransport;

/// Which wire framing a transport realizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// Bidirectional stream of discrete JSON frames.
    Socket,
    /// Receive-only `data:` records terminated by a blank line.
    EventStream,
}

/// Abstract receive/send contract shared by both framings.
#[async_trait]
pub trait QueueTransport: Send {
    fn framing(&self) -> Framing;

    /// Waits for the next message. `Ok(None)` means the peer closed the
    /// connection or the stream reached end of input.
    async fn next_message(&mut self) -> Result<Option<Message>, ClientError>;

    async fn send(&mut self, frame: &OutgoingFrame) -> Result<(), ClientError>;

    /// Releases the connection. Safe to call more than once.
    async fn close(&mut self);
}
