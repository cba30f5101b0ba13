//! Queue protocol state machine shared by both framings.
//!
//! The socket framing starts at [`QueueState::AwaitingHandshake`] and answers
//! `send_hash`/`send_data` itself. The event-stream framing has already
//! joined and delivered the payload over HTTP, so it starts at
//! [`QueueState::AwaitingReady`]. Everything after that is identical: progress
//! messages become lifecycle events and `process_completed` ends the run.

use std::time::Duration;

use serde_json::Value;

use crate::errors::ClientError;
use crate::events::{EventDispatcher, EventKind, LifecycleEvent};
use crate::message::{Message, OutgoingFrame, Output};
use crate::session::SessionHash;
use crate::transport::{Framing, QueueTransport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    AwaitingHandshake,
    AwaitingReady,
    AwaitingResult,
    Done,
}

enum Step {
    Continue,
    Finished(Option<Output>),
}

/// One queued call, driven to completion over a single transport.
pub struct QueueRun<'a> {
    fn_index: usize,
    session_hash: &'a SessionHash,
    payload: &'a [Value],
    events: &'a EventDispatcher,
    read_timeout: Option<Duration>,
    state: QueueState,
}

impl<'a> QueueRun<'a> {
    pub fn new(
        fn_index: usize,
        session_hash: &'a SessionHash,
        payload: &'a [Value],
        events: &'a EventDispatcher,
    ) -> Self {
        Self {
            fn_index,
            session_hash,
            payload,
            events,
            read_timeout: None,
            state: QueueState::AwaitingHandshake,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    /// Runs until `process_completed` or a terminal error. The transport is
    /// closed before this returns, whatever the outcome.
    pub async fn drive<T>(&mut self, transport: &mut T) -> Result<Option<Output>, ClientError>
    where
        T: QueueTransport + ?Sized,
    {
        self.state = match transport.framing() {
            Framing::Socket => QueueState::AwaitingHandshake,
            Framing::EventStream => QueueState::AwaitingReady,
        };
        let result = self.run(transport).await;
        self.state = QueueState::Done;
        transport.close().await;

        match &result {
            Ok(_) => tracing::info!(fn_index = self.fn_index, "queue run finished"),
            Err(err) => tracing::warn!(fn_index = self.fn_index, %err, "queue run failed"),
        }
        result
    }

    async fn run<T>(&mut self, transport: &mut T) -> Result<Option<Output>, ClientError>
    where
        T: QueueTransport + ?Sized,
    {
        loop {
            let Some(message) = self.receive(transport).await? else {
                return Err(ClientError::IncompleteResult);
            };
            tracing::debug!(
                fn_index = self.fn_index,
                kind = message.kind(),
                state = ?self.state,
                "queue message"
            );
            if let Step::Finished(output) = self.apply(transport, message).await? {
                return Ok(output);
            }
        }
    }

    async fn receive<T>(&self, transport: &mut T) -> Result<Option<Message>, ClientError>
    where
        T: QueueTransport + ?Sized,
    {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, transport.next_message())
                .await
                .map_err(|_| ClientError::Timeout(limit))?,
            None => transport.next_message().await,
        }
    }

    async fn apply<T>(&mut self, transport: &mut T, message: Message) -> Result<Step, ClientError>
    where
        T: QueueTransport + ?Sized,
    {
        match message {
            Message::SendHash => {
                self.require_socket(transport.framing(), "send_hash")?;
                transport
                    .send(&OutgoingFrame::Hash {
                        fn_index: self.fn_index,
                        session_hash: self.session_hash.to_string(),
                    })
                    .await?;
            }
            Message::QueueFull => {
                self.emit(EventKind::QueueFull, message)?;
                return Err(ClientError::QueueFull);
            }
            Message::Estimation(_) => self.emit(EventKind::QueueEstimation, message)?,
            Message::SendData => {
                self.require_socket(transport.framing(), "send_data")?;
                transport
                    .send(&OutgoingFrame::Data {
                        fn_index: self.fn_index,
                        session_hash: self.session_hash.to_string(),
                        data: self.payload.to_vec(),
                        event_data: None,
                    })
                    .await?;
                self.state = QueueState::AwaitingResult;
            }
            Message::ProcessStarts(_) => {
                self.emit(EventKind::ProcessStarts, message)?;
                self.state = QueueState::AwaitingResult;
            }
            Message::ProcessGenerating(_) => self.emit(EventKind::ProcessGenerating, message)?,
            Message::ProcessCompleted(ref completed) => {
                let success = completed.success;
                let output = completed.output.clone();
                let mut event = LifecycleEvent::message(EventKind::ProcessCompleted, message);
                self.events.emit(&event)?;
                event.kind = if success {
                    EventKind::ProcessSuccess
                } else {
                    EventKind::ProcessFailed
                };
                self.events.emit(&event)?;
                return Ok(Step::Finished(output));
            }
            Message::Heartbeat => {}
        }
        Ok(Step::Continue)
    }

    fn emit(&self, kind: EventKind, message: Message) -> Result<(), ClientError> {
        self.events.emit(&LifecycleEvent::message(kind, message))
    }

    fn require_socket(&self, framing: Framing, kind: &str) -> Result<(), ClientError> {
        match framing {
            Framing::Socket => Ok(()),
            Framing::EventStream => Err(ClientError::protocol(format!(
                "{kind} is not valid on the event-stream framing"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BoxError;
    use crate::events::BufferedSubscriber;
    use crate::testing::ScriptedTransport;
    use serde_json::json;
    use std::sync::Arc;

    fn dispatcher() -> (EventDispatcher, Arc<BufferedSubscriber>) {
        let buffer = Arc::new(BufferedSubscriber::default());
        let mut events = EventDispatcher::new();
        events.subscribe_all(buffer.clone());
        (events, buffer)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn socket_sequence_runs_to_success() {
        let (events, buffer) = dispatcher();
        let hash = SessionHash::generate();
        let payload = vec![json!("hello")];
        let mut transport = ScriptedTransport::socket([
            r#"{"msg":"send_hash"}"#,
            r#"{"msg":"send_data"}"#,
            r#"{"msg":"process_starts"}"#,
            r#"{"msg":"process_generating","success":true,"output":{"data":["h"],"is_generating":true}}"#,
            r#"{"msg":"process_generating","success":true,"output":{"data":["he"],"is_generating":true}}"#,
            r#"{"msg":"process_completed","success":true,"output":{"data":["hello!"]}}"#,
        ]);

        let mut run = QueueRun::new(3, &hash, &payload, &events);
        let output = run.drive(&mut transport).await.expect("run should succeed");

        assert_eq!(run.state(), QueueState::Done);
        assert_eq!(output.expect("output").data, vec![json!("hello!")]);
        assert_eq!(
            buffer.kinds(),
            vec![
                EventKind::ProcessStarts,
                EventKind::ProcessGenerating,
                EventKind::ProcessGenerating,
                EventKind::ProcessCompleted,
                EventKind::ProcessSuccess,
            ]
        );
        assert_eq!(
            transport.sent(),
            &[
                OutgoingFrame::Hash {
                    fn_index: 3,
                    session_hash: hash.to_string(),
                },
                OutgoingFrame::Data {
                    fn_index: 3,
                    session_hash: hash.to_string(),
                    data: payload.clone(),
                    event_data: None,
                },
            ]
        );
        assert!(transport.is_closed());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn queue_full_fails_and_closes() {
        let (events, buffer) = dispatcher();
        let hash = SessionHash::generate();
        let mut transport = ScriptedTransport::socket([
            r#"{"msg":"send_hash"}"#,
            r#"{"msg":"queue_full"}"#,
            r#"{"msg":"process_completed","success":true,"output":null}"#,
        ]);

        let mut run = QueueRun::new(0, &hash, &[], &events);
        let err = run.drive(&mut transport).await.expect_err("queue full");

        assert!(err.is_queue_full());
        assert_eq!(run.state(), QueueState::Done);
        assert_eq!(buffer.kinds(), vec![EventKind::QueueFull]);
        assert_eq!(transport.remaining(), 1);
        assert!(transport.is_closed());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn event_stream_failure_yields_absent_output() {
        let (events, buffer) = dispatcher();
        let hash = SessionHash::generate();
        let mut transport = ScriptedTransport::event_stream([
            r#"{"msg":"estimation","rank":0,"queue_size":1}"#,
            r#"{"msg":"process_completed","success":false,"output":null}"#,
        ]);

        let mut run = QueueRun::new(0, &hash, &[], &events);
        let output = run.drive(&mut transport).await.expect("run should finish");

        assert_eq!(output, None);
        assert_eq!(
            buffer.kinds(),
            vec![
                EventKind::QueueEstimation,
                EventKind::ProcessCompleted,
                EventKind::ProcessFailed,
            ]
        );
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn end_of_stream_before_completion_is_incomplete() {
        let (events, _buffer) = dispatcher();
        let hash = SessionHash::generate();
        for mut transport in [
            ScriptedTransport::event_stream([r#"{"msg":"process_starts"}"#]),
            ScriptedTransport::socket([r#"{"msg":"send_hash"}"#]),
        ] {
            let mut run = QueueRun::new(0, &hash, &[], &events);
            let err = run.drive(&mut transport).await.expect_err("incomplete");
            assert!(matches!(err, ClientError::IncompleteResult));
            assert!(transport.is_closed());
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unknown_message_is_protocol_error() {
        let (events, _buffer) = dispatcher();
        let hash = SessionHash::generate();
        let mut transport = ScriptedTransport::socket([r#"{"msg":"surprise","x":1}"#]);

        let mut run = QueueRun::new(0, &hash, &[], &events);
        let err = run.drive(&mut transport).await.expect_err("protocol error");
        assert!(matches!(err, ClientError::Protocol(_)));
        assert!(err.to_string().contains("surprise"));
        assert!(transport.is_closed());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn handshake_messages_are_rejected_on_event_stream() {
        let (events, _buffer) = dispatcher();
        let hash = SessionHash::generate();
        let mut transport = ScriptedTransport::event_stream([r#"{"msg":"send_data"}"#]);

        let mut run = QueueRun::new(0, &hash, &[], &events);
        let err = run.drive(&mut transport).await.expect_err("protocol error");
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn heartbeats_are_ignored() {
        let (events, buffer) = dispatcher();
        let hash = SessionHash::generate();
        let mut transport = ScriptedTransport::event_stream([
            r#"{"msg":"heartbeat"}"#,
            r#"{"msg":"process_starts"}"#,
            r#"{"msg":"heartbeat"}"#,
            r#"{"msg":"process_completed","success":true,"output":{"data":[]}}"#,
        ]);

        let mut run = QueueRun::new(0, &hash, &[], &events);
        run.drive(&mut transport).await.expect("run should succeed");
        assert_eq!(
            buffer.kinds(),
            vec![
                EventKind::ProcessStarts,
                EventKind::ProcessCompleted,
                EventKind::ProcessSuccess,
            ]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn subscriber_failure_aborts_and_closes() {
        let mut events = EventDispatcher::new();
        events.subscribe(
            EventKind::ProcessStarts,
            Arc::new(|_event: &LifecycleEvent| -> Result<(), BoxError> { Err("stop".into()) }),
        );
        let hash = SessionHash::generate();
        let mut transport = ScriptedTransport::event_stream([
            r#"{"msg":"process_starts"}"#,
            r#"{"msg":"process_completed","success":true,"output":null}"#,
        ]);

        let mut run = QueueRun::new(0, &hash, &[], &events);
        let err = run.drive(&mut transport).await.expect_err("subscriber error");
        assert!(matches!(
            err,
            ClientError::Subscriber {
                kind: EventKind::ProcessStarts,
                ..
            }
        ));
        assert!(transport.is_closed());
    }

    struct StalledTransport;

    #[async_trait::async_trait]
    impl QueueTransport for StalledTransport {
        fn framing(&self) -> Framing {
            Framing::Socket
        }

        async fn next_message(&mut self) -> Result<Option<Message>, ClientError> {
            std::future::pending().await
        }

        async fn send(&mut self, _frame: &OutgoingFrame) -> Result<(), ClientError> {
            Ok(())
        }

        async fn close(&mut self) {}
    }

    #[tokio::test(flavor = "current_thread")]
    async fn read_timeout_bounds_each_wait() {
        let (events, _buffer) = dispatcher();
        let hash = SessionHash::generate();
        let limit = Duration::from_millis(20);
        let mut run = QueueRun::new(0, &hash, &[], &events).with_read_timeout(Some(limit));
        let err = run
            .drive(&mut StalledTransport)
            .await
            .expect_err("should time out");
        assert!(matches!(err, ClientError::Timeout(d) if d == limit));
        assert_eq!(run.state(), QueueState::Done);
    }
}
