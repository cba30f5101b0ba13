use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{BoxError, ClientError};
use crate::message::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Submit,
    QueueFull,
    QueueEstimation,
    ProcessStarts,
    ProcessGenerating,
    ProcessCompleted,
    ProcessSuccess,
    ProcessFailed,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Submit,
        EventKind::QueueFull,
        EventKind::QueueEstimation,
        EventKind::ProcessStarts,
        EventKind::ProcessGenerating,
        EventKind::ProcessCompleted,
        EventKind::ProcessSuccess,
        EventKind::ProcessFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::QueueFull => "queue_full",
            Self::QueueEstimation => "queue_estimation",
            Self::ProcessStarts => "process_starts",
            Self::ProcessGenerating => "process_generating",
            Self::ProcessCompleted => "process_completed",
            Self::ProcessSuccess => "process_success",
            Self::ProcessFailed => "process_failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a lifecycle event carries: the prepared payload for `Submit`, the
/// originating queue message for everything else.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EventPayload {
    Submit(Vec<Value>),
    Message(Message),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl LifecycleEvent {
    pub fn submit(payload: Vec<Value>) -> Self {
        Self {
            kind: EventKind::Submit,
            payload: EventPayload::Submit(payload),
        }
    }

    pub fn message(kind: EventKind, message: Message) -> Self {
        Self {
            kind,
            payload: EventPayload::Message(message),
        }
    }
}

/// Receives lifecycle notifications. A returned error aborts the submission
/// that emitted the event.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent) -> Result<(), BoxError>;
}

impl<F> EventSubscriber for F
where
    F: Fn(&LifecycleEvent) -> Result<(), BoxError> + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) -> Result<(), BoxError> {
        self(event)
    }
}

/// Synchronous fan-out of lifecycle events, in subscription order per kind.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    subscribers: HashMap<EventKind, Vec<Arc<dyn EventSubscriber>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: EventKind, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.entry(kind).or_default().push(subscriber);
    }

    pub fn subscribe_all(&mut self, subscriber: Arc<dyn EventSubscriber>) {
        for kind in EventKind::ALL {
            self.subscribe(kind, subscriber.clone());
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }

    pub fn emit(&self, event: &LifecycleEvent) -> Result<(), ClientError> {
        tracing::trace!(kind = %event.kind, "emitting lifecycle event");
        let Some(subscribers) = self.subscribers.get(&event.kind) else {
            return Ok(());
        };
        for subscriber in subscribers {
            subscriber
                .on_event(event)
                .map_err(|source| ClientError::Subscriber {
                    kind: event.kind,
                    source,
                })?;
        }
        Ok(())
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&'static str, usize> = self
            .subscribers
            .iter()
            .map(|(kind, subscribers)| (kind.as_str(), subscribers.len()))
            .collect();
        f.debug_struct("EventDispatcher")
            .field("subscribers", &counts)
            .finish()
    }
}

/// Records every event it receives.
#[derive(Clone, Debug, Default)]
pub struct BufferedSubscriber {
    inner: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl BufferedSubscriber {
    pub fn snapshot(&self) -> Vec<LifecycleEvent> {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.snapshot().iter().map(|event| event.kind).collect()
    }
}

impl EventSubscriber for BufferedSubscriber {
    fn on_event(&self, event: &LifecycleEvent) -> Result<(), BoxError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| "buffered subscriber mutex poisoned")?;
        guard.push(event.clone());
        Ok(())
    }
}
