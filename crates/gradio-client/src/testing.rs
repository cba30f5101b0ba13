//! In-memory transport for exercising the queue state machine.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::errors::ClientError;
use crate::message::{Message, OutgoingFrame};
use crate::transport::{Framing, QueueTransport};

/// Replays raw JSON records, records what was sent, and reports end of
/// stream once the script runs out.
#[derive(Debug)]
pub struct ScriptedTransport {
    framing: Framing,
    incoming: VecDeque<String>,
    sent: Vec<OutgoingFrame>,
    close_calls: usize,
}

impl ScriptedTransport {
    pub fn new<I, S>(framing: Framing, records: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            framing,
            incoming: records.into_iter().map(Into::into).collect(),
            sent: Vec::new(),
            close_calls: 0,
        }
    }

    pub fn socket<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Framing::Socket, records)
    }

    pub fn event_stream<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Framing::EventStream, records)
    }

    pub fn sent(&self) -> &[OutgoingFrame] {
        &self.sent
    }

    pub fn remaining(&self) -> usize {
        self.incoming.len()
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls > 0
    }
}

#[async_trait]
impl QueueTransport for ScriptedTransport {
    fn framing(&self) -> Framing {
        self.framing
    }

    async fn next_message(&mut self) -> Result<Option<Message>, ClientError> {
        if self.is_closed() {
            return Ok(None);
        }
        match self.incoming.pop_front() {
            Some(record) => Message::parse(&record).map(Some),
            None => Ok(None),
        }
    }

    async fn send(&mut self, frame: &OutgoingFrame) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::protocol("send on a closed transport"));
        }
        self.sent.push(frame.clone());
        Ok(())
    }

    async fn close(&mut self) {
        self.close_calls += 1;
    }
}
