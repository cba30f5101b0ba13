//! Event-stream framing: `data:` records separated by blank lines.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::{Framing, QueueTransport};
use crate::errors::ClientError;
use crate::message::{Message, OutgoingFrame};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// Incremental record decoder that accepts arbitrary byte chunks.
///
/// Records stay as raw bytes until they are complete, so a chunk boundary
/// inside a multi-byte character is harmless and invalid UTF-8 is left for
/// the transport to reject.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    data: Option<Vec<u8>>,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the data of every record it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut records = Vec::new();
        let mut line_start = 0;

        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let line_end = self.scanned + offset;
            let line = strip_cr(&self.buffer[line_start..line_end]);
            if let Some(record) = apply_line(&mut self.data, line) {
                records.push(record);
            }
            line_start = line_end + 1;
            self.scanned = line_start;
        }

        self.buffer.drain(..line_start);
        self.scanned = self.buffer.len();
        records
    }

    /// Flush a final record the stream did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        let rest = strip_cr(&rest);
        if !rest.is_empty() {
            let _ = apply_line(&mut self.data, rest);
        }
        self.data.take()
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn apply_line(data: &mut Option<Vec<u8>>, line: &[u8]) -> Option<Vec<u8>> {
    if line.is_empty() {
        return data.take();
    }
    if line.starts_with(b":") {
        return None;
    }

    let (field, value) = match line.iter().position(|byte| *byte == b':') {
        Some(colon) => (&line[..colon], &line[colon + 1..]),
        None => (line, &line[line.len()..]),
    };
    if field == b"data" {
        let value = value.strip_prefix(b" ").unwrap_or(value);
        match data.as_mut() {
            Some(joined) => {
                joined.push(b'\n');
                joined.extend_from_slice(value);
            }
            None => *data = Some(value.to_vec()),
        }
    }
    None
}

/// Receive-only transport over an event-stream response body.
pub struct EventStreamTransport {
    body: Option<ByteStream>,
    decoder: RecordDecoder,
    pending: VecDeque<Vec<u8>>,
}

impl EventStreamTransport {
    pub fn new(body: ByteStream) -> Self {
        Self {
            body: Some(body),
            decoder: RecordDecoder::new(),
            pending: VecDeque::new(),
        }
    }

    /// Builds a transport from any fallible chunk stream.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<ClientError> + 'static,
    {
        Self::new(Box::pin(
            stream.map(|chunk| chunk.map_err(Into::<ClientError>::into)),
        ))
    }
}

#[async_trait]
impl QueueTransport for EventStreamTransport {
    fn framing(&self) -> Framing {
        Framing::EventStream
    }

    async fn next_message(&mut self) -> Result<Option<Message>, ClientError> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                let record = String::from_utf8(record).map_err(|_| {
                    ClientError::protocol("event-stream record is not valid utf-8")
                })?;
                if record.trim().is_empty() {
                    continue;
                }
                return Message::parse(&record).map(Some);
            }

            let Some(body) = self.body.as_mut() else {
                return Ok(None);
            };
            match body.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.push(&chunk)),
                Some(Err(err)) => return Err(err),
                None => {
                    self.body = None;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }

    async fn send(&mut self, _frame: &OutgoingFrame) -> Result<(), ClientError> {
        Err(ClientError::protocol(
            "the event-stream framing cannot send frames",
        ))
    }

    async fn close(&mut self) {
        if self.body.take().is_some() {
            tracing::debug!("closed event stream");
        }
    }
}
