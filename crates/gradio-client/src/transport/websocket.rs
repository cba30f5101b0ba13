//! Socket framing: one JSON message per WebSocket frame.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Framing, QueueTransport};
use crate::errors::ClientError;
use crate::message::{Message, OutgoingFrame};

pub struct WebSocketTransport<S = MaybeTlsStream<TcpStream>> {
    stream: WebSocketStream<S>,
    closed: bool,
}

impl WebSocketTransport {
    pub async fn connect(
        url: &str,
        token: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut request = url.into_client_request()?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| ClientError::invalid_argument(format!("invalid access token: {err}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) =
            tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| ClientError::Timeout(connect_timeout))??;
        tracing::debug!(url, status = %response.status(), "opened queue websocket");
        Ok(Self::new(stream))
    }
}

impl<S> WebSocketTransport<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl<S> QueueTransport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn framing(&self) -> Framing {
        Framing::Socket
    }

    async fn next_message(&mut self) -> Result<Option<Message>, ClientError> {
        loop {
            let Some(frame) = self.stream.next().await else {
                return Ok(None);
            };
            match frame? {
                WsMessage::Text(text) => return Message::parse(text.as_str()).map(Some),
                WsMessage::Binary(bytes) => {
                    let text = std::str::from_utf8(&bytes).map_err(|_| {
                        ClientError::protocol("binary queue frame is not valid utf-8")
                    })?;
                    return Message::parse(text).map(Some);
                }
                WsMessage::Close(frame) => {
                    tracing::debug!(?frame, "queue websocket closed by server");
                    return Ok(None);
                }
                // Control frames only mean the peer is alive; keep waiting.
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }

    async fn send(&mut self, frame: &OutgoingFrame) -> Result<(), ClientError> {
        let text = serde_json::to_string(frame)?;
        self.stream.send(WsMessage::text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.stream.close(None).await {
            tracing::debug!(%err, "queue websocket close did not complete cleanly");
        }
    }
}
