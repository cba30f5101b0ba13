//! HTTP resource owned by a client: config fetch, direct calls, queue join
//! and the event-stream body.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ClientOptions;
use crate::errors::ClientError;
use crate::transport::ByteStream;

pub const CONFIG_PATH: &str = "config";
pub const QUEUE_JOIN_PATH: &str = "queue/join";
pub const QUEUE_DATA_PATH: &str = "queue/data";

#[derive(Clone, Debug)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    hf_token: Option<String>,
    read_timeout: Option<Duration>,
}

impl HttpApi {
    pub fn new(options: &ClientOptions) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: options.src.clone(),
            hf_token: options.hf_token.clone(),
            read_timeout: options.read_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// The same endpoint with the scheme switched to its WebSocket form.
    pub fn ws_endpoint(&self, path: &str) -> Result<String, ClientError> {
        let url = self.endpoint(path);
        if let Some(rest) = url.strip_prefix("https://") {
            Ok(format!("wss://{rest}"))
        } else if let Some(rest) = url.strip_prefix("http://") {
            Ok(format!("ws://{rest}"))
        } else if url.starts_with("ws://") || url.starts_with("wss://") {
            Ok(url)
        } else {
            Err(ClientError::invalid_argument(format!(
                "unsupported url scheme in {url}"
            )))
        }
    }

    pub fn hf_token(&self) -> Option<&str> {
        self.hf_token.as_deref()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.endpoint(path));
        match &self.hf_token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    /// Sends a request whose whole exchange, body included, must finish
    /// within the read timeout.
    async fn send_bounded(&self, builder: RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let builder = match self.read_timeout {
            Some(limit) => builder.timeout(limit),
            None => builder,
        };
        builder.send().await.map_err(|err| self.map_timeout(err))
    }

    fn map_timeout(&self, err: reqwest::Error) -> ClientError {
        match self.read_timeout {
            Some(limit) if err.is_timeout() => ClientError::Timeout(limit),
            _ => ClientError::Http(err),
        }
    }

    async fn read_success_body(&self, response: reqwest::Response) -> Result<String, ClientError> {
        let status = response.status();
        let text = response.text().await.map_err(|err| self.map_timeout(err))?;
        if !status.is_success() {
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.send_bounded(self.request(Method::GET, path)).await?;
        let text = self.read_success_body(response).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, ClientError> {
        let response = self.post_raw(path, body).await?;
        let text = self.read_success_body(response).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Posts without interpreting the status code.
    pub async fn post_raw<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ClientError> {
        self.send_bounded(self.request(Method::POST, path).json(body))
            .await
    }

    /// Opens a `text/event-stream` body. Only the response head is bounded by
    /// the read timeout; the queue loop bounds each record read itself.
    pub async fn open_event_stream(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<ByteStream, ClientError> {
        let pending = self
            .request(Method::GET, path)
            .query(query)
            .header(ACCEPT, "text/event-stream")
            .send();
        let response = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| ClientError::Timeout(limit))??,
            None => pending.await?,
        };
        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ClientError::from)),
        ))
    }
}
