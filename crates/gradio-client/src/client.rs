//! Submission orchestrator.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::{ClientOptions, ServerConfig};
use crate::endpoint::{Endpoint, EndpointSelector, EndpointTable};
use crate::errors::ClientError;
use crate::events::{EventDispatcher, EventKind, EventSubscriber, LifecycleEvent};
use crate::http::{CONFIG_PATH, HttpApi, QUEUE_DATA_PATH, QUEUE_JOIN_PATH};
use crate::message::{CallBody, Output};
use crate::payload::{Argument, prepare_payload};
use crate::queue::QueueRun;
use crate::session::SessionHash;
use crate::transport::{EventStreamTransport, WebSocketTransport};

/// Invokes the functions of one remote app.
///
/// The configuration, endpoint table and session hash are fixed at
/// construction. Queued submissions on one client run one at a time because
/// the server correlates queue traffic by session hash.
#[derive(Debug)]
pub struct Client {
    options: ClientOptions,
    http: HttpApi,
    config: ServerConfig,
    endpoints: EndpointTable,
    session_hash: SessionHash,
    events: EventDispatcher,
    queue_slot: Mutex<()>,
}

impl Client {
    /// Fetches the server configuration and builds a client for it.
    pub async fn connect(options: ClientOptions) -> Result<Self, ClientError> {
        let http = HttpApi::new(&options)?;
        let config: ServerConfig = http.get_json(CONFIG_PATH).await?;
        tracing::debug!(
            src = %options.src,
            protocol = config.protocol.as_str(),
            version = config.version.as_deref().unwrap_or("unknown"),
            "fetched server config"
        );
        Self::build(options, http, config)
    }

    /// Builds a client from an already known configuration document.
    pub fn with_server_config(options: ClientOptions, config: ServerConfig) -> Result<Self, ClientError> {
        let http = HttpApi::new(&options)?;
        Self::build(options, http, config)
    }

    fn build(options: ClientOptions, http: HttpApi, config: ServerConfig) -> Result<Self, ClientError> {
        let endpoints = EndpointTable::from_config(&config)?;
        Ok(Self {
            options,
            http,
            config,
            endpoints,
            session_hash: SessionHash::generate(),
            events: EventDispatcher::new(),
            queue_slot: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    pub fn session_hash(&self) -> &SessionHash {
        &self.session_hash
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn subscribe(&mut self, kind: EventKind, subscriber: Arc<dyn EventSubscriber>) {
        self.events.subscribe(kind, subscriber);
    }

    pub fn subscribe_all(&mut self, subscriber: Arc<dyn EventSubscriber>) {
        self.events.subscribe_all(subscriber);
    }

    pub fn endpoint(&self, selector: &EndpointSelector) -> Result<&Endpoint, ClientError> {
        self.endpoints.resolve(selector)
    }

    /// Calls an endpoint and returns its decoded output. `None` means the
    /// queue reported completion without an output (a failed run).
    pub async fn predict(
        &self,
        selector: impl Into<EndpointSelector>,
        arguments: Vec<Argument>,
    ) -> Result<Option<Output>, ClientError> {
        let endpoint = self.endpoint(&selector.into())?;
        self.submit(endpoint, arguments).await
    }

    /// Like [`Client::predict`] but hands back the undecoded JSON response.
    pub async fn predict_raw(
        &self,
        selector: impl Into<EndpointSelector>,
        arguments: Vec<Argument>,
    ) -> Result<Value, ClientError> {
        let endpoint = self.endpoint(&selector.into())?;
        self.submit_raw(endpoint, arguments).await
    }

    pub async fn submit(
        &self,
        endpoint: &Endpoint,
        arguments: Vec<Argument>,
    ) -> Result<Option<Output>, ClientError> {
        let payload = self.prepare(endpoint, arguments).await?;
        if endpoint.skips_queue {
            let response = self.call_direct(endpoint, &payload).await?;
            return Ok(Some(serde_json::from_value(response)?));
        }
        self.run_queue(endpoint, &payload).await
    }

    pub async fn submit_raw(
        &self,
        endpoint: &Endpoint,
        arguments: Vec<Argument>,
    ) -> Result<Value, ClientError> {
        let payload = self.prepare(endpoint, arguments).await?;
        if endpoint.skips_queue {
            return self.call_direct(endpoint, &payload).await;
        }
        let output = self.run_queue(endpoint, &payload).await?;
        Ok(serde_json::to_value(output)?)
    }

    async fn prepare(&self, endpoint: &Endpoint, arguments: Vec<Argument>) -> Result<Vec<Value>, ClientError> {
        endpoint.ensure_callable()?;
        let payload = prepare_payload(arguments).await?;
        tracing::info!(
            fn_index = endpoint.index,
            api_name = endpoint.api_name.as_deref().unwrap_or("-"),
            skips_queue = endpoint.skips_queue,
            "submitting"
        );
        self.events.emit(&LifecycleEvent::submit(payload.clone()))?;
        Ok(payload)
    }

    async fn call_direct(&self, endpoint: &Endpoint, payload: &[Value]) -> Result<Value, ClientError> {
        let body = CallBody {
            data: payload,
            fn_index: endpoint.index,
            session_hash: self.session_hash.as_str(),
        };
        self.http.post_json(&endpoint.uri, &body).await
    }

    async fn run_queue(&self, endpoint: &Endpoint, payload: &[Value]) -> Result<Option<Output>, ClientError> {
        let _slot = self.queue_slot.lock().await;
        let mut run = QueueRun::new(endpoint.index, &self.session_hash, payload, &self.events)
            .with_read_timeout(self.options.read_timeout);

        if self.config.protocol.uses_event_stream() {
            let mut transport = self.join_event_stream(endpoint, payload).await?;
            run.drive(&mut transport).await
        } else {
            let url = self.http.ws_endpoint(QUEUE_JOIN_PATH)?;
            let mut transport =
                WebSocketTransport::connect(&url, self.http.hf_token(), self.options.connect_timeout)
                    .await?;
            run.drive(&mut transport).await
        }
    }

    /// Joins the queue over HTTP, then opens the event stream for this session.
    async fn join_event_stream(
        &self,
        endpoint: &Endpoint,
        payload: &[Value],
    ) -> Result<EventStreamTransport, ClientError> {
        let body = CallBody {
            data: payload,
            fn_index: endpoint.index,
            session_hash: self.session_hash.as_str(),
        };
        let response = self.http.post_raw(QUEUE_JOIN_PATH, &body).await?;
        match response.status() {
            reqwest::StatusCode::OK => {}
            reqwest::StatusCode::SERVICE_UNAVAILABLE => {
                tracing::warn!(fn_index = endpoint.index, "queue join rejected: queue full");
                return Err(ClientError::QueueFull);
            }
            status => {
                return Err(ClientError::protocol(format!(
                    "joining the queue failed with status {status}"
                )));
            }
        }

        let stream = self
            .http
            .open_event_stream(
                QUEUE_DATA_PATH,
                &[("session_hash", self.session_hash.as_str())],
            )
            .await?;
        tracing::debug!(fn_index = endpoint.index, "opened queue event stream");
        Ok(EventStreamTransport::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> Client {
        let config: ServerConfig = serde_json::from_value(json!({
            "protocol": "sse_v1",
            "dependencies": [
                {"api_name": "predict"},
                {"api_name": null},
                {"api_name": "toggle", "backend_fn": false}
            ]
        }))
        .expect("config should parse");
        Client::with_server_config(ClientOptions::new("http://127.0.0.1:9"), config)
            .expect("client should build")
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unknown_endpoint_fails_before_any_request() {
        let client = client();
        let err = client
            .predict("missing", vec![json!(1).into()])
            .await
            .expect_err("unknown endpoint");
        assert!(matches!(err, ClientError::InvalidArgument(_)));
        let err = client
            .predict(EndpointSelector::Index(5), Vec::new())
            .await
            .expect_err("unknown index");
        assert!(err.to_string().contains("endpoint not found"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn frontend_only_endpoint_fails_before_submit() {
        let mut client = client();
        let events = Arc::new(crate::events::BufferedSubscriber::default());
        client.subscribe_all(events.clone());

        let err = client
            .predict("toggle", Vec::new())
            .await
            .expect_err("frontend function");
        assert!(matches!(err, ClientError::InvalidArgument(_)));
        assert!(events.snapshot().is_empty());
    }

    #[test]
    fn session_hash_is_fixed_for_the_client() {
        let client = client();
        let first = client.session_hash().clone();
        assert_eq!(client.session_hash(), &first);
        assert_eq!(client.endpoints().len(), 3);
        assert_eq!(
            client
                .endpoint(&EndpointSelector::Name("/predict".to_string()))
                .expect("named endpoint")
                .index,
            0
        );
    }
}
