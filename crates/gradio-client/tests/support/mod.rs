#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use gradio_client::{BufferedSubscriber, Client, ClientOptions, ServerConfig};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

#[derive(Clone, Debug, Default)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body should be json")
    }
}

pub enum FixtureResponse {
    Json { status: u16, body: Value },
    EventStream { chunks: Vec<Vec<u8>> },
    /// Reads the request, then never answers.
    Stall,
}

impl FixtureResponse {
    pub fn ok(body: Value) -> Self {
        Self::Json { status: 200, body }
    }

    pub fn status(status: u16) -> Self {
        Self::Json {
            status,
            body: serde_json::json!({"error": "fixture"}),
        }
    }

    pub fn records(records: &[&str]) -> Self {
        Self::EventStream {
            chunks: records
                .iter()
                .map(|record| format!("data: {record}\n\n").into_bytes())
                .collect(),
        }
    }
}

pub struct HttpFixture {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl HttpFixture {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests mutex").clone()
    }
}

/// Minimal HTTP/1.1 server: one request per connection, `Connection: close`.
pub async fn spawn_http<F>(handler: F) -> HttpFixture
where
    F: Fn(&RecordedRequest) -> FixtureResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("fixture listener should bind");
    let addr = listener.local_addr().expect("fixture addr");
    let requests = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let recorded = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let handler = handler.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                serve_connection(stream, handler.as_ref(), &recorded).await;
            });
        }
    });

    HttpFixture {
        base_url: format!("http://{addr}"),
        requests,
    }
}

async fn serve_connection<F>(stream: TcpStream, handler: &F, recorded: &Mutex<Vec<RecordedRequest>>)
where
    F: Fn(&RecordedRequest) -> FixtureResponse,
{
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0_u8; length];
    if length > 0 && reader.read_exact(&mut body).await.is_err() {
        return;
    }

    let request = RecordedRequest {
        method,
        target,
        headers,
        body,
    };
    let response = handler(&request);
    recorded.lock().expect("requests mutex").push(request);

    match response {
        FixtureResponse::Json { status, body } => {
            let body = serde_json::to_vec(&body).expect("fixture body should encode");
            let head = format!(
                "HTTP/1.1 {status} Fixture\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = write.write_all(head.as_bytes()).await;
            let _ = write.write_all(&body).await;
        }
        FixtureResponse::EventStream { chunks } => {
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
            let _ = write.write_all(head.as_bytes()).await;
            for chunk in chunks {
                let _ = write.write_all(&chunk).await;
                let _ = write.flush().await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        FixtureResponse::Stall => {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
    let _ = write.shutdown().await;
}

#[derive(Clone, Debug, Default)]
pub struct Handshake {
    pub path: String,
    pub authorization: Option<String>,
}

pub struct WsFixture {
    pub base_url: String,
    pub handshake: Arc<Mutex<Handshake>>,
}

impl WsFixture {
    pub fn handshake(&self) -> Handshake {
        self.handshake.lock().expect("handshake mutex").clone()
    }
}

/// Accepts one WebSocket connection and hands it to `script`.
pub async fn spawn_ws<F, Fut>(script: F) -> WsFixture
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("fixture listener should bind");
    let addr = listener.local_addr().expect("fixture addr");
    let handshake = Arc::new(Mutex::new(Handshake::default()));

    let seen = handshake.clone();
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let mut seen = seen.lock().expect("handshake mutex");
            seen.path = request.uri().path().to_string();
            seen.authorization = request
                .headers()
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            Ok(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .expect("websocket handshake should succeed");
        script(ws).await;
    });

    WsFixture {
        base_url: format!("http://{addr}"),
        handshake,
    }
}

pub async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(WsMessage::text(value.to_string()))
        .await
        .expect("fixture send should succeed");
}

/// Reads the next text frame as JSON, skipping control frames.
pub async fn read_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                return serde_json::from_str(text.as_str()).expect("client frame should be json");
            }
            Some(Ok(_)) => continue,
            other => panic!("expected a client frame, got {other:?}"),
        }
    }
}

pub fn client_for(base_url: &str, config: Value) -> (Client, Arc<BufferedSubscriber>) {
    client_with_timeout(base_url, config, Duration::from_secs(5))
}

pub fn client_with_timeout(
    base_url: &str,
    config: Value,
    read_timeout: Duration,
) -> (Client, Arc<BufferedSubscriber>) {
    let config: ServerConfig = serde_json::from_value(config).expect("config should parse");
    let options = ClientOptions::new(base_url).with_read_timeout(Some(read_timeout));
    let mut client = Client::with_server_config(options, config).expect("client should build");
    let buffer = Arc::new(BufferedSubscriber::default());
    client.subscribe_all(buffer.clone());
    (client, buffer)
}
