//! Scripted local HTTP server for end-to-end tests.
//!
//! Every accepted connection takes the next [`Reply`] from the script, so a test
//! lists the chat and search responses in the order the client will ask for them.
//! All responses carry `Connection: close`, which keeps one request per connection.

#![allow(dead_code)]

use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streaming_agent::{AgentConfig, Client, ClientBuilder, TranscriptEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub enum Reply {
    /// 200 `text/event-stream`; chunks are written one by one, then the connection closes
    Sse(Vec<String>),
    /// Like `Sse`, but the connection stays open afterwards
    SseHold(Vec<String>),
    /// Chunked `text/event-stream`; after the records, a chunk is announced and the
    /// connection closes halfway through it
    SseCut(Vec<String>),
    /// 200 `application/json`
    Json(Value),
    /// Any status line with a body
    Status(u16, &'static str, String),
    /// Read the request and never answer
    Hang,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    /// e.g. `GET /search?q=rust&max_results=5 HTTP/1.1`
    pub request_line: String,
    /// Header block, lowercased
    pub headers: String,
    pub body: String,
}

impl Recorded {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }

    pub fn is_chat(&self) -> bool {
        self.request_line.starts_with("POST /v1/chat/completions")
    }

    pub fn is_search(&self) -> bool {
        self.request_line.starts_with("GET /search")
    }
}

pub struct MockServer {
    base: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockServer {
    pub async fn start(script: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let reply = script.lock().unwrap().pop_front();
                tokio::spawn(serve(socket, reply, recorded.clone()));
            }
        });

        Self { base, requests }
    }

    pub fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base)
    }

    pub fn search_url(&self) -> String {
        format!("{}/search", self.base)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Config pointing both endpoints at this server.
    pub fn config(&self) -> AgentConfig {
        AgentConfig::builder()
            .api_key("sk-test")
            .api_endpoint(self.chat_url())
            .search_endpoint(self.search_url())
            .timeout_secs(10)
            .build()
            .unwrap()
    }
}

async fn serve(mut socket: TcpStream, reply: Option<Reply>, requests: Arc<Mutex<Vec<Recorded>>>) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    requests.lock().unwrap().push(request);

    let Some(reply) = reply else {
        return;
    };

    match reply {
        Reply::Sse(chunks) => {
            write_sse(&mut socket, &chunks).await;
            let _ = socket.shutdown().await;
        }
        Reply::SseHold(chunks) => {
            write_sse(&mut socket, &chunks).await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Reply::SseCut(records) => {
            write_chunked_sse(&mut socket, &records).await;
            let _ = socket.write_all(b"400\r\npartial").await;
            let _ = socket.flush().await;
            let _ = socket.shutdown().await;
        }
        Reply::Json(value) => {
            let body = value.to_string();
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
        Reply::Status(code, reason, body) => {
            let head = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                code,
                reason,
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
        Reply::Hang => {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }
}

async fn write_sse(socket: &mut TcpStream, chunks: &[String]) {
    let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for chunk in chunks {
        if socket.write_all(chunk.as_bytes()).await.is_err() {
            return;
        }
        let _ = socket.flush().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn write_chunked_sse(socket: &mut TcpStream, records: &[String]) {
    let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for record in records {
        let chunk = format!("{:x}\r\n{}\r\n", record.len(), record);
        if socket.write_all(chunk.as_bytes()).await.is_err() {
            return;
        }
        let _ = socket.flush().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<Recorded> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers = lines.collect::<Vec<_>>().join("\n").to_ascii_lowercase();

    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }

    Some(Recorded {
        request_line,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// Client builder whose HTTP client ignores proxy settings from the environment.
pub fn client_builder(config: AgentConfig) -> ClientBuilder {
    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    Client::builder(config).http_client(http)
}

// ----------------------------------------------------------------------------
// SSE record builders
// ----------------------------------------------------------------------------

pub const DONE: &str = "data: [DONE]\n\n";

/// A text delta in the segment-list form.
pub fn content(text: &str) -> String {
    let chunk = json!({"choices": [{"delta": {"content": [{"type": "text", "text": text}]}}]});
    format!("data: {}\n\n", chunk)
}

/// A tool-call fragment; `None` fields are left out of the record.
pub fn tool_delta(index: u32, id: Option<&str>, name: Option<&str>, arguments: Option<&str>) -> String {
    let mut call = json!({"index": index});
    if let Some(id) = id {
        call["id"] = json!(id);
        call["type"] = json!("function");
    }
    let mut function = json!({});
    if let Some(name) = name {
        function["name"] = json!(name);
    }
    if let Some(arguments) = arguments {
        function["arguments"] = json!(arguments);
    }
    call["function"] = function;

    let chunk = json!({"choices": [{"delta": {"tool_calls": [call]}}]});
    format!("data: {}\n\n", chunk)
}

/// A complete `search_web` call in one record.
pub fn search_call(index: u32, id: &str, query: &str) -> String {
    let arguments = json!({"query": query}).to_string();
    tool_delta(index, Some(id), Some("search_web"), Some(&arguments))
}

pub fn search_results(titles: &[&str]) -> Value {
    let items: Vec<Value> = titles
        .iter()
        .map(|title| {
            json!({
                "title": title,
                "link": format!("https://example.com/{}", title.to_lowercase()),
                "body": format!("About {}", title)
            })
        })
        .collect();
    json!({"results": items})
}

// ----------------------------------------------------------------------------
// Sink helpers
// ----------------------------------------------------------------------------

/// Closure sink that records every event.
pub fn recorder() -> (
    impl Fn(TranscriptEvent) + Send + Sync + 'static,
    Arc<Mutex<Vec<TranscriptEvent>>>,
) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    (move |event| sink_events.lock().unwrap().push(event), events)
}

/// Reads events until one matches, panicking after five seconds.
pub async fn wait_for<S>(events: &mut S, matches: impl Fn(&TranscriptEvent) -> bool)
where
    S: Stream<Item = TranscriptEvent> + Unpin,
{
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.next().await {
            if matches(&event) {
                return true;
            }
        }
        false
    })
    .await
    .expect("timed out waiting for transcript event");
    assert!(found, "event stream closed before the expected event");
}

pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}
