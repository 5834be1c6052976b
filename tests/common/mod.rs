#![allow(dead_code, reason = "each integration test uses a subset of the helpers")]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::routing::post;
use bytes::Bytes;
use futures::StreamExt;
use rag_relay::config::{LlmConfig, OllamaConfig};
use rag_relay::embeddings::OllamaClient;
use rag_relay::index::IndexCache;
use rag_relay::llm::LlmClient;
use rag_relay::query::QueryPipeline;
use rag_relay::server::{self, AppState};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Embeds each input as `[character count, 'a' count, 'b' count]`
pub struct CountingEmbedResponder;

impl Respond for CountingEmbedResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let embeddings: Vec<Value> = body["input"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|text| {
                        let count = |c: char| text.chars().filter(|&x| x == c).count() as f64;
                        json!([text.chars().count() as f64, count('a'), count('b')])
                    })
                    .collect()
            })
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

/// A wiremock Ollama that answers `/api/embed`
pub async fn mock_embedding_service() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(CountingEmbedResponder)
        .mount(&server)
        .await;
    server
}

pub fn ollama_config(server: &MockServer) -> OllamaConfig {
    let uri = url::Url::parse(&server.uri()).expect("mock uri");
    OllamaConfig {
        host: uri.host_str().expect("host").to_string(),
        port: uri.port().expect("port"),
        model: "counting".to_string(),
        ..OllamaConfig::default()
    }
}

pub fn llm_config(base_url: String) -> LlmConfig {
    LlmConfig {
        base_url,
        model: "stub-chat".to_string(),
    }
}

/// Chat stub that emits `chunks` with `delay` between them
pub async fn spawn_slow_chat(chunks: &'static [&'static str], delay: Duration) -> SocketAddr {
    let app = Router::new().route(
        "/api/chat",
        post(move || async move {
            let stream = futures::stream::iter(chunks.iter().enumerate()).then(
                move |(i, chunk)| async move {
                    if i > 0 {
                        tokio::time::sleep(delay).await;
                    }
                    Ok::<_, Infallible>(Bytes::from_static(chunk.as_bytes()))
                },
            );
            Body::from_stream(stream)
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await });
    addr
}

/// Read one HTTP request, headers and body, off `stream`
async fn drain_request(stream: &mut TcpStream) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0_u8; 1024];
    loop {
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..read]);

        if let Some(head_end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&request[..head_end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.len() >= head_end + 4 + body_len {
                return Ok(());
            }
        }
    }
}

/// Chat stub that promises a 1000-byte body, sends `partial`, then hangs up
pub async fn spawn_truncating_chat(partial: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        if drain_request(&mut stream).await.is_err() {
            return;
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ncontent-length: 1000\r\n\r\n{partial}"
        );
        stream.write_all(response.as_bytes()).await.ok();
        stream.flush().await.ok();
    });
    addr
}

/// Chunked chat stub that keeps emitting lines until a write fails.
///
/// The receiver fires once the relay has closed the upstream connection.
pub async fn spawn_endless_chat() -> (SocketAddr, oneshot::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let (released, released_rx) = oneshot::channel();
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        if drain_request(&mut stream).await.is_err() {
            return;
        }
        let head = "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\n\r\n";
        if stream.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for _ in 0..1000 {
            if stream.write_all(b"5\r\ntick\n\r\n").await.is_err() {
                released.send(()).ok();
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });
    (addr, released_rx)
}

/// Start the relay against real HTTP clients and return its address
pub async fn spawn_relay(
    ollama: OllamaConfig,
    llm: LlmConfig,
    index_path: std::path::PathBuf,
    top_k: usize,
) -> SocketAddr {
    let embedder = OllamaClient::new(&ollama).expect("embedding client");
    let chat = LlmClient::new(&llm).expect("chat client");
    let pipeline = QueryPipeline::new(
        Arc::new(chat),
        Arc::new(embedder),
        Arc::new(IndexCache::new(index_path)),
    )
    .with_top_k(top_k);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(server::serve(
        listener,
        AppState::new(pipeline),
        std::future::pending(),
    ));
    addr
}
