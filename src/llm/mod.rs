//! Streaming client for the LLM server's chat endpoint.


use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::LlmConfig;
use crate::{RelayError, Result};

/// Raw response bytes relayed from the LLM server as they arrive
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Anything that can turn a prompt into a streamed chat response
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_chat(&self, prompt: String) -> Result<ByteStream>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone)]
pub struct LlmClient {
    chat_url: Url,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    /// The client applies no overall timeout: a generation may stream for as
    /// long as the server keeps the connection open.
    #[inline]
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RelayError::Upstream(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            chat_url: config.chat_url()?,
            model: config.model.clone(),
            http,
        })
    }

    #[inline]
    pub fn chat_url(&self) -> &Url {
        &self.chat_url
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatBackend for LlmClient {
    async fn stream_chat(&self, prompt: String) -> Result<ByteStream> {
        let request = ChatRequest {
            model: &self.model,
            stream: true,
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
        };

        debug!(
            "Sending chat request to {} (model {}, prompt length {})",
            self.chat_url,
            self.model,
            prompt.len()
        );

        let response = self
            .http
            .post(self.chat_url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("LLM server at {} unreachable: {}", self.chat_url, e);
                RelayError::Upstream(format!("request to {} failed: {e}", self.chat_url))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("LLM server returned HTTP {}: {}", status, body);
            return Err(RelayError::Upstream(format!(
                "{} returned HTTP {status}: {body}",
                self.chat_url
            )));
        }

        let chat_url = self.chat_url.clone();
        Ok(response
            .bytes_stream()
            .map_err(move |e| {
                warn!("Stream from {} broke off: {}", chat_url, e);
                RelayError::Upstream(format!("stream interrupted: {e}"))
            })
            .boxed())
    }
}
