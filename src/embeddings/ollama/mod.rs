
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{Embedder, Embedding};
use crate::config::OllamaConfig;
use crate::{RelayError, Result};

const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// Blocking client for the Ollama embedding API
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config.ollama_url()?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping()?;
        self.validate_model()?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self.endpoint("/api/version")?;
        debug!("Pinging Ollama server at {}", url);
        self.get_text(&url)?;
        Ok(())
    }

    /// Validate that the configured model is available.
    ///
    /// Ollama reports tagged names, so `nomic-embed-text` matches
    /// `nomic-embed-text:latest`.
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        let models = self.list_models()?;

        let wanted = self.model.as_str();
        let found = models.iter().any(|m| {
            m.name == wanted || m.name.strip_suffix(":latest").is_some_and(|base| base == wanted)
        });

        if found {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            Err(RelayError::EmbeddingService(format!(
                "model '{}' is not available; available models: {:?}",
                self.model, available_models
            )))
        }
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("/api/tags")?;
        debug!("Fetching available models from {}", url);

        let response_text = self.get_text(&url)?;
        let models_response: ModelsResponse = serde_json::from_str(&response_text)
            .map_err(|e| RelayError::EmbeddingService(format!("malformed model list: {e}")))?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let url = self.endpoint("/api/embed")?;
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RelayError::EmbeddingService(format!("cannot encode request: {e}")))?;

        let response_text = self.post_json(&url, &request_json)?;
        let response: EmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| RelayError::EmbeddingService(format!("malformed response: {e}")))?;

        if response.embeddings.len() != texts.len() {
            return Err(RelayError::EmbeddingService(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        if response.embeddings.iter().any(Vec::is_empty) {
            return Err(RelayError::EmbeddingService(
                "received an empty embedding vector".to_string(),
            ));
        }

        Ok(response.embeddings)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RelayError::EmbeddingService(format!("invalid endpoint {path}: {e}")))
    }

    fn get_text(&self, url: &Url) -> Result<String> {
        self.agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| request_error(url, &e))
    }

    fn post_json(&self, url: &Url, body: &str) -> Result<String> {
        self.agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(body)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| request_error(url, &e))
    }
}

impl Embedder for OllamaClient {
    #[inline]
    fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    fn embed(&self, text: &str) -> Result<Embedding> {
        debug!("Generating embedding for text (length: {})", text.len());
        let mut embeddings = self.embed_single_batch(&[text.to_string()])?;
        embeddings
            .pop()
            .ok_or_else(|| RelayError::EmbeddingService("no embedding returned".to_string()))
    }

    #[inline]
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            results.extend(self.embed_single_batch(batch)?);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    #[inline]
    fn batch_size(&self) -> usize {
        self.batch_size as usize
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn request_error(url: &Url, error: &ureq::Error) -> RelayError {
    match error {
        ureq::Error::StatusCode(status) => {
            warn!("Embedding service at {} returned HTTP {}", url, status);
            RelayError::EmbeddingService(format!("{url} returned HTTP {status}"))
        }
        other => {
            warn!("Embedding service request to {} failed: {}", url, other);
            RelayError::EmbeddingService(format!("request to {url} failed: {other}"))
        }
    }
}
