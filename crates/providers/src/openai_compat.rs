//! OpenAI-compatible generation and embedding client.
//!
//! Works with: OpenAI, Ollama (`/v1`), vLLM, Triton's OpenAI frontend,
//! OpenRouter and any other endpoint exposing `/chat/completions` and
//! `/embeddings`.
//!
//! The client makes exactly one request per call. Retries belong to
//! whoever sits in front of the endpoint.

use async_trait::async_trait;
use memtier_core::error::PortError;
use memtier_core::provider::{EmbeddingPort, GenerationPort};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// One endpoint serving both chat completions and embeddings.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    api_key: String,
    generation_model: String,
    embedding_model: String,
    dimension: usize,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Create a client for `base_url` (e.g. `http://localhost:11434/v1`).
    ///
    /// `dimension` is the length of the vectors the embedding model returns;
    /// responses of any other length are rejected.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| PortError::Provider(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            generation_model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
            dimension,
            client,
        })
    }

    /// Ollama on its default port (convenience constructor).
    pub fn ollama(base_url: Option<&str>, dimension: usize) -> Result<Self, PortError> {
        Ok(Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
            dimension,
        )?
        .with_models("llama3.2", "nomic-embed-text"))
    }

    pub fn with_models(
        mut self,
        generation_model: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        self.generation_model = generation_model.into();
        self.embedding_model = embedding_model.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_body(&self, prompt: &str, system: &str) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ApiMessage {
                role: "system".into(),
                content: Some(system.into()),
            });
        }
        messages.push(ApiMessage {
            role: "user".into(),
            content: Some(prompt.into()),
        });

        serde_json::json!({
            "model": self.generation_model,
            "messages": messages,
            "temperature": 0.0,
            "stream": false,
        })
    }

    /// Map a non-200 status to a provider error.
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response, PortError> {
        let status = response.status().as_u16();
        match status {
            200 => Ok(response),
            429 => Err(PortError::Provider(format!("{} rate limited the request", self.name))),
            401 | 403 => Err(PortError::Provider(format!(
                "{} rejected the API key or permissions",
                self.name
            ))),
            _ => {
                let body = response.text().await.unwrap_or_default();
                warn!(provider = %self.name, status, body = %body, "Provider returned error");
                Err(PortError::Provider(format!("{} returned HTTP {status}: {body}", self.name)))
            }
        }
    }
}

#[async_trait]
impl GenerationPort for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        system: &str,
        timeout: Duration,
    ) -> Result<String, PortError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(provider = %self.name, model = %self.generation_model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.chat_body(prompt, system))
            .send()
            .await
            .map_err(|e| network_error(e, "chat/completions", timeout))?;

        let api_response: ApiResponse = self
            .check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| PortError::Provider(format!("Failed to parse response: {e}")))?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PortError::Provider("No choices in response".into()))
    }
}

#[async_trait]
impl EmbeddingPort for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PortError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": [text],
            "encoding_format": "float",
        });

        debug!(provider = %self.name, model = %self.embedding_model, "Sending embedding request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::Provider(format!("embeddings request failed: {e}")))?;

        let api_resp: EmbeddingApiResponse = self
            .check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| PortError::Provider(format!("Failed to parse embedding response: {e}")))?;

        let embedding = api_resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| PortError::Provider("No embedding in response".into()))?;

        if embedding.len() != self.dimension {
            return Err(PortError::Dimension {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }
}

fn network_error(e: reqwest::Error, endpoint: &str, timeout: Duration) -> PortError {
    if e.is_timeout() {
        PortError::Timeout {
            operation: endpoint.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        PortError::Provider(format!("{endpoint} request failed: {e}"))
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
