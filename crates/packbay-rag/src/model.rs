//! Embedding and generation backend client.
//!
//! Speaks the Ollama-compatible API: `POST /api/embeddings` for vectors and
//! `POST /api/generate` for answers. Same transport discipline as the
//! registry client: pooled connections, explicit timeout, no retries.
//! Backend unavailability is an expected condition — callers treat a failed
//! embedding as "absent" and fall back to lexical retrieval.

use async_trait::async_trait;
use packbay_core::ProxyConfig;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Model backend error.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model backend returned status {status}")]
    Status { status: u16 },

    #[error("model backend response missing '{field}'")]
    MissingField { field: &'static str },
}

/// Anything that can turn text into a fixed-dimensional vector.
///
/// Retrieval and ingest depend on this trait rather than on
/// [`ModelClient`], so tests inject deterministic embedders and a dead
/// backend degrades to lexical search instead of an import cycle.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Option<Vec<f32>>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

/// Client for the embedding/generation backend.
#[derive(Debug, Clone)]
pub struct ModelClient {
    http: reqwest::Client,
    base_url: String,
    embed_model: String,
    generation_model: String,
}

impl ModelClient {
    pub fn new(config: &ProxyConfig) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.backend_timeout_secs))
            .user_agent(concat!("packbay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: config.model_backend_url.trim_end_matches('/').to_string(),
            embed_model: config.embed_model.clone(),
            generation_model: config.generation_model.clone(),
        })
    }

    /// Generate an answer for `prompt`.
    pub async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&json!({
                "model": self.generation_model,
                "prompt": prompt,
                "stream": false,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
            });
        }

        let body: GenerateResponse = response.json().await?;
        body.response
            .filter(|s| !s.is_empty())
            .ok_or(ModelError::MissingField { field: "response" })
    }
}

#[async_trait]
impl Embedder for ModelClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let response = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&json!({
                "model": self.embed_model,
                "prompt": text,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
            });
        }

        let body: EmbeddingsResponse = response.json().await?;
        body.embedding
            .filter(|v| !v.is_empty())
            .ok_or(ModelError::MissingField { field: "embedding" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packbay_core::ProxyConfig;

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error_not_a_panic() {
        let config = ProxyConfig {
            model_backend_url: "http://127.0.0.1:9".to_string(),
            ..ProxyConfig::default()
        };
        let client = ModelClient::new(&config).unwrap();
        assert!(client.embed("text").await.is_err());
        assert!(client.generate("prompt").await.is_err());
    }
}
