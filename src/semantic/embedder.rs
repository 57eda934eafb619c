//! Embedding backends
//!
//! Embeds column descriptions and user terms into a fixed-dimension vector
//! space using an OpenAI-compatible embeddings API.

use crate::config::EmbeddingConfig;
use crate::error::{NlqError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed one piece of text. Errors mean the backend is unavailable and
    /// the matcher should fall back to keyword scoring.
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Embedding client using the OpenAI embeddings API
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String, // e.g., "text-embedding-3-small"
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NlqError::Embedding(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| NlqError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NlqError::Embedding(format!("Embedding API returned status {}", status)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NlqError::Embedding(format!("Failed to parse embedding response: {}", e)))?;

        parse_embedding_response(&response_json)
    }
}

fn parse_embedding_response(response_json: &serde_json::Value) -> Result<Embedding> {
    let data = response_json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| NlqError::Embedding("No embedding data in response".to_string()))?;

    let embedding: Embedding = data
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| NlqError::Embedding("No embedding vector in response".to_string()))?
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect();

    if embedding.is_empty() {
        return Err(NlqError::Embedding("Empty embedding vector".to_string()));
    }
    Ok(embedding)
}
