//! Gemini embeddings over the Generative Language REST API

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::Embedder;
use crate::config::KireiConfig;

#[derive(Debug, Clone, Copy)]
enum TaskType {
    RetrievalQuery,
    RetrievalDocument,
}

impl TaskType {
    fn as_str(self) -> &'static str {
        match self {
            TaskType::RetrievalQuery => "RETRIEVAL_QUERY",
            TaskType::RetrievalDocument => "RETRIEVAL_DOCUMENT",
        }
    }
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Embedding client for `models/{model}:embedContent`
pub struct GeminiEmbedder {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    dimension: usize,
}

impl GeminiEmbedder {
    pub fn new(api_key: Option<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model: model.into(),
            base_url: crate::constants::embeddings::DEFAULT_BASE_URL.to_string(),
            dimension,
        }
    }

    /// Build from configuration. A missing API key surfaces on first use.
    pub fn from_config(config: &KireiConfig) -> Self {
        Self::new(
            config.google_api_key.clone(),
            &config.embedding_model,
            config.collection.dimension,
        )
        .with_base_url(&config.embedding_base_url)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:embedContent", self.base_url, self.model)
    }

    fn request_body(&self, text: &str, task: TaskType) -> Value {
        json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
            "taskType": task.as_str(),
            "outputDimensionality": self.dimension,
        })
    }

    async fn embed(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        let Some(api_key) = self.api_key.as_deref() else {
            anyhow::bail!("GOOGLE_API_KEY is not configured");
        };
        debug!(model = %self.model, task = task.as_str(), "Requesting embedding");

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&self.request_body(text, task))
            .send()
            .await
            .context("Embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error {}: {}", status, body);
        }

        let parsed: EmbedContentResponse = response
            .json()
            .await
            .context("Malformed embedding response")?;
        check_dimension(parsed.embedding.values, self.dimension)
    }
}

fn check_dimension(values: Vec<f32>, expected: usize) -> Result<Vec<f32>> {
    if values.len() != expected {
        anyhow::bail!(
            "Embedding has {} dimensions, expected {}",
            values.len(),
            expected
        );
    }
    Ok(values)
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, TaskType::RetrievalQuery).await
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, TaskType::RetrievalDocument).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let embedder = GeminiEmbedder::new(Some("key".into()), "gemini-embedding-001", 3072);
        let body = embedder.request_body("富士山", TaskType::RetrievalQuery);
        assert_eq!(body["model"], "models/gemini-embedding-001");
        assert_eq!(body["content"]["parts"][0]["text"], "富士山");
        assert_eq!(body["taskType"], "RETRIEVAL_QUERY");
        assert_eq!(body["outputDimensionality"], 3072);
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let embedder =
            GeminiEmbedder::new(None, "gemini-embedding-001", 8).with_base_url("http://x/v1/");
        assert_eq!(
            embedder.endpoint(),
            "http://x/v1/models/gemini-embedding-001:embedContent"
        );
    }

    #[test]
    fn test_response_parsing_and_dimension_check() {
        let parsed: EmbedContentResponse =
            serde_json::from_value(json!({"embedding": {"values": [0.1, 0.2]}})).unwrap();
        assert_eq!(check_dimension(parsed.embedding.values, 2).unwrap().len(), 2);
        assert!(check_dimension(vec![0.1], 2).is_err());
    }

    #[test]
    fn test_from_config() {
        let config = KireiConfig {
            google_api_key: Some("k".into()),
            ..KireiConfig::default()
        };
        let embedder = GeminiEmbedder::from_config(&config);
        assert!(embedder.has_api_key());
        assert_eq!(embedder.dimension(), 3072);
        assert_eq!(embedder.model_name(), "gemini-embedding-001");
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_request() {
        let embedder = GeminiEmbedder::from_config(&KireiConfig::default());
        let err = embedder.embed_query("hello").await.unwrap_err();
        assert!(err.to_string().contains("GOOGLE_API_KEY"));
    }
}
