use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::env;

use policyqa_core::{HashEmbedder, HashEmbedderConfig};

use crate::config::{EmbeddingConfig, EmbeddingProvider};

/// Text to vector function shared by indexing and querying.
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inputs = vec![text.to_string()];
        self.embed_batch(&inputs)?
            .pop()
            .ok_or_else(|| anyhow!("embedding backend returned no vector"))
    }
}

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbeddingClient),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
    model_name: String,
}

impl EmbeddingClient {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        match config.provider {
            EmbeddingProvider::OpenAi => {
                let api_key = match &config.api_key_env {
                    Some(var) => Some(
                        env::var(var)
                            .map_err(|_| anyhow!("{var} is required for openai embeddings"))?,
                    ),
                    None => None,
                };
                Ok(Self {
                    backend: EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new(
                        &config.model,
                        &config.base_url,
                        api_key,
                    )?),
                    model_name: config.model.clone(),
                })
            }
            EmbeddingProvider::Hash => Ok(Self::hash(config.dimensions)),
        }
    }

    pub fn hash(dimensions: usize) -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig {
                dimensions,
                ..HashEmbedderConfig::default()
            })),
            model_name: format!("hash-embedder-{dimensions}"),
        }
    }
}

impl Embedder for EmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(inputs
                .iter()
                .map(|text| embedder.embed_text(text))
                .collect()),
            EmbeddingBackend::OpenAi(client) => client.embed_batch(inputs),
        }
    }
}

/// Client for any endpoint speaking the OpenAI `/embeddings` protocol.
#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiEmbeddingClient {
    pub fn new(model: &str, base_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("failed to build embedding http client")?;
        Ok(Self {
            http,
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let mut request = self.http.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .with_context(|| format!("embedding request to {url} failed"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "embedding request failed: {}",
                response.status()
            ));
        }
        let parsed: OpenAiEmbeddingResponse = response.json()?;
        collect_vectors(parsed, inputs.len())
    }
}

fn collect_vectors(mut parsed: OpenAiEmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    if parsed.data.len() != expected {
        return Err(anyhow!(
            "embedding backend returned {} vectors for {} inputs",
            parsed.data.len(),
            expected
        ));
    }
    parsed.data.sort_by_key(|d| d.index);
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_client_embeds_query_like_documents() {
        let client = EmbeddingClient::hash(64);
        let batch = client
            .embed_batch(&["knee surgery".to_string(), "dental".to_string()])
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(client.embed("knee surgery").unwrap(), batch[0]);
        assert_eq!(client.model_name(), "hash-embedder-64");
    }

    #[test]
    fn response_vectors_follow_input_order() {
        let parsed: OpenAiEmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#,
        )
        .unwrap();
        let vectors = collect_vectors(parsed, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn short_responses_are_rejected() {
        let parsed: OpenAiEmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"index":0,"embedding":[1.0]}]}"#).unwrap();
        assert!(collect_vectors(parsed, 2).is_err());
    }

    #[test]
    fn missing_key_variable_fails_construction() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::OpenAi,
            api_key_env: Some("POLICYQA_TEST_UNSET_EMBED_KEY".to_string()),
            ..EmbeddingConfig::default()
        };
        assert!(EmbeddingClient::from_config(&config).is_err());
    }
}
