use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use policyqa_core::ParserConfig;
use policyqa_llm::{LlmProvider, SamplingConfig};

use crate::error::PipelineError;

pub const DEFAULT_CONFIG: &str = "policyqa.toml";

/// Upper bound on excerpts handed to answer synthesis.
pub const MAX_CONTEXT_CHUNKS: usize = 5;

/// Immutable settings shared by every pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub docs_dir: PathBuf,
    pub chunk_file: PathBuf,
    pub vector_db_dir: PathBuf,
    pub collection_name: String,
    pub top_k: usize,
    pub embed_batch_size: usize,
    pub parser: ParserConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from("data/policies"),
            chunk_file: PathBuf::from("chunks/chunked_docs.json"),
            vector_db_dir: PathBuf::from("embeddings/store"),
            collection_name: "insurance_docs".to_string(),
            top_k: MAX_CONTEXT_CHUNKS,
            embed_batch_size: 32,
            parser: ParserConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Hash,
    OpenAi,
}

impl EmbeddingProvider {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "hash" => Some(EmbeddingProvider::Hash),
            "openai" => Some(EmbeddingProvider::OpenAi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    /// Base URL of an OpenAI-compatible endpoint (hosted or local).
    pub base_url: String,
    /// Environment variable holding the endpoint key; unset means no auth.
    pub api_key_env: Option<String>,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            base_url: "http://localhost:8080/v1".to_string(),
            api_key_env: None,
            dimensions: 384,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub sampling: SamplingConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            model: None,
            timeout_secs: 60,
            sampling: SamplingConfig::default(),
        }
    }
}

impl LlmConfig {
    pub fn provider(&self) -> Result<LlmProvider, PipelineError> {
        LlmProvider::from_str(&self.provider)
            .ok_or_else(|| PipelineError::Config(format!("unknown llm provider {}", self.provider)))
    }

    pub fn model_for(&self, provider: LlmProvider) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl PipelineConfig {
    /// Defaults, then the config file (if present), then `POLICYQA_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var("POLICYQA_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
        let base = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| {
                PipelineError::Config(format!("failed to read config {}: {e}", path.display()))
            })?;
            Self::from_toml_str(&contents)?
        } else {
            Self::default()
        };
        base.with_overrides(|key| env::var(key).ok())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, PipelineError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("POLICYQA_DOCS_DIR") {
            self.docs_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("POLICYQA_CHUNK_FILE") {
            self.chunk_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("POLICYQA_VECTOR_DB_DIR") {
            self.vector_db_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("POLICYQA_COLLECTION") {
            self.collection_name = v;
        }
        if let Some(v) = lookup("POLICYQA_EMBED_PROVIDER") {
            self.embedding.provider = EmbeddingProvider::from_str(&v).ok_or_else(|| {
                PipelineError::Config(format!("unknown embedding provider {v}"))
            })?;
        }
        if let Some(v) = lookup("POLICYQA_EMBED_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("POLICYQA_EMBED_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Some(v) = lookup("POLICYQA_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Some(v) = lookup("POLICYQA_LLM_MODEL") {
            self.llm.model = Some(v);
        }
        self.validate()
    }

    fn validate(self) -> Result<Self, PipelineError> {
        if self.collection_name.trim().is_empty() {
            return Err(PipelineError::Config(
                "collection_name must not be empty".to_string(),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(PipelineError::Config(
                "embed_batch_size must be at least 1".to_string(),
            ));
        }
        self.llm.provider()?;
        Ok(self)
    }

    /// Number of neighbours requested from the store.
    pub fn retrieval_limit(&self) -> usize {
        self.top_k.clamp(1, MAX_CONTEXT_CHUNKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_the_shipped_layout() {
        let config = PipelineConfig::default();
        assert_eq!(config.collection_name, "insurance_docs");
        assert_eq!(config.chunk_file, PathBuf::from("chunks/chunked_docs.json"));
        assert_eq!(config.retrieval_limit(), 5);
        assert_eq!(config.parser.min_chunk_chars, 20);
        assert_eq!(config.llm.provider().unwrap(), LlmProvider::Groq);
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            collection_name = "motor_docs"
            top_k = 12

            [parser]
            extensions = ["pdf", "txt"]

            [embedding]
            provider = "openai"
            base_url = "http://tei:80/v1"

            [llm]
            provider = "local"
            sampling = { temperature = 0.0 }
            "#,
        )
        .unwrap();
        assert_eq!(config.collection_name, "motor_docs");
        assert_eq!(config.retrieval_limit(), MAX_CONTEXT_CHUNKS);
        assert_eq!(config.parser.extensions, vec!["pdf", "txt"]);
        assert_eq!(config.parser.min_chunk_chars, 20);
        assert_eq!(config.embedding.provider, EmbeddingProvider::OpenAi);
        assert_eq!(config.llm.sampling.temperature, 0.0);
        assert_eq!(config.llm.sampling.max_tokens, 2048);
        assert_eq!(config.llm.model_for(LlmProvider::Local), "local");
    }

    #[test]
    fn environment_overrides_apply_last() {
        let vars: HashMap<&str, &str> = [
            ("POLICYQA_COLLECTION", "health_docs"),
            ("POLICYQA_LLM_PROVIDER", "openai"),
            ("POLICYQA_LLM_MODEL", "gpt-4o-mini"),
            ("POLICYQA_EMBED_PROVIDER", "hash"),
        ]
        .into_iter()
        .collect();
        let config = PipelineConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.collection_name, "health_docs");
        assert_eq!(config.llm.provider().unwrap(), LlmProvider::OpenAi);
        assert_eq!(config.llm.model_for(LlmProvider::OpenAi), "gpt-4o-mini");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(PipelineConfig::from_toml_str("collection_name = \"\"").is_err());
        assert!(PipelineConfig::from_toml_str("[llm]\nprovider = \"gemini\"").is_err());
        assert!(PipelineConfig::default()
            .with_overrides(|key| (key == "POLICYQA_EMBED_PROVIDER").then(|| "onnx".to_string()))
            .is_err());
    }
}
