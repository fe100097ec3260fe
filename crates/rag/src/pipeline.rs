use std::sync::Arc;

use tracing::{info, warn};

use policyqa_llm::{LlmBackend, LlmClient, UnavailableBackend};

use crate::answer::Answer;
use crate::config::{LlmConfig, PipelineConfig};
use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::indexer::build_embedder;
use crate::store::{QueryHit, VectorStore};
use crate::synthesizer::AnswerSynthesizer;

#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// The collection exists but nothing was retrieved; no LLM call is made.
    NoRelevantDocuments,
    Answered {
        retrieved: Vec<QueryHit>,
        answer: Answer,
    },
}

/// Embed, retrieve the nearest excerpts, synthesize an answer.
#[derive(Clone)]
pub struct QueryPipeline {
    config: Arc<PipelineConfig>,
    embedder: Arc<dyn Embedder>,
    synthesizer: AnswerSynthesizer,
}

impl QueryPipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmBackend>,
    ) -> Self {
        let synthesizer =
            AnswerSynthesizer::new(llm, config.llm.sampling, embedder.model_name().to_string());
        Self {
            config,
            embedder,
            synthesizer,
        }
    }

    /// Wires the configured embedder and LLM client.
    pub fn from_config(config: Arc<PipelineConfig>) -> Result<Self, PipelineError> {
        let embedder = Arc::new(build_embedder(&config)?);
        let llm = build_llm(&config.llm)?;
        Ok(Self::new(config, embedder, llm))
    }

    /// Nearest chunks for `query`, closest first. Fails closed when the store
    /// or collection has not been built yet.
    pub fn retrieve(&self, query: &str) -> Result<Vec<QueryHit>, PipelineError> {
        let dir = &self.config.vector_db_dir;
        let name = &self.config.collection_name;
        if !VectorStore::exists(dir) {
            return Err(PipelineError::MissingPrecondition(format!(
                "No document collection found at {}. Process the documents first.",
                dir.display()
            )));
        }
        let store =
            VectorStore::open(dir).map_err(|e| PipelineError::external("vector store", e))?;
        let collection = store
            .get_collection(name)
            .map_err(|e| PipelineError::external("vector store", e))?
            .ok_or_else(|| {
                PipelineError::MissingPrecondition(format!(
                    "No document collection named {name}. Process the documents first."
                ))
            })?;
        let embedding = self
            .embedder
            .embed(query)
            .map_err(|e| PipelineError::external("query embedding", e))?;
        store
            .query(&collection, &embedding, self.config.retrieval_limit())
            .map_err(|e| PipelineError::external("vector search", e))
    }

    pub fn run(&self, query: &str) -> Result<QueryOutcome, PipelineError> {
        let retrieved = self.retrieve(query)?;
        if retrieved.is_empty() {
            warn!(collection = %self.config.collection_name, "no relevant documents found");
            return Ok(QueryOutcome::NoRelevantDocuments);
        }
        info!(retrieved = retrieved.len(), "context retrieved");
        let answer = self.synthesizer.synthesize(query, &retrieved);
        Ok(QueryOutcome::Answered { retrieved, answer })
    }
}

/// Client for the configured provider. A client that cannot be built (for
/// example a missing API key) is replaced by a backend that reports the
/// reason on every query.
pub fn build_llm(config: &LlmConfig) -> Result<Arc<dyn LlmBackend>, PipelineError> {
    let provider = config.provider()?;
    let model = config.model_for(provider);
    match LlmClient::new(provider, model.clone(), config.timeout()) {
        Ok(client) => Ok(Arc::new(client)),
        Err(err) => {
            warn!(provider = provider.as_str(), error = %err, "llm client unavailable");
            Ok(Arc::new(UnavailableBackend::new(
                provider,
                model,
                err.to_string(),
            )))
        }
    }
}
