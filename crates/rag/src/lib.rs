pub mod answer;
pub mod config;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod pipeline;
pub mod store;
pub mod synthesizer;

pub use answer::{format_answer, Answer, AuditLog, Confidence, Decision, QueryEcho, SupportingParagraph};
pub use config::{EmbeddingConfig, EmbeddingProvider, LlmConfig, PipelineConfig, MAX_CONTEXT_CHUNKS};
pub use embedding::{Embedder, EmbeddingBackend, EmbeddingClient, OpenAiEmbeddingClient};
pub use error::{ErrorKind, PipelineError};
pub use indexer::{build_embedder, parse_documents, process_documents, EmbeddingIndexer, IndexReport};
pub use pipeline::{build_llm, QueryOutcome, QueryPipeline};
pub use store::{Collection, EmbeddedRecord, QueryHit, RecordMetadata, VectorStore};
pub use synthesizer::AnswerSynthesizer;
pub use policyqa_llm::{LlmBackend, LlmClient, LlmProvider, SamplingConfig, UnavailableBackend};
