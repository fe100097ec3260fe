use policyqa_core::PolicyError;
use thiserror::Error;

/// Broad failure classes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Something the user must provide or run first is absent.
    MissingPrecondition,
    /// Model, vector store or LLM call failed.
    ExternalService,
    /// Stored data could not be decoded.
    DataShape,
    Config,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    MissingPrecondition(String),
    #[error("{stage} failed: {source:#}")]
    ExternalService {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Core(#[from] PolicyError),
    #[error("invalid config: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn external(stage: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::ExternalService {
            stage,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::MissingPrecondition(_) => ErrorKind::MissingPrecondition,
            PipelineError::ExternalService { .. } => ErrorKind::ExternalService,
            PipelineError::Config(_) => ErrorKind::Config,
            PipelineError::Core(err) => match err {
                PolicyError::MissingSourceDir(_)
                | PolicyError::NoChunks(_)
                | PolicyError::MissingChunkFile(_) => ErrorKind::MissingPrecondition,
                PolicyError::SerdeJson(_) => ErrorKind::DataShape,
                _ => ErrorKind::ExternalService,
            },
        }
    }
}
