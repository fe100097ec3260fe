use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("pdf extraction failed for {path:?}: {message}")]
    Pdf { path: PathBuf, message: String },
    #[error("unsupported input format: {0:?}")]
    UnsupportedInput(PathBuf),
    #[error("source directory not found: {0:?}")]
    MissingSourceDir(PathBuf),
    #[error("no chunks were extracted from {0:?}")]
    NoChunks(PathBuf),
    #[error("chunk file not found: {0:?}")]
    MissingChunkFile(PathBuf),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PolicyError>;

impl From<anyhow::Error> for PolicyError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
