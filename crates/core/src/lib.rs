mod chunk;
mod embedding;
mod error;
mod parser;
mod partition;

pub use chunk::{load_chunks, save_chunks, Chunk, NOT_AVAILABLE};
pub use embedding::{HashEmbedder, HashEmbedderConfig};
pub use error::{PolicyError, Result};
pub use parser::{detect_labels, DocumentParser, ParseReport, ParserConfig};
pub use partition::{split_elements, Element, FilePartitioner, Partitioner};
