use serde::Serialize;
use tracing::{info, warn};

use policyqa_core::{load_chunks, Chunk, DocumentParser, ParseReport};

use crate::config::PipelineConfig;
use crate::embedding::{Embedder, EmbeddingClient};
use crate::error::PipelineError;
use crate::store::{EmbeddedRecord, RecordMetadata, VectorStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub chunks: usize,
    pub indexed: usize,
    pub batches: usize,
    pub failed_batches: usize,
}

/// Rebuilds the configured collection from the chunk file.
pub struct EmbeddingIndexer<'a> {
    config: &'a PipelineConfig,
    embedder: &'a dyn Embedder,
}

impl<'a> EmbeddingIndexer<'a> {
    pub fn new(config: &'a PipelineConfig, embedder: &'a dyn Embedder) -> Self {
        Self { config, embedder }
    }

    /// Drops and recreates the collection, then embeds chunks batch by
    /// batch. A failing batch is logged and skipped.
    pub fn run(&self) -> Result<IndexReport, PipelineError> {
        let chunks = load_chunks(&self.config.chunk_file)?;
        let store = VectorStore::open(&self.config.vector_db_dir)
            .map_err(|e| PipelineError::external("vector store", e))?;
        let name = &self.config.collection_name;
        if store
            .delete_collection(name)
            .map_err(|e| PipelineError::external("vector store", e))?
        {
            info!(collection = %name, "dropped existing collection");
        }
        let collection = store
            .create_collection(name)
            .map_err(|e| PipelineError::external("vector store", e))?;

        let mut report = IndexReport {
            chunks: chunks.len(),
            ..IndexReport::default()
        };
        for (batch_no, batch) in chunks.chunks(self.config.embed_batch_size).enumerate() {
            report.batches += 1;
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = match self.embedder.embed_batch(&texts) {
                Ok(v) if v.len() == batch.len() => v,
                Ok(v) => {
                    warn!(
                        batch = batch_no,
                        expected = batch.len(),
                        got = v.len(),
                        "embedding count mismatch, skipping batch"
                    );
                    report.failed_batches += 1;
                    continue;
                }
                Err(err) => {
                    warn!(batch = batch_no, error = %format!("{err:#}"), "embedding failed, skipping batch");
                    report.failed_batches += 1;
                    continue;
                }
            };
            let records: Vec<EmbeddedRecord> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, embedding)| to_record(chunk, embedding))
                .collect();
            match store.add(&collection, &records) {
                Ok(n) => report.indexed += n,
                Err(err) => {
                    warn!(batch = batch_no, error = %format!("{err:#}"), "insert failed, skipping batch");
                    report.failed_batches += 1;
                }
            }
        }
        info!(
            collection = %name,
            chunks = report.chunks,
            indexed = report.indexed,
            failed_batches = report.failed_batches,
            "index rebuilt"
        );
        Ok(report)
    }
}

fn to_record(chunk: &Chunk, embedding: Vec<f32>) -> EmbeddedRecord {
    EmbeddedRecord {
        id: chunk.record_id(),
        document: chunk.text.clone(),
        embedding,
        metadata: RecordMetadata {
            doc_id: chunk.doc_id.clone(),
            index: chunk.index,
            section: chunk.section.clone(),
            clause: chunk.clause.clone(),
        },
    }
}

/// Builds the configured embedder; construction problems abort the caller.
pub fn build_embedder(config: &PipelineConfig) -> Result<EmbeddingClient, PipelineError> {
    EmbeddingClient::from_config(&config.embedding)
        .map_err(|e| PipelineError::external("embedding model", e))
}

pub fn parse_documents(config: &PipelineConfig) -> Result<ParseReport, PipelineError> {
    let parser = DocumentParser::new(config.parser.clone());
    Ok(parser.run(&config.docs_dir, &config.chunk_file)?)
}

/// Parse then index, stopping at the first failing step.
pub fn process_documents(
    config: &PipelineConfig,
    embedder: &dyn Embedder,
) -> Result<(ParseReport, IndexReport), PipelineError> {
    let parsed = parse_documents(config)?;
    let indexed = EmbeddingIndexer::new(config, embedder).run()?;
    Ok((parsed, indexed))
}
