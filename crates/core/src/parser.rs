use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::{save_chunks, Chunk, NOT_AVAILABLE};
use crate::error::{PolicyError, Result};
use crate::partition::{Element, FilePartitioner, Partitioner};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Elements whose trimmed text has this many characters or fewer are dropped.
    pub min_chunk_chars: usize,
    pub extensions: Vec<String>,
    pub label_scan_lines: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            min_chunk_chars: 20,
            extensions: vec!["pdf".to_string()],
            label_scan_lines: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    pub documents_seen: usize,
    pub documents_parsed: usize,
    pub documents_failed: usize,
    pub chunks: usize,
}

pub struct DocumentParser<P = FilePartitioner> {
    config: ParserConfig,
    partitioner: P,
}

impl DocumentParser<FilePartitioner> {
    pub fn new(config: ParserConfig) -> Self {
        Self::with_partitioner(config, FilePartitioner)
    }
}

impl<P: Partitioner> DocumentParser<P> {
    pub fn with_partitioner(config: ParserConfig, partitioner: P) -> Self {
        Self {
            config,
            partitioner,
        }
    }

    /// Parses every recognized document under `source_dir` and writes the
    /// chunk file. Nothing is written when no chunk survives.
    pub fn run(&self, source_dir: &Path, chunk_file: &Path) -> Result<ParseReport> {
        let (chunks, mut report) = self.parse_dir(source_dir)?;
        if chunks.is_empty() {
            warn!(dir = %source_dir.display(), "no chunks extracted; chunk file left untouched");
            return Err(PolicyError::NoChunks(source_dir.to_path_buf()));
        }
        save_chunks(chunk_file, &chunks)?;
        report.chunks = chunks.len();
        info!(
            chunks = report.chunks,
            documents = report.documents_parsed,
            path = %chunk_file.display(),
            "chunk file written"
        );
        Ok(report)
    }

    /// Collects chunks across all documents, skipping files that fail to parse.
    pub fn parse_dir(&self, source_dir: &Path) -> Result<(Vec<Chunk>, ParseReport)> {
        let files = self.collect_files(source_dir)?;
        let mut report = ParseReport {
            documents_seen: files.len(),
            ..Default::default()
        };
        if files.is_empty() {
            warn!(dir = %source_dir.display(), "no documents found");
        }
        let mut chunks = Vec::new();
        for path in files {
            let doc_id = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => {
                    warn!(path = %path.display(), "skipping file without a usable name");
                    report.documents_failed += 1;
                    continue;
                }
            };
            match self.partitioner.partition(&path) {
                Ok(elements) => {
                    let produced = self.chunks_for_document(&doc_id, &elements);
                    debug!(
                        doc_id = %doc_id,
                        elements = elements.len(),
                        chunks = produced.len(),
                        "document parsed"
                    );
                    chunks.extend(produced);
                    report.documents_parsed += 1;
                }
                Err(err) => {
                    warn!(doc_id = %doc_id, error = %err, "failed to parse document; skipping");
                    report.documents_failed += 1;
                }
            }
        }
        report.chunks = chunks.len();
        Ok((chunks, report))
    }

    /// Recognized documents directly inside `source_dir`, in file-name order.
    pub fn collect_files(&self, source_dir: &Path) -> Result<Vec<PathBuf>> {
        if !source_dir.is_dir() {
            warn!(dir = %source_dir.display(), "source directory not found");
            return Err(PolicyError::MissingSourceDir(source_dir.to_path_buf()));
        }
        let files = WalkDir::new(source_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| self.is_recognized(p))
            .collect();
        Ok(files)
    }

    fn is_recognized(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.config
            .extensions
            .iter()
            .any(|known| known.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    pub fn chunks_for_document(&self, doc_id: &str, elements: &[Element]) -> Vec<Chunk> {
        elements
            .iter()
            .enumerate()
            .filter_map(|(index, element)| {
                let text = element.text.trim();
                if text.chars().count() <= self.config.min_chunk_chars {
                    return None;
                }
                let (section, clause) = detect_labels(text, self.config.label_scan_lines);
                Some(Chunk {
                    doc_id: doc_id.to_string(),
                    index,
                    text: text.to_string(),
                    section,
                    clause,
                })
            })
            .collect()
    }
}

/// Looks for "section"/"article" and "clause" in the first `scan_lines`
/// lines; the first matching line becomes the label.
pub fn detect_labels(text: &str, scan_lines: usize) -> (String, String) {
    let mut section = None;
    let mut clause = None;
    for line in text.lines().take(scan_lines) {
        let lower = line.to_lowercase();
        if section.is_none() && (lower.contains("section") || lower.contains("article")) {
            section = Some(line.trim().to_string());
        }
        if clause.is_none() && lower.contains("clause") {
            clause = Some(line.trim().to_string());
        }
    }
    (
        section.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        clause.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
    )
}
