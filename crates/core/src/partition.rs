use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{PolicyError, Result};

static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t\r\f]*\n").expect("blank line pattern"));

/// A block of text extracted from a document, in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub page: u32,
    pub text: String,
}

impl Element {
    pub fn new(page: u32, text: impl Into<String>) -> Self {
        Self {
            page,
            text: text.into(),
        }
    }
}

/// Splits a document into ordered text elements.
pub trait Partitioner: Send + Sync {
    fn partition(&self, path: &Path) -> Result<Vec<Element>>;
}

/// Default partitioner: PDFs via `pdf-extract`, `.txt`/`.md` read directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilePartitioner;

impl Partitioner for FilePartitioner {
    fn partition(&self, path: &Path) -> Result<Vec<Element>> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => pdf_elements(path),
            "txt" | "md" | "markdown" => {
                let bytes = fs::read(path)?;
                Ok(split_elements(0, &String::from_utf8_lossy(&bytes)))
            }
            _ => Err(PolicyError::UnsupportedInput(path.to_path_buf())),
        }
    }
}

fn pdf_elements(path: &Path) -> Result<Vec<Element>> {
    // pdf-extract panics on some malformed inputs
    let pages = match std::panic::catch_unwind(|| pdf_extract::extract_text_by_pages(path)) {
        Ok(Ok(pages)) => pages,
        Ok(Err(err)) => {
            return Err(PolicyError::Pdf {
                path: path.to_path_buf(),
                message: err.to_string(),
            })
        }
        Err(_) => {
            return Err(PolicyError::Pdf {
                path: path.to_path_buf(),
                message: "extractor panicked".to_string(),
            })
        }
    };
    let mut elements = Vec::new();
    for (idx, page) in pages.iter().enumerate() {
        elements.extend(split_elements(idx as u32, page));
    }
    Ok(elements)
}

/// Splits page text on blank lines; whitespace-only blocks are dropped.
pub fn split_elements(page: u32, text: &str) -> Vec<Element> {
    let normalized = text.replace("\r\n", "\n");
    BLANK_LINES
        .split(&normalized)
        .filter(|block| !block.trim().is_empty())
        .map(|block| Element::new(page, block.trim_matches('\n')))
        .collect()
}
