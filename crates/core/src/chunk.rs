use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};

/// Label used when no section or clause could be detected.
pub const NOT_AVAILABLE: &str = "N/A";

/// One unit of extracted policy text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub index: usize,
    pub text: String,
    #[serde(default = "not_available")]
    pub section: String,
    #[serde(default = "not_available")]
    pub clause: String,
}

impl Chunk {
    /// Identifier used for the record in the vector collection.
    pub fn record_id(&self) -> String {
        format!("{}_{}", self.doc_id, self.index)
    }
}

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

/// Writes the full chunk list as an indented JSON array, replacing any
/// previous file.
pub fn save_chunks<P: AsRef<Path>>(path: P, chunks: &[Chunk]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, chunks)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn load_chunks<P: AsRef<Path>>(path: P) -> Result<Vec<Chunk>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(PolicyError::MissingChunkFile(path.to_path_buf()));
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
