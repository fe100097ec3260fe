use anyhow::{anyhow, bail, Result};
use bytemuck::{cast_slice, pod_collect_to_vec};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const STORE_FILE: &str = "collections.sqlite";

/// Persistent collections of embedded records, one SQLite file per store
/// directory.
#[derive(Clone)]
pub struct VectorStore {
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub doc_id: String,
    pub index: usize,
    pub section: String,
    pub clause: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddedRecord {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub id: String,
    pub document: String,
    pub metadata: RecordMetadata,
    pub distance: f32,
}

impl VectorStore {
    /// Opens the store under `dir`, creating the directory and schema.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let store = Self {
            path: dir.join(STORE_FILE),
        };
        store.init()?;
        Ok(store)
    }

    /// True when a store was previously created under `dir`.
    pub fn exists<P: AsRef<Path>>(dir: P) -> bool {
        dir.as_ref().join(STORE_FILE).is_file()
    }

    fn connection(&self) -> Result<Connection> {
        Ok(Connection::open(&self.path)?)
    }

    fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS collections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                dimensions INTEGER,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS records (
                collection_id INTEGER NOT NULL,
                id TEXT NOT NULL,
                document TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL,
                PRIMARY KEY (collection_id, id),
                FOREIGN KEY(collection_id) REFERENCES collections(id)
            );
            "#,
        )?;
        Ok(())
    }

    pub fn get_collection(&self, name: &str) -> Result<Option<Collection>> {
        let conn = self.connection()?;
        let id = conn
            .query_row("SELECT id FROM collections WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(id.map(|id| Collection {
            id,
            name: name.to_string(),
        }))
    }

    pub fn create_collection(&self, name: &str) -> Result<Collection> {
        if self.get_collection(name)?.is_some() {
            bail!("collection {name} already exists");
        }
        let conn = self.connection()?;
        conn.execute("INSERT INTO collections (name) VALUES (?1)", params![name])?;
        Ok(Collection {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    /// Drops the collection and its records. Returns whether it existed.
    pub fn delete_collection(&self, name: &str) -> Result<bool> {
        let Some(collection) = self.get_collection(name)? else {
            return Ok(false);
        };
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM records WHERE collection_id = ?1",
            params![collection.id],
        )?;
        tx.execute(
            "DELETE FROM collections WHERE id = ?1",
            params![collection.id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Inserts or replaces records by id. All vectors in a collection share
    /// one dimensionality, fixed by the first insert.
    pub fn add(&self, collection: &Collection, records: &[EmbeddedRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let stored: Option<i64> = tx.query_row(
            "SELECT dimensions FROM collections WHERE id = ?1",
            params![collection.id],
            |row| row.get(0),
        )?;
        let dims = match stored {
            Some(d) => d as usize,
            None => records[0].embedding.len(),
        };
        for record in records {
            if record.embedding.len() != dims {
                bail!(
                    "record {} has {} dimensions, collection expects {}",
                    record.id,
                    record.embedding.len(),
                    dims
                );
            }
            let metadata = serde_json::to_string(&record.metadata)?;
            tx.execute(
                "INSERT OR REPLACE INTO records (collection_id, id, document, embedding, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    collection.id,
                    record.id,
                    record.document,
                    cast_slice::<f32, u8>(&record.embedding),
                    metadata
                ],
            )?;
        }
        if stored.is_none() {
            tx.execute(
                "UPDATE collections SET dimensions = ?1 WHERE id = ?2",
                params![dims as i64, collection.id],
            )?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    pub fn count(&self, collection: &Collection) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection_id = ?1",
            params![collection.id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Nearest records by cosine distance, closest first.
    pub fn query(
        &self,
        collection: &Collection,
        query_embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<QueryHit>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, document, embedding, metadata FROM records WHERE collection_id = ?1",
        )?;
        let mut rows = stmt.query(params![collection.id])?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(2)?;
            let embedding = decode_embedding(&blob)?;
            if embedding.len() != query_embedding.len() {
                bail!(
                    "query has {} dimensions, collection {} stores {}",
                    query_embedding.len(),
                    collection.name,
                    embedding.len()
                );
            }
            let metadata: String = row.get(3)?;
            hits.push(QueryHit {
                id,
                document: row.get(1)?,
                metadata: serde_json::from_str(&metadata)?,
                distance: cosine_distance(query_embedding, &embedding),
            });
        }
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(n_results);
        Ok(hits)
    }
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % std::mem::size_of::<f32>() != 0 {
        return Err(anyhow!("invalid embedding blob of {} bytes", blob.len()));
    }
    Ok(pod_collect_to_vec::<u8, f32>(blob))
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 1.0;
    }
    1.0 - dot / (a_norm.sqrt() * b_norm.sqrt())
}
