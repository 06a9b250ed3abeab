//! Append-only audit log of executed searches.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::eid::Eid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    pub id: Eid,
    /// Source URL for URL searches; absent for uploaded bytes.
    pub image_url: Option<String>,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl QueryRecord {
    pub fn new(image_url: Option<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: Eid::new(),
            image_url,
            embedding,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("audit backend error: {0}")]
    Backend(String),
}

/// Write path for query records.
///
/// Appends never block readers of the catalog and never fail a search; the
/// caller only logs the error.
pub trait QueryLog: Send + Sync {
    fn append(&self, record: QueryRecord) -> Result<(), AuditError>;
}

/// Query log kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryQueryLog {
    records: RwLock<Vec<QueryRecord>>,
}

impl MemoryQueryLog {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every record, oldest first.
    #[cfg(test)]
    pub fn records(&self) -> Vec<QueryRecord> {
        self.records
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl QueryLog for MemoryQueryLog {
    fn append(&self, record: QueryRecord) -> Result<(), AuditError> {
        self.records
            .write()
            .map_err(|e| AuditError::Backend(format!("Lock poisoned: {}", e)))?
            .push(record);
        Ok(())
    }
}

/// Query log appended to a JSON-lines file, one record per line.
#[derive(Debug)]
pub struct FileQueryLog {
    file: Mutex<File>,
}

impl FileQueryLog {
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::info!("Appending query records to {}", path.display());

        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl QueryLog for FileQueryLog {
    fn append(&self, record: QueryRecord) -> Result<(), AuditError> {
        // serialize outside the lock
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = self
            .file
            .lock()
            .map_err(|e| AuditError::Backend(format!("Lock poisoned: {}", e)))?;
        file.write_all(&line)?;
        Ok(())
    }
}
