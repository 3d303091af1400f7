//! Generated content store.
//!
//! Layout on disk: `{ key: { query type: { content, generated } } }`. Entries
//! are only ever added or replaced; nothing is removed during a run.

use crate::error::Result;
use crate::item::QueryType;
use crate::persist;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// One generated answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    /// Markdown content.
    pub content: String,
    /// When it was generated.
    pub generated: DateTime<Utc>,
}

/// The persisted output document.
pub type OutputRecord = BTreeMap<String, BTreeMap<QueryType, OutputEntry>>;

/// Owner of the output document and its file.
#[derive(Debug)]
pub struct OutputStore {
    path: PathBuf,
    record: OutputRecord,
}

impl OutputStore {
    /// An empty store; nothing is read from disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            record: OutputRecord::new(),
        }
    }

    /// Load the document at `path`. A missing file is an empty store.
    ///
    /// Unlike progress, an unreadable output file is an error: starting
    /// over would overwrite content that was already paid for.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let record = persist::read_json::<OutputRecord>(&path)
            .await?
            .unwrap_or_default();
        if !record.is_empty() {
            info!(
                path = %path.display(),
                items = record.len(),
                "Loaded existing output"
            );
        }
        Ok(Self { path, record })
    }

    /// Path of the output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying document.
    pub fn record(&self) -> &OutputRecord {
        &self.record
    }

    /// Merge one generated answer, replacing any previous one for the unit.
    pub fn insert(&mut self, key: &str, query: QueryType, content: String) {
        self.record.entry(key.to_string()).or_default().insert(
            query,
            OutputEntry {
                content,
                generated: Utc::now(),
            },
        );
    }

    /// Whether content exists for the unit.
    pub fn contains(&self, key: &str, query: QueryType) -> bool {
        self.record
            .get(key)
            .is_some_and(|types| types.contains_key(&query))
    }

    /// Stored content for the unit.
    pub fn get(&self, key: &str, query: QueryType) -> Option<&OutputEntry> {
        self.record.get(key).and_then(|types| types.get(&query))
    }

    /// Number of items with at least one entry.
    pub fn len(&self) -> usize {
        self.record.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    /// Number of stored `(item, query type)` entries.
    pub fn entry_count(&self) -> usize {
        self.record.values().map(BTreeMap::len).sum()
    }

    /// Atomically write the document to disk.
    pub async fn save(&self) -> Result<()> {
        persist::write_json_atomic(&self.path, &self.record).await
    }
}
