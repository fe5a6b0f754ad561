//! Table metadata file
//!
//! One JSON document holding every table's persistent state and branch
//! history. Each change rewrites the whole file through a temp file and a
//! rename, so readers see either the old or the new document.

use crate::branch_history::BranchHistory;
use crate::error::StoreResult;
use nk_core::TableId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Per-table record the cluster layer owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePersistentState {
    pub name: String,
    #[serde(default)]
    pub primary_key: String,
    /// Bumped by the cluster layer on every configuration change
    #[serde(default)]
    pub epoch: u64,
}

impl TablePersistentState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: "id".to_string(),
            epoch: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    tables: BTreeMap<TableId, TablePersistentState>,
    #[serde(default)]
    branch_history: BTreeMap<TableId, BranchHistory>,
}

pub struct MetadataFile {
    path: PathBuf,
    document: Mutex<MetadataDocument>,
}

impl MetadataFile {
    /// Load the document at `path`, or start empty if there is none
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let document = match fs::read_to_string(&path).await {
            Ok(content) => {
                let document: MetadataDocument = serde_json::from_str(&content)?;
                info!(
                    path = %path.display(),
                    tables = document.tables.len(),
                    "Loaded table metadata"
                );
                document
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No table metadata yet, starting empty");
                MetadataDocument::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn tables(&self) -> BTreeMap<TableId, TablePersistentState> {
        self.document.lock().await.tables.clone()
    }

    pub async fn table(&self, table: TableId) -> Option<TablePersistentState> {
        self.document.lock().await.tables.get(&table).cloned()
    }

    pub async fn put_table(&self, table: TableId, state: TablePersistentState) -> StoreResult<()> {
        self.update(|document| {
            document.tables.insert(table, state);
            true
        })
        .await?;
        Ok(())
    }

    /// Insert a record unless one exists; returns whether it was inserted
    pub async fn insert_table(&self, table: TableId, state: TablePersistentState) -> StoreResult<bool> {
        self.update(|document| {
            if document.tables.contains_key(&table) {
                return false;
            }
            document.tables.insert(table, state);
            true
        })
        .await
    }

    /// Returns false when there was no record
    pub async fn remove_table(&self, table: TableId) -> StoreResult<bool> {
        self.update(|document| document.tables.remove(&table).is_some())
            .await
    }

    pub async fn branch_history(&self, table: TableId) -> Option<BranchHistory> {
        self.document.lock().await.branch_history.get(&table).cloned()
    }

    pub async fn put_branch_history(&self, table: TableId, history: BranchHistory) -> StoreResult<()> {
        self.update(|document| {
            document.branch_history.insert(table, history);
            true
        })
        .await?;
        Ok(())
    }

    pub async fn remove_branch_history(&self, table: TableId) -> StoreResult<bool> {
        self.update(|document| document.branch_history.remove(&table).is_some())
            .await
    }

    /// Apply `f` to a copy and persist it if `f` reports a change
    ///
    /// The in-memory document is replaced only after the write succeeded.
    async fn update<F>(&self, f: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut MetadataDocument) -> bool,
    {
        let mut document = self.document.lock().await;
        let mut next = document.clone();
        if !f(&mut next) {
            return Ok(false);
        }
        self.save(&next).await?;
        *document = next;
        Ok(true)
    }

    async fn save(&self, document: &MetadataDocument) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(document)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.path).await?;
        debug!(path = %self.path.display(), tables = document.tables.len(), "Saved table metadata");
        Ok(())
    }
}
