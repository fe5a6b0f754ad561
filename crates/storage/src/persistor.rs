//! Table persistor
//!
//! Keeps table records and data files in step. A record is always written
//! before its data file is created and removed only after the data file is
//! gone, so after a crash a data file never exists without a record. A record
//! without a data file is reported back to the caller to recreate or drop.
//!
//! A table can only be removed while no multistore has it open.

use crate::branch_history::BranchHistoryManager;
use crate::context::StorageContext;
use crate::error::{StoreError, StoreResult};
use crate::metadata::{MetadataFile, TablePersistentState};
use crate::multistore::Multistore;
use nk_core::{interruptible, signal, Interruptor, TableId};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

pub struct TablePersistor {
    ctx: StorageContext,
    metadata: Arc<MetadataFile>,
}

impl TablePersistor {
    /// Load the metadata file and clear leftover staging files
    pub async fn open(ctx: StorageContext) -> StoreResult<Self> {
        let metadata = Arc::new(MetadataFile::open(ctx.config.metadata_path()).await?);
        clear_staging(&ctx.config.staging_dir()).await?;
        Ok(Self { ctx, metadata })
    }

    pub fn context(&self) -> &StorageContext {
        &self.ctx
    }

    pub async fn tables(&self) -> BTreeMap<TableId, TablePersistentState> {
        self.metadata.tables().await
    }

    pub fn branch_history(&self, table: TableId) -> BranchHistoryManager {
        BranchHistoryManager::new(table, self.metadata.clone())
    }

    /// Open every recorded table and hand it to `callback`
    ///
    /// A table that fails to open is logged and skipped; the ids of skipped
    /// tables are returned. Interruption aborts the whole scan.
    pub async fn read_all_tables<F>(&self, mut callback: F, interruptor: &Interruptor) -> StoreResult<Vec<TableId>>
    where
        F: FnMut(TableId, TablePersistentState, Multistore),
    {
        let mut skipped = Vec::new();
        let mut opened = 0;
        for (table, state) in self.metadata.tables().await {
            signal::check(interruptor)?;
            match Multistore::open(&self.ctx, self.branch_history(table), interruptor).await {
                Ok(multistore) => {
                    opened += 1;
                    callback(table, state, multistore);
                }
                Err(StoreError::Interrupted(e)) => return Err(e.into()),
                Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                    warn!(table = %table, name = %state.name, "Table has a record but no data file");
                    skipped.push(table);
                }
                Err(e) => {
                    warn!(table = %table, name = %state.name, error = %e, "Failed to open table");
                    skipped.push(table);
                }
            }
        }
        info!(opened, skipped = skipped.len(), "Read all tables");
        Ok(skipped)
    }

    /// Record a new table, then create its branch history and data file
    pub async fn add_table(
        &self,
        table: TableId,
        state: TablePersistentState,
        interruptor: &Interruptor,
    ) -> StoreResult<Multistore> {
        let name = state.name.clone();
        if !interruptible(self.metadata.insert_table(table, state), interruptor).await?? {
            return Err(StoreError::TableExists(table));
        }
        let multistore = Multistore::create(&self.ctx, self.branch_history(table), interruptor).await?;
        info!(table = %table, name = %name, "Added table");
        Ok(multistore)
    }

    /// Open a recorded table's existing data file
    pub async fn open_table(&self, table: TableId, interruptor: &Interruptor) -> StoreResult<Multistore> {
        if self.metadata.table(table).await.is_none() {
            return Err(StoreError::TableNotFound(table));
        }
        Multistore::open(&self.ctx, self.branch_history(table), interruptor).await
    }

    /// Create a fresh data file for a recorded table that has none, as left
    /// behind by a crash during `add_table`
    pub async fn recreate_table(&self, table: TableId, interruptor: &Interruptor) -> StoreResult<Multistore> {
        if self.metadata.table(table).await.is_none() {
            return Err(StoreError::TableNotFound(table));
        }
        let multistore = Multistore::create(&self.ctx, self.branch_history(table), interruptor).await?;
        warn!(table = %table, "Recreated missing data file");
        Ok(multistore)
    }

    /// Replace a table's record; data files are untouched
    pub async fn update_table(
        &self,
        table: TableId,
        state: TablePersistentState,
        interruptor: &Interruptor,
    ) -> StoreResult<()> {
        if self.metadata.table(table).await.is_none() {
            return Err(StoreError::TableNotFound(table));
        }
        interruptible(self.metadata.put_table(table, state), interruptor).await??;
        Ok(())
    }

    /// Delete a table's data file, then its branch history, then its record
    ///
    /// Fails with `TableOpen` while a multistore of the table is alive; shut
    /// it down first.
    pub async fn remove_table(&self, table: TableId, interruptor: &Interruptor) -> StoreResult<()> {
        signal::check(interruptor)?;
        let _claim = self.ctx.open_tables.claim(table)?;
        let path = self.ctx.config.table_path(table);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(table = %table, path = %path.display(), "Data file already gone");
            }
            Err(e) => return Err(e.into()),
        }
        interruptible(self.metadata.remove_branch_history(table), interruptor).await??;
        let removed = interruptible(self.metadata.remove_table(table), interruptor).await??;
        if !removed {
            warn!(table = %table, "Removed table had no record");
        }
        info!(table = %table, "Removed table");
        Ok(())
    }
}

async fn clear_staging(dir: &Path) -> StoreResult<()> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        warn!(path = %entry.path().display(), "Removing abandoned staging file");
        fs::remove_file(entry.path()).await?;
    }
    Ok(())
}
