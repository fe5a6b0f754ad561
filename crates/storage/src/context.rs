//! Process-wide storage context
//!
//! Holds what every table's multistore shares: the worker pool stores are
//! pinned to, the per-thread outdated index slices, the set of open tables
//! and the storage config.

use crate::config::StorageConfig;
use crate::error::{StoreError, StoreResult};
use crate::outdated::OutdatedIndexTracker;
use nk_core::{TableId, ThreadPool};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct StorageContext {
    pub pool: Arc<ThreadPool>,
    pub outdated: Arc<OutdatedIndexTracker>,
    pub open_tables: Arc<OpenTables>,
    pub config: StorageConfig,
}

impl StorageContext {
    /// Start the worker pool described by `config`
    pub fn new(config: StorageConfig) -> std::io::Result<Self> {
        let pool = Arc::new(ThreadPool::new(config.worker_threads)?);
        let outdated = OutdatedIndexTracker::new(pool.thread_count());
        info!(
            data_dir = %config.data_dir.display(),
            workers = pool.thread_count(),
            "Storage context ready"
        );
        Ok(Self {
            pool,
            outdated,
            open_tables: Arc::new(OpenTables::default()),
            config,
        })
    }
}

/// Tables whose data file is in use
///
/// A multistore holds a claim on its table for as long as it lives. Removing
/// a table takes the same claim, so data files are never deleted under a
/// live multistore and a table is never opened twice.
#[derive(Debug, Default)]
pub struct OpenTables {
    tables: Mutex<BTreeSet<TableId>>,
}

impl OpenTables {
    pub fn claim(self: &Arc<Self>, table: TableId) -> StoreResult<TableClaim> {
        if !self.tables.lock().insert(table) {
            return Err(StoreError::TableOpen(table));
        }
        Ok(TableClaim {
            tables: self.clone(),
            table,
        })
    }

    pub fn is_open(&self, table: TableId) -> bool {
        self.tables.lock().contains(&table)
    }
}

/// Released on drop
#[derive(Debug)]
pub struct TableClaim {
    tables: Arc<OpenTables>,
    table: TableId,
}

impl Drop for TableClaim {
    fn drop(&mut self) {
        self.tables.tables.lock().remove(&self.table);
    }
}
