//! Per-thread outdated secondary index bookkeeping
//!
//! Every worker thread owns one slice mapping tables to the names of their
//! outdated secondary indexes. Slices are written only from their own thread;
//! collection copies each slice on its thread and merges the copies.

use futures_util::future::join_all;
use nk_core::{TableId, ThreadId, ThreadPool, ThreadPoolClosed};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Table id to the names of its outdated indexes
pub type OutdatedIndexMap = BTreeMap<TableId, BTreeSet<String>>;

/// Union `source` into `target`, dropping tables left with no names
pub fn merge_into(target: &mut OutdatedIndexMap, source: OutdatedIndexMap) {
    for (table, names) in source {
        if names.is_empty() {
            continue;
        }
        target.entry(table).or_default().extend(names);
    }
    target.retain(|_, names| !names.is_empty());
}

pub struct OutdatedIndexTracker {
    slices: Vec<Mutex<OutdatedIndexMap>>,
}

impl OutdatedIndexTracker {
    /// One slice per worker thread
    pub fn new(thread_count: usize) -> Arc<Self> {
        Arc::new(Self {
            slices: (0..thread_count.max(1))
                .map(|_| Mutex::new(OutdatedIndexMap::new()))
                .collect(),
        })
    }

    fn current_slice(&self) -> usize {
        ThreadPool::current_thread().map_or(0, |t| t.0) % self.slices.len()
    }

    /// Run `f` on the calling thread's name set for `table`
    pub fn with_index_set<F, R>(&self, table: TableId, f: F) -> R
    where
        F: FnOnce(&mut BTreeSet<String>) -> R,
    {
        self.with_slice_index_set(self.current_slice(), table, f)
    }

    fn with_slice_index_set<F, R>(&self, slice: usize, table: TableId, f: F) -> R
    where
        F: FnOnce(&mut BTreeSet<String>) -> R,
    {
        let mut map = self.slices[slice].lock();
        let set = map.entry(table).or_default();
        let out = f(set);
        if set.is_empty() {
            map.remove(&table);
        }
        out
    }

    /// Report handle writing into the calling thread's slice
    pub fn report(self: &Arc<Self>, table: TableId) -> OutdatedIndexReport {
        OutdatedIndexReport {
            tracker: self.clone(),
            table,
            slice: self.current_slice(),
        }
    }

    /// Copy every slice on its own thread and merge the copies
    pub async fn collect_local(self: &Arc<Self>, pool: &ThreadPool) -> Result<OutdatedIndexMap, ThreadPoolClosed> {
        let threads = pool.thread_count();
        let copies = join_all((0..self.slices.len()).map(|slice| {
            let tracker = self.clone();
            pool.run_on(ThreadId(slice % threads), move || tracker.slices[slice].lock().clone())
        }))
        .await;

        let mut merged = OutdatedIndexMap::new();
        for copy in copies {
            merge_into(&mut merged, copy?);
        }
        debug!(tables = merged.len(), "Collected local outdated indexes");
        Ok(merged)
    }
}

/// A table's outdated index names; cleared when dropped
pub struct OutdatedIndexReport {
    tracker: Arc<OutdatedIndexTracker>,
    table: TableId,
    slice: usize,
}

impl OutdatedIndexReport {
    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn set_outdated_indexes(&self, names: BTreeSet<String>) {
        self.tracker
            .with_slice_index_set(self.slice, self.table, |set| *set = names);
    }

    pub fn index_dropped(&self, name: &str) {
        self.tracker.with_slice_index_set(self.slice, self.table, |set| {
            set.remove(name);
        });
    }

    pub fn index_renamed(&self, old_name: &str, new_name: &str) {
        self.tracker.with_slice_index_set(self.slice, self.table, |set| {
            if set.remove(old_name) {
                set.insert(new_name.to_string());
            }
        });
    }

    pub fn outdated_indexes(&self) -> BTreeSet<String> {
        self.tracker
            .with_slice_index_set(self.slice, self.table, |set| set.clone())
    }
}

impl Drop for OutdatedIndexReport {
    fn drop(&mut self) {
        self.tracker
            .with_slice_index_set(self.slice, self.table, |set| set.clear());
    }
}
