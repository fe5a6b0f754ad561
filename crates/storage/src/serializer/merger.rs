//! Merging layer
//!
//! Coalesces block writes from many transactions and writes them through in
//! one batch once enough dirty blocks accumulate, or on an explicit flush.

use super::{BlockChange, BlockId, Serializer};
use crate::error::StoreResult;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Serializer shared by the multiplexer and all of its proxies
pub type SharedSerializer = Arc<Mutex<MergerSerializer>>;

pub struct MergerSerializer {
    inner: Serializer,
    pending: BTreeMap<BlockId, Option<Bytes>>,
    flush_threshold: usize,
}

impl MergerSerializer {
    pub fn new(inner: Serializer, flush_threshold: usize) -> Self {
        Self {
            inner,
            pending: BTreeMap::new(),
            flush_threshold: flush_threshold.max(1),
        }
    }

    pub fn into_shared(self) -> SharedSerializer {
        Arc::new(Mutex::new(self))
    }

    pub fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    pub fn read(&self, id: BlockId) -> Option<Bytes> {
        match self.pending.get(&id) {
            Some(change) => change.clone(),
            None => self.inner.read(id),
        }
    }

    /// Buffer a committed batch; writes through once the threshold is hit
    ///
    /// If the write-through fails the batch is dropped and the error
    /// returned. Batches buffered earlier stay pending.
    pub fn write_batch(&mut self, changes: impl IntoIterator<Item = BlockChange>) -> StoreResult<()> {
        let changes: Vec<BlockChange> = changes.into_iter().collect();
        if self.pending.len() + changes.len() < self.flush_threshold {
            self.pending.extend(changes);
            return Ok(());
        }
        let mut batch = self.pending.clone();
        batch.extend(changes);
        debug!(blocks = batch.len(), path = %self.inner.path().display(), "Writing through merged blocks");
        self.inner.write_batch(batch)?;
        self.pending.clear();
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn flush(&mut self) -> StoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        debug!(blocks = self.pending.len(), path = %self.inner.path().display(), "Flushing merged blocks");
        self.inner
            .write_batch(self.pending.iter().map(|(id, change)| (*id, change.clone())))?;
        self.pending.clear();
        Ok(())
    }

    pub fn inner(&self) -> &Serializer {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Serializer {
        &mut self.inner
    }
}

impl Drop for MergerSerializer {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, path = %self.inner.path().display(), "Failed to flush merged blocks on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_see_pending_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.data");
        let serializer = Serializer::create(&path, 512).unwrap();
        let mut merger = MergerSerializer::new(serializer, 8);

        merger
            .write_batch(vec![(BlockId(3), Some(Bytes::from_static(b"x")))])
            .unwrap();
        assert_eq!(merger.pending_len(), 1);
        assert_eq!(merger.read(BlockId(3)), Some(Bytes::from_static(b"x")));
        assert_eq!(merger.inner().read(BlockId(3)), None);

        merger.write_batch(vec![(BlockId(3), None)]).unwrap();
        assert_eq!(merger.read(BlockId(3)), None);
    }

    #[test]
    fn test_failed_write_through_keeps_earlier_batches() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        let path = sub.join("m.data");
        let serializer = Serializer::create(&path, 512).unwrap();
        let mut merger = MergerSerializer::new(serializer, 2);

        merger
            .write_batch(vec![(BlockId(1), Some(Bytes::from_static(b"a")))])
            .unwrap();
        std::fs::remove_dir_all(&sub).unwrap();
        assert!(merger
            .write_batch(vec![(BlockId(2), Some(Bytes::from_static(b"b")))])
            .is_err());
        assert_eq!(merger.read(BlockId(1)), Some(Bytes::from_static(b"a")));
        assert_eq!(merger.read(BlockId(2)), None);
        assert!(merger.flush().is_err());
        assert_eq!(merger.pending_len(), 1);

        std::fs::create_dir_all(&sub).unwrap();
        merger.flush().unwrap();
        assert_eq!(merger.pending_len(), 0);
        let reopened = Serializer::open(&path).unwrap();
        assert_eq!(reopened.read(BlockId(1)), Some(Bytes::from_static(b"a")));
        assert_eq!(reopened.read(BlockId(2)), None);
    }

    #[test]
    fn test_threshold_and_drop_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.data");
        let serializer = Serializer::create(&path, 512).unwrap();
        let mut merger = MergerSerializer::new(serializer, 2);

        merger
            .write_batch(vec![
                (BlockId(1), Some(Bytes::from_static(b"a"))),
                (BlockId(2), Some(Bytes::from_static(b"b"))),
            ])
            .unwrap();
        assert_eq!(merger.pending_len(), 0);

        merger
            .write_batch(vec![(BlockId(4), Some(Bytes::from_static(b"d")))])
            .unwrap();
        drop(merger);

        let reopened = Serializer::open(&path).unwrap();
        assert_eq!(reopened.read(BlockId(1)), Some(Bytes::from_static(b"a")));
        assert_eq!(reopened.read(BlockId(4)), Some(Bytes::from_static(b"d")));
    }
}
