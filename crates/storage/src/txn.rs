//! Block transactions
//!
//! A transaction buffers block changes over one serializer proxy. Reads see
//! the transaction's own writes. Nothing reaches the serializer until
//! `commit`; dropping an uncommitted transaction discards it.

use crate::error::{StoreError, StoreResult};
use crate::serializer::{BlockId, SerializerProxy};
use bytes::Bytes;
use std::collections::BTreeMap;

/// Local block id of each shard's superblock
pub const SUPERBLOCK_ID: BlockId = BlockId(0);

pub struct Transaction {
    proxy: SerializerProxy,
    block_size: usize,
    changes: BTreeMap<BlockId, Option<Bytes>>,
    next_block_id: u64,
}

impl Transaction {
    /// Start a transaction; `next_block_id` is the shard's allocation cursor
    pub fn begin(proxy: SerializerProxy, next_block_id: u64) -> Self {
        let block_size = proxy.block_size();
        Self {
            proxy,
            block_size,
            changes: BTreeMap::new(),
            next_block_id: next_block_id.max(SUPERBLOCK_ID.0 + 1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Allocation cursor after this transaction's allocations
    pub fn next_block_id(&self) -> u64 {
        self.next_block_id
    }

    pub fn read(&self, id: BlockId) -> Option<Bytes> {
        match self.changes.get(&id) {
            Some(change) => change.clone(),
            None => self.proxy.read(id),
        }
    }

    pub fn read_required(&self, id: BlockId) -> StoreResult<Bytes> {
        self.read(id).ok_or(StoreError::BlockNotFound(id))
    }

    pub fn alloc(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        id
    }

    pub fn write(&mut self, id: BlockId, data: impl Into<Bytes>) {
        self.changes.insert(id, Some(data.into()));
    }

    pub fn free(&mut self, id: BlockId) {
        self.changes.insert(id, None);
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn commit(self) -> StoreResult<()> {
        if self.changes.is_empty() {
            return Ok(());
        }
        self.proxy.write_batch(self.changes)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::serializer::{MergerSerializer, Serializer, SerializerMultiplexer};
    use tempfile::TempDir;

    /// Single-proxy serializer for unit tests
    pub(crate) fn test_proxy(dir: &TempDir, block_size: usize) -> SerializerProxy {
        let serializer = Serializer::create(dir.path().join("unit.data"), block_size).unwrap();
        let shared = MergerSerializer::new(serializer, 1024).into_shared();
        SerializerMultiplexer::create(&shared, 1).unwrap();
        SerializerMultiplexer::open(shared).unwrap().proxies().remove(0)
    }

    #[test]
    fn test_read_your_writes_and_commit() {
        let dir = TempDir::new().unwrap();
        let proxy = test_proxy(&dir, 512);

        let mut txn = Transaction::begin(proxy.clone(), 0);
        let id = txn.alloc();
        assert_eq!(id, BlockId(1));
        txn.write(id, Bytes::from_static(b"hello"));
        assert_eq!(txn.read(id), Some(Bytes::from_static(b"hello")));
        assert_eq!(proxy.read(id), None);
        assert_eq!(txn.next_block_id(), 2);
        txn.commit().unwrap();
        assert_eq!(proxy.read(id), Some(Bytes::from_static(b"hello")));

        let mut txn = Transaction::begin(proxy.clone(), 2);
        txn.free(id);
        assert!(txn.read_required(id).is_err());
        drop(txn);
        assert!(proxy.read(id).is_some());
    }
}
