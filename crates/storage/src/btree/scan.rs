//! In-order tree scan

use super::node::Node;
use crate::error::StoreResult;
use crate::serializer::BlockId;
use crate::txn::Transaction;
use bytes::Bytes;

/// Lazy ordered scan; loads one leaf at a time and is consumed by iteration
pub struct TreeScan<'t> {
    txn: &'t Transaction,
    pending: Vec<BlockId>,
    leaf: std::vec::IntoIter<(Bytes, Bytes)>,
    failed: bool,
}

impl<'t> TreeScan<'t> {
    pub(crate) fn new(txn: &'t Transaction, root: BlockId) -> Self {
        let pending = if root.is_null() { Vec::new() } else { vec![root] };
        Self {
            txn,
            pending,
            leaf: Vec::new().into_iter(),
            failed: false,
        }
    }
}

impl Iterator for TreeScan<'_> {
    type Item = StoreResult<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(entry) = self.leaf.next() {
                return Some(Ok(entry));
            }
            let id = self.pending.pop()?;
            match Node::load(self.txn, id) {
                Ok(Node::Leaf { entries }) => self.leaf = entries.into_iter(),
                Ok(Node::Internal { children, .. }) => self.pending.extend(children.into_iter().rev()),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
