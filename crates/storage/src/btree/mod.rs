//! Byte-keyed B+tree over transaction blocks
//!
//! Trees are addressed through a [`TreeRoot`], which only knows the block id
//! of the root node. An empty tree has no blocks at all and its root is
//! [`NULL_BLOCK_ID`]: inserting into it materializes a root leaf, and
//! removing the last entry frees the root again.
//!
//! Leaves split by encoded byte size as measured by a [`ValueSizer`]. Deletes
//! drop empty nodes and collapse single-child internal nodes, but do not
//! otherwise rebalance.

mod node;
mod scan;

pub use scan::TreeScan;

use crate::error::{StoreError, StoreResult};
use crate::serializer::{BlockId, NULL_BLOCK_ID};
use crate::txn::Transaction;
use crate::value::ValueSizer;
use bytes::Bytes;
use node::{child_index, entry_overhead, internal_size, leaf_size, leaf_split_point, node_capacity, Node};

/// Longest key accepted by any tree
pub const MAX_KEY_LEN: usize = 250;

/// Anything that records where a tree's root lives
pub trait TreeRoot {
    fn root_block_id(&self) -> BlockId;
    fn set_root_block_id(&mut self, id: BlockId);
}

/// Tree root held outside any superblock, e.g. inside a hash value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualSuperblock {
    root: BlockId,
}

impl VirtualSuperblock {
    pub fn new(root: BlockId) -> Self {
        Self { root }
    }

    pub fn empty() -> Self {
        Self::new(NULL_BLOCK_ID)
    }
}

impl TreeRoot for VirtualSuperblock {
    fn root_block_id(&self) -> BlockId {
        self.root
    }

    fn set_root_block_id(&mut self, id: BlockId) {
        self.root = id;
    }
}

/// Pending change to one key, obtained from [`find_for_write`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValueLocation {
    key: Bytes,
    original: Option<Bytes>,
    value: Option<Bytes>,
}

impl KeyValueLocation {
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Current value, including any change made through this location
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    pub fn set_value(&mut self, value: Bytes) {
        self.value = Some(value);
    }

    pub fn delete(&mut self) {
        self.value = None;
    }

    /// Whether the key existed when the location was taken
    pub fn existed(&self) -> bool {
        self.original.is_some()
    }

    pub fn is_changed(&self) -> bool {
        self.original != self.value
    }
}

pub fn find_for_read(txn: &Transaction, root: &impl TreeRoot, key: &[u8]) -> StoreResult<Option<Bytes>> {
    let mut id = root.root_block_id();
    while !id.is_null() {
        match Node::load(txn, id)? {
            Node::Leaf { entries } => {
                return Ok(entries
                    .binary_search_by(|(k, _)| k.as_ref().cmp(key))
                    .ok()
                    .map(|i| entries[i].1.clone()));
            }
            Node::Internal { keys, children } => {
                id = children[child_index(&keys, key)];
            }
        }
    }
    Ok(None)
}

pub fn find_for_write(txn: &Transaction, root: &impl TreeRoot, key: &[u8]) -> StoreResult<KeyValueLocation> {
    if key.len() > MAX_KEY_LEN {
        return Err(StoreError::KeyTooLong(key.len()));
    }
    let original = find_for_read(txn, root, key)?;
    Ok(KeyValueLocation {
        key: Bytes::copy_from_slice(key),
        value: original.clone(),
        original,
    })
}

/// Write a location's change into the tree, updating `root` if it moves
pub fn apply_change(
    txn: &mut Transaction,
    root: &mut impl TreeRoot,
    sizer: &dyn ValueSizer,
    location: KeyValueLocation,
) -> StoreResult<()> {
    if !location.is_changed() {
        return Ok(());
    }
    let root_id = root.root_block_id();
    match location.value {
        Some(value) => {
            if root_id.is_null() {
                let id = txn.alloc();
                Node::Leaf {
                    entries: vec![(location.key, value)],
                }
                .store(txn, id)?;
                root.set_root_block_id(id);
                return Ok(());
            }
            if let Some((separator, right)) = upsert(txn, root_id, location.key, value, sizer)? {
                let id = txn.alloc();
                Node::Internal {
                    keys: vec![separator],
                    children: vec![root_id, right],
                }
                .store(txn, id)?;
                root.set_root_block_id(id);
            }
        }
        None => {
            if root_id.is_null() {
                return Ok(());
            }
            if let Removal::Emptied = remove(txn, root_id, &location.key)? {
                txn.free(root_id);
                root.set_root_block_id(NULL_BLOCK_ID);
            }
        }
    }
    Ok(())
}

/// Insert or replace; returns the separator and id of a new right sibling if
/// the node split
fn upsert(
    txn: &mut Transaction,
    id: BlockId,
    key: Bytes,
    value: Bytes,
    sizer: &dyn ValueSizer,
) -> StoreResult<Option<(Bytes, BlockId)>> {
    let capacity = node_capacity(sizer.block_size());
    match Node::load(txn, id)? {
        Node::Leaf { mut entries } => {
            let slot = entries.binary_search_by(|(k, _)| k.as_ref().cmp(key.as_ref()));
            if let Ok(i) = slot {
                entries.remove(i);
            }
            let used = leaf_size(&entries, sizer)? + entry_overhead(&key);
            let fits = sizer.fits(&value, capacity.saturating_sub(used))?;
            let i = match slot {
                Ok(i) | Err(i) => i,
            };
            entries.insert(i, (key, value));

            if fits || entries.len() < 2 {
                Node::Leaf { entries }.store(txn, id)?;
                return Ok(None);
            }
            let mid = leaf_split_point(&entries, sizer)?;
            let right_entries = entries.split_off(mid);
            let separator = right_entries[0].0.clone();
            let right_id = txn.alloc();
            Node::Leaf { entries }.store(txn, id)?;
            Node::Leaf {
                entries: right_entries,
            }
            .store(txn, right_id)?;
            Ok(Some((separator, right_id)))
        }
        Node::Internal {
            mut keys,
            mut children,
        } => {
            let i = child_index(&keys, &key);
            if let Some((separator, new_child)) = upsert(txn, children[i], key, value, sizer)? {
                keys.insert(i, separator);
                children.insert(i + 1, new_child);
            }
            if internal_size(&keys) <= capacity || keys.len() < 3 {
                Node::Internal { keys, children }.store(txn, id)?;
                return Ok(None);
            }
            let mid = keys.len() / 2;
            let right_keys = keys.split_off(mid + 1);
            let right_children = children.split_off(mid + 1);
            let promoted = keys.pop().ok_or_else(|| StoreError::corrupt("empty internal node"))?;
            let right_id = txn.alloc();
            Node::Internal { keys, children }.store(txn, id)?;
            Node::Internal {
                keys: right_keys,
                children: right_children,
            }
            .store(txn, right_id)?;
            Ok(Some((promoted, right_id)))
        }
    }
}

enum Removal {
    NotFound,
    Kept,
    /// The node has no entries left; the caller frees it
    Emptied,
}

fn remove(txn: &mut Transaction, id: BlockId, key: &[u8]) -> StoreResult<Removal> {
    match Node::load(txn, id)? {
        Node::Leaf { mut entries } => {
            let Ok(i) = entries.binary_search_by(|(k, _)| k.as_ref().cmp(key)) else {
                return Ok(Removal::NotFound);
            };
            entries.remove(i);
            if entries.is_empty() {
                return Ok(Removal::Emptied);
            }
            Node::Leaf { entries }.store(txn, id)?;
            Ok(Removal::Kept)
        }
        Node::Internal {
            mut keys,
            mut children,
        } => {
            let i = child_index(&keys, key);
            match remove(txn, children[i], key)? {
                Removal::NotFound => Ok(Removal::NotFound),
                Removal::Kept => Ok(Removal::Kept),
                Removal::Emptied => {
                    txn.free(children.remove(i));
                    if !keys.is_empty() {
                        keys.remove(i.saturating_sub(1));
                    }
                    match children.len() {
                        0 => Ok(Removal::Emptied),
                        1 => {
                            // Pull the only child up into this block
                            let only = children[0];
                            Node::load(txn, only)?.store(txn, id)?;
                            txn.free(only);
                            Ok(Removal::Kept)
                        }
                        _ => {
                            Node::Internal { keys, children }.store(txn, id)?;
                            Ok(Removal::Kept)
                        }
                    }
                }
            }
        }
    }
}

/// Lazy in-order scan over every entry
pub fn scan<'t>(txn: &'t Transaction, root: &impl TreeRoot) -> TreeScan<'t> {
    TreeScan::new(txn, root.root_block_id())
}

/// Free every node, handing each value to `on_value` first
pub fn clear<F>(txn: &mut Transaction, root: &mut impl TreeRoot, mut on_value: F) -> StoreResult<()>
where
    F: FnMut(&mut Transaction, &[u8]) -> StoreResult<()>,
{
    let mut pending = Vec::new();
    if !root.root_block_id().is_null() {
        pending.push(root.root_block_id());
    }
    while let Some(id) = pending.pop() {
        match Node::load(txn, id)? {
            Node::Leaf { entries } => {
                for (_, value) in &entries {
                    on_value(&mut *txn, value)?;
                }
            }
            Node::Internal { children, .. } => pending.extend(children),
        }
        txn.free(id);
    }
    root.set_root_block_id(NULL_BLOCK_ID);
    Ok(())
}
