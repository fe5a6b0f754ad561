//! Tree node blocks

use crate::error::StoreResult;
use crate::serializer::BlockId;
use crate::txn::Transaction;
use crate::value::ValueSizer;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

const NODE_HEADER_SIZE: usize = 8;
const ENTRY_OVERHEAD: usize = 4;
const CHILD_SIZE: usize = 8;

/// One tree block
///
/// Internal nodes hold `children.len() == keys.len() + 1`; `keys[i]` is the
/// smallest key reachable through `children[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Node {
    Leaf {
        entries: Vec<(Bytes, Bytes)>,
    },
    Internal {
        keys: Vec<Bytes>,
        children: Vec<BlockId>,
    },
}

impl Node {
    pub(crate) fn load(txn: &Transaction, id: BlockId) -> StoreResult<Node> {
        let data = txn.read_required(id)?;
        let (node, _) = bincode::serde::decode_from_slice(&data, bincode::config::standard())?;
        Ok(node)
    }

    pub(crate) fn store(&self, txn: &mut Transaction, id: BlockId) -> StoreResult<()> {
        let data = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        txn.write(id, data);
        Ok(())
    }
}

/// Usable bytes per node
pub(crate) fn node_capacity(block_size: usize) -> usize {
    block_size.saturating_sub(NODE_HEADER_SIZE)
}

pub(crate) fn entry_overhead(key: &[u8]) -> usize {
    key.len() + ENTRY_OVERHEAD
}

pub(crate) fn leaf_size(entries: &[(Bytes, Bytes)], sizer: &dyn ValueSizer) -> StoreResult<usize> {
    let mut total = 0;
    for (key, value) in entries {
        total += entry_overhead(key) + sizer.size(value)?;
    }
    Ok(total)
}

pub(crate) fn internal_size(keys: &[Bytes]) -> usize {
    keys.iter().map(|k| entry_overhead(k)).sum::<usize>() + CHILD_SIZE * (keys.len() + 1)
}

/// Child slot that covers `key`
pub(crate) fn child_index(keys: &[Bytes], key: &[u8]) -> usize {
    keys.partition_point(|k| k.as_ref() <= key)
}

/// Split point balancing the byte size of both halves; always in `1..len`
pub(crate) fn leaf_split_point(entries: &[(Bytes, Bytes)], sizer: &dyn ValueSizer) -> StoreResult<usize> {
    let total = leaf_size(entries, sizer)?;
    let mut acc = 0;
    for (i, (key, value)) in entries.iter().enumerate() {
        acc += entry_overhead(key) + sizer.size(value)?;
        if acc * 2 >= total {
            return Ok((i + 1).clamp(1, entries.len() - 1));
        }
    }
    Ok(entries.len() / 2)
}
