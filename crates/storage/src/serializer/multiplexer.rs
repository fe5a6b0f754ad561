//! Serializer multiplexer
//!
//! Splits one serializer into `n` independent block id spaces. Global block 0
//! holds the multiplexer config; local block `b` of proxy `s` lives at global
//! block `b * n + s + 1`.

use super::{BlockChange, BlockId, SharedSerializer};
use crate::error::{StoreError, StoreResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

const MULTIPLEXER_MAGIC: u32 = 0x4e4b_4d58;
const CONFIG_BLOCK: BlockId = BlockId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct MultiplexerConfig {
    magic: u32,
    proxy_count: u32,
}

pub struct SerializerMultiplexer {
    serializer: SharedSerializer,
    proxy_count: usize,
}

impl SerializerMultiplexer {
    /// Write the multiplexer layout for `proxy_count` slices
    pub fn create(serializer: &SharedSerializer, proxy_count: usize) -> StoreResult<()> {
        let config = MultiplexerConfig {
            magic: MULTIPLEXER_MAGIC,
            proxy_count: proxy_count as u32,
        };
        let data = bincode::serde::encode_to_vec(config, bincode::config::standard())?;
        serializer
            .lock()
            .write_batch(vec![(CONFIG_BLOCK, Some(Bytes::from(data)))])?;
        info!(proxies = proxy_count, "Initialized serializer multiplexer");
        Ok(())
    }

    /// Load the layout written by `create`
    pub fn open(serializer: SharedSerializer) -> StoreResult<Self> {
        let data = serializer
            .lock()
            .read(CONFIG_BLOCK)
            .ok_or(StoreError::BlockNotFound(CONFIG_BLOCK))?;
        let (config, _): (MultiplexerConfig, usize) =
            bincode::serde::decode_from_slice(&data, bincode::config::standard())?;
        if config.magic != MULTIPLEXER_MAGIC || config.proxy_count == 0 {
            return Err(StoreError::corrupt("bad multiplexer config block"));
        }
        Ok(Self {
            serializer,
            proxy_count: config.proxy_count as usize,
        })
    }

    pub fn proxy_count(&self) -> usize {
        self.proxy_count
    }

    pub fn proxies(&self) -> Vec<SerializerProxy> {
        (0..self.proxy_count)
            .map(|shard| SerializerProxy {
                serializer: self.serializer.clone(),
                shard,
                proxy_count: self.proxy_count,
            })
            .collect()
    }
}

/// One slice of a multiplexed serializer
#[derive(Clone)]
pub struct SerializerProxy {
    serializer: SharedSerializer,
    shard: usize,
    proxy_count: usize,
}

impl SerializerProxy {
    pub fn shard(&self) -> usize {
        self.shard
    }

    pub fn block_size(&self) -> usize {
        self.serializer.lock().block_size()
    }

    pub fn to_global(&self, local: BlockId) -> BlockId {
        BlockId(local.0 * self.proxy_count as u64 + self.shard as u64 + 1)
    }

    pub fn read(&self, local: BlockId) -> Option<Bytes> {
        let global = self.to_global(local);
        self.serializer.lock().read(global)
    }

    pub fn write_batch(&self, changes: impl IntoIterator<Item = BlockChange>) -> StoreResult<()> {
        let changes: Vec<BlockChange> = changes
            .into_iter()
            .map(|(id, data)| (self.to_global(id), data))
            .collect();
        self.serializer.lock().write_batch(changes)
    }

    /// Force buffered writes of the whole serializer to disk
    pub fn flush(&self) -> StoreResult<()> {
        self.serializer.lock().flush()
    }
}
