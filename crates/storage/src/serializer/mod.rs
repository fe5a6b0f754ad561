//! Block serializer
//!
//! A serializer file is a single image of every live block:
//!
//! ```text
//! magic (8 bytes) | crc32 (u32 LE) | payload length (u64 LE) | payload
//! ```
//!
//! The payload is a bincode-encoded [`SerializerImage`]. Every write batch
//! rewrites the image into a sibling temp file and renames it over the old
//! one, so a crash leaves either the previous image or the new one.

pub mod merger;
pub mod multiplexer;

pub use merger::{MergerSerializer, SharedSerializer};
pub use multiplexer::{SerializerMultiplexer, SerializerProxy};

use crate::error::{StoreError, StoreResult};
use bytes::Bytes;
use crc32fast::Hasher as Crc32Hasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SERIALIZER_MAGIC: &[u8; 8] = b"NKSER001";
const HEADER_LEN: usize = 8 + 4 + 8;

/// Block address inside a serializer (or inside one multiplexer proxy)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u64);

/// Sentinel for "no block", e.g. the root of an empty tree
pub const NULL_BLOCK_ID: BlockId = BlockId(u64::MAX);

impl BlockId {
    pub fn is_null(&self) -> bool {
        *self == NULL_BLOCK_ID
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// One buffered block change: `None` frees the block
pub type BlockChange = (BlockId, Option<Bytes>);

#[derive(Debug, Default, Serialize, Deserialize)]
struct SerializerImage {
    block_size: u32,
    blocks: BTreeMap<BlockId, Bytes>,
}

/// Encoding view of [`SerializerImage`] over borrowed blocks
#[derive(Serialize)]
struct SerializerImageRef<'a> {
    block_size: u32,
    blocks: &'a BTreeMap<BlockId, Bytes>,
}

/// File-backed block store
#[derive(Debug)]
pub struct Serializer {
    path: PathBuf,
    block_size: usize,
    blocks: BTreeMap<BlockId, Bytes>,
}

impl Serializer {
    /// Initialize an empty serializer file at `path`
    pub fn create(path: impl Into<PathBuf>, block_size: usize) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serializer = Self {
            path,
            block_size,
            blocks: BTreeMap::new(),
        };
        serializer.persist(&serializer.blocks)?;
        info!(path = %serializer.path.display(), block_size, "Created serializer file");
        Ok(serializer)
    }

    /// Load an existing serializer file, verifying its checksum
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let data = fs::read(&path)?;
        if data.len() < HEADER_LEN || &data[..8] != SERIALIZER_MAGIC {
            return Err(StoreError::corrupt(format!(
                "{} is not a serializer file",
                path.display()
            )));
        }
        let checksum = u32::from_le_bytes(read_array(&data[8..12]));
        let len = u64::from_le_bytes(read_array(&data[12..20])) as usize;
        let payload = data
            .get(HEADER_LEN..HEADER_LEN + len)
            .ok_or_else(|| StoreError::corrupt("truncated serializer file"))?;

        let mut hasher = Crc32Hasher::new();
        hasher.update(payload);
        let actual = hasher.finalize();
        if actual != checksum {
            return Err(StoreError::corrupt(format!(
                "serializer checksum mismatch: expected {:08x}, got {:08x}",
                checksum, actual
            )));
        }

        let (image, _): (SerializerImage, usize) =
            bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
        debug!(path = %path.display(), blocks = image.blocks.len(), "Opened serializer file");
        Ok(Self {
            path,
            block_size: image.block_size as usize,
            blocks: image.blocks,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn read(&self, id: BlockId) -> Option<Bytes> {
        self.blocks.get(&id).cloned()
    }

    /// Apply a batch of changes and persist the new image
    ///
    /// Reads only see the batch once it is on disk; a failed batch leaves the
    /// serializer unchanged.
    pub fn write_batch(&mut self, changes: impl IntoIterator<Item = BlockChange>) -> StoreResult<()> {
        let mut next = self.blocks.clone();
        for (id, data) in changes {
            match data {
                Some(data) => {
                    next.insert(id, data);
                }
                None => {
                    next.remove(&id);
                }
            }
        }
        self.persist(&next)?;
        self.blocks = next;
        Ok(())
    }

    /// Rename the backing file; the serializer keeps writing at the new path
    pub fn move_to(&mut self, new_path: impl Into<PathBuf>) -> StoreResult<()> {
        let new_path = new_path.into();
        if let Some(parent) = new_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&self.path, &new_path)?;
        debug!(from = %self.path.display(), to = %new_path.display(), "Moved serializer file");
        self.path = new_path;
        Ok(())
    }

    fn persist(&self, blocks: &BTreeMap<BlockId, Bytes>) -> StoreResult<()> {
        let image = SerializerImageRef {
            block_size: self.block_size as u32,
            blocks,
        };
        let payload = bincode::serde::encode_to_vec(&image, bincode::config::standard())?;
        let mut hasher = Crc32Hasher::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();

        let temp_path = self.path.with_extension("data.tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(SERIALIZER_MAGIC)?;
            file.write_all(&checksum.to_le_bytes())?;
            file.write_all(&(payload.len() as u64).to_le_bytes())?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn read_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&slice[..N]);
    out
}
