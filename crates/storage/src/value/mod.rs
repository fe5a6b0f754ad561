//! Packed on-disk value layout
//!
//! ```text
//! flags (1 byte) | expiration (u32 LE, only if flagged) | payload
//!
//! flags: bits 5-7 type tag, bit 4 expiration present, bits 0-3 reserved
//! ```
//!
//! Payloads by type:
//! - string: one blob reference
//! - hash, set: [`NestedRoot`] (root block id u64 LE, sub size u32 LE)
//!
//! Values are decoded by copying out of the buffer after checking the tag,
//! never by reinterpreting it.

mod sizer;

pub use sizer::{NestedValueSizer, RedisValueSizer, ValueSizer};

use crate::blob;
use crate::error::{StoreError, StoreResult};
use crate::serializer::{BlockId, NULL_BLOCK_ID};
use bytes::Bytes;
use std::fmt;

const TYPE_SHIFT: u8 = 5;
const TYPE_MASK: u8 = 0b1110_0000;
const EXPIRATION_FLAG: u8 = 0b0001_0000;

pub const HEADER_SIZE: usize = 1;
pub const EXPIRATION_SIZE: usize = 4;
pub const NESTED_ROOT_SIZE: usize = 12;

/// Redis value kind, stored in the top three bits of the flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedisType {
    String = 0,
    List = 1,
    Hash = 2,
    Set = 3,
    SortedSet = 4,
}

impl RedisType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> StoreResult<Self> {
        match tag {
            0 => Ok(RedisType::String),
            1 => Ok(RedisType::List),
            2 => Ok(RedisType::Hash),
            3 => Ok(RedisType::Set),
            4 => Ok(RedisType::SortedSet),
            other => Err(StoreError::CorruptTypeTag(other)),
        }
    }

    /// Name reported by TYPE
    pub fn name(self) -> &'static str {
        match self {
            RedisType::String => "string",
            RedisType::List => "list",
            RedisType::Hash => "hash",
            RedisType::Set => "set",
            RedisType::SortedSet => "zset",
        }
    }
}

impl fmt::Display for RedisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Root of a nested field tree plus its entry count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestedRoot {
    pub root_block_id: BlockId,
    pub sub_size: u32,
}

impl NestedRoot {
    pub const EMPTY: NestedRoot = NestedRoot {
        root_block_id: NULL_BLOCK_ID,
        sub_size: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.root_block_id.is_null()
    }

    pub fn encode(&self) -> [u8; NESTED_ROOT_SIZE] {
        let mut out = [0u8; NESTED_ROOT_SIZE];
        out[..8].copy_from_slice(&self.root_block_id.0.to_le_bytes());
        out[8..].copy_from_slice(&self.sub_size.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> StoreResult<Self> {
        if data.len() < NESTED_ROOT_SIZE {
            return Err(StoreError::corrupt("truncated nested root"));
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&data[..8]);
        let mut size = [0u8; 4];
        size.copy_from_slice(&data[8..12]);
        Ok(Self {
            root_block_id: BlockId(u64::from_le_bytes(id)),
            sub_size: u32::from_le_bytes(size),
        })
    }
}

/// Typed view of a decoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValuePayload<'a> {
    String(&'a [u8]),
    Hash(NestedRoot),
    Set(NestedRoot),
}

/// Owned packed value buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedValue {
    buf: Vec<u8>,
}

impl PackedValue {
    /// Header-only value of type `t`, without expiration or payload
    pub fn new(t: RedisType) -> Self {
        let mut value = Self { buf: vec![0] };
        value.set_redis_type(t);
        value
    }

    pub fn new_string(blob_ref: &[u8]) -> Self {
        let mut value = Self::new(RedisType::String);
        value.buf.extend_from_slice(blob_ref);
        value
    }

    /// Hash or set value with an empty nested tree
    pub fn new_nested(t: RedisType) -> Self {
        let mut value = Self::new(t);
        value.buf.extend_from_slice(&NestedRoot::EMPTY.encode());
        value
    }

    pub fn from_bytes(data: &[u8]) -> StoreResult<Self> {
        let value = Self { buf: data.to_vec() };
        if value.buf.is_empty() || value.buf.len() < value.metadata_size() {
            return Err(StoreError::corrupt("truncated value header"));
        }
        Ok(value)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    fn flags(&self) -> u8 {
        self.buf[0]
    }

    /// Raw three-bit type tag
    pub fn type_tag(&self) -> u8 {
        (self.flags() & TYPE_MASK) >> TYPE_SHIFT
    }

    pub fn get_redis_type(&self) -> StoreResult<RedisType> {
        RedisType::from_tag(self.type_tag())
    }

    pub fn set_redis_type(&mut self, t: RedisType) {
        self.buf[0] = (self.buf[0] & !TYPE_MASK) | (t.tag() << TYPE_SHIFT);
    }

    pub fn expiration_set(&self) -> bool {
        self.flags() & EXPIRATION_FLAG != 0
    }

    pub fn get_expiration(&self) -> Option<u32> {
        if !self.expiration_set() {
            return None;
        }
        let mut ts = [0u8; 4];
        ts.copy_from_slice(&self.buf[HEADER_SIZE..HEADER_SIZE + EXPIRATION_SIZE]);
        Some(u32::from_le_bytes(ts))
    }

    /// Set the absolute expiration, growing the metadata area if needed
    pub fn set_expiration(&mut self, timestamp: u32) {
        if self.expiration_set() {
            self.buf[HEADER_SIZE..HEADER_SIZE + EXPIRATION_SIZE]
                .copy_from_slice(&timestamp.to_le_bytes());
            return;
        }
        let mut buf = Vec::with_capacity(self.buf.len() + EXPIRATION_SIZE);
        buf.push(self.buf[0] | EXPIRATION_FLAG);
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(&self.buf[HEADER_SIZE..]);
        self.buf = buf;
    }

    /// Clear the expiration and reclaim its bytes; returns whether one was set
    pub fn void_expiration(&mut self) -> bool {
        if !self.expiration_set() {
            return false;
        }
        self.buf.drain(HEADER_SIZE..HEADER_SIZE + EXPIRATION_SIZE);
        self.buf[0] &= !EXPIRATION_FLAG;
        true
    }

    pub fn is_expired(&self, now: u32) -> bool {
        self.get_expiration().is_some_and(|ts| ts <= now)
    }

    pub fn metadata_size(&self) -> usize {
        HEADER_SIZE + if self.expiration_set() { EXPIRATION_SIZE } else { 0 }
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[self.metadata_size()..]
    }

    /// Replace the payload, keeping header and expiration
    pub fn set_payload(&mut self, payload: &[u8]) {
        let start = self.metadata_size();
        self.buf.truncate(start);
        self.buf.extend_from_slice(payload);
    }

    pub fn payload_size(&self, block_size: usize) -> StoreResult<usize> {
        match self.get_redis_type()? {
            RedisType::String => blob::ref_size(self.payload(), block_size),
            RedisType::Hash | RedisType::Set => Ok(NESTED_ROOT_SIZE),
            t @ (RedisType::List | RedisType::SortedSet) => Err(StoreError::NotYetImplemented(t)),
        }
    }

    pub fn size(&self, block_size: usize) -> StoreResult<usize> {
        Ok(self.metadata_size() + self.payload_size(block_size)?)
    }

    pub fn fits(&self, block_size: usize, available: usize) -> StoreResult<bool> {
        Ok(self.size(block_size)? <= available)
    }

    pub fn decode(&self) -> StoreResult<ValuePayload<'_>> {
        match self.get_redis_type()? {
            RedisType::String => Ok(ValuePayload::String(self.payload())),
            RedisType::Hash => Ok(ValuePayload::Hash(NestedRoot::decode(self.payload())?)),
            RedisType::Set => Ok(ValuePayload::Set(NestedRoot::decode(self.payload())?)),
            t @ (RedisType::List | RedisType::SortedSet) => Err(StoreError::NotYetImplemented(t)),
        }
    }

    /// Blob reference of a string value
    pub fn string_ref(&self) -> StoreResult<&[u8]> {
        match self.decode()? {
            ValuePayload::String(reference) => Ok(reference),
            _ => Err(StoreError::WrongType),
        }
    }

    /// Nested root of a value that must be of type `expected`
    pub fn nested_root(&self, expected: RedisType) -> StoreResult<NestedRoot> {
        match (self.decode()?, expected) {
            (ValuePayload::Hash(root), RedisType::Hash) | (ValuePayload::Set(root), RedisType::Set) => {
                Ok(root)
            }
            _ => Err(StoreError::WrongType),
        }
    }

    pub fn set_nested_root(&mut self, root: NestedRoot) -> StoreResult<()> {
        match self.get_redis_type()? {
            RedisType::Hash | RedisType::Set => {
                self.set_payload(&root.encode());
                Ok(())
            }
            _ => Err(StoreError::WrongType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [RedisType; 5] = [
        RedisType::String,
        RedisType::List,
        RedisType::Hash,
        RedisType::Set,
        RedisType::SortedSet,
    ];

    #[test]
    fn test_header_roundtrip() {
        for t in ALL_TYPES {
            for ts in [None, Some(0u32), Some(1_700_000_000), Some(u32::MAX)] {
                let mut value = PackedValue::new(RedisType::String);
                value.set_redis_type(t);
                if let Some(ts) = ts {
                    value.set_expiration(ts);
                }
                assert_eq!(value.get_redis_type().unwrap(), t);
                assert_eq!(value.expiration_set(), ts.is_some());
                assert_eq!(value.get_expiration(), ts);
                assert_eq!(value.metadata_size(), if ts.is_some() { 5 } else { 1 });

                if ts.is_some() {
                    assert!(value.void_expiration());
                    assert!(!value.expiration_set());
                    assert_eq!(value.get_redis_type().unwrap(), t);
                } else {
                    assert!(!value.void_expiration());
                }
                assert_eq!(value.metadata_size(), 1);
            }
        }
    }

    #[test]
    fn test_expiration_keeps_payload() {
        let mut value = PackedValue::new_nested(RedisType::Hash);
        let root = NestedRoot {
            root_block_id: BlockId(42),
            sub_size: 7,
        };
        value.set_nested_root(root).unwrap();
        value.set_expiration(99);
        assert_eq!(value.nested_root(RedisType::Hash).unwrap(), root);
        value.set_expiration(100);
        assert_eq!(value.get_expiration(), Some(100));
        assert_eq!(value.as_bytes().len(), 1 + 4 + 12);
        value.void_expiration();
        assert_eq!(value.nested_root(RedisType::Hash).unwrap(), root);
    }

    #[test]
    fn test_size_additivity() {
        let block_size = 4096;
        let mut values = vec![
            PackedValue::new_string(&[3, b'a', b'b', b'c']),
            PackedValue::new_nested(RedisType::Hash),
            PackedValue::new_nested(RedisType::Set),
        ];
        for value in values.iter_mut() {
            for expiring in [false, true] {
                if expiring {
                    value.set_expiration(5);
                }
                let size = value.size(block_size).unwrap();
                assert_eq!(
                    size,
                    value.metadata_size() + value.payload_size(block_size).unwrap()
                );
                assert_eq!(size, value.as_bytes().len());
                assert!(value.fits(block_size, size).unwrap());
                assert!(!value.fits(block_size, size - 1).unwrap());
            }
        }
    }

    #[test]
    fn test_unknown_and_unimplemented_tags() {
        let mut raw = PackedValue::new(RedisType::String).as_bytes().to_vec();
        for tag in 5u8..8 {
            raw[0] = tag << 5;
            let value = PackedValue::from_bytes(&raw).unwrap();
            assert!(matches!(value.size(4096), Err(StoreError::CorruptTypeTag(t)) if t == tag));
        }

        let list = PackedValue::new(RedisType::List);
        assert!(matches!(
            list.size(4096),
            Err(StoreError::NotYetImplemented(RedisType::List))
        ));
        assert!(matches!(
            PackedValue::new(RedisType::SortedSet).decode(),
            Err(StoreError::NotYetImplemented(RedisType::SortedSet))
        ));
    }

    #[test]
    fn test_wrong_view_is_rejected() {
        let hash = PackedValue::new_nested(RedisType::Hash);
        assert!(matches!(hash.string_ref(), Err(StoreError::WrongType)));
        assert!(matches!(hash.nested_root(RedisType::Set), Err(StoreError::WrongType)));
        assert!(hash.nested_root(RedisType::Hash).unwrap().is_empty());

        let mut string = PackedValue::new_string(&[0]);
        assert!(matches!(
            string.set_nested_root(NestedRoot::EMPTY),
            Err(StoreError::WrongType)
        ));
    }
}
