//! Value sizing for tree leaves

use super::PackedValue;
use crate::blob;
use crate::error::StoreResult;

/// Computes the stored size of a leaf value
///
/// The tree uses it to decide whether a changed value still fits in its leaf
/// or the leaf must split.
pub trait ValueSizer {
    fn block_size(&self) -> usize;

    fn size(&self, value: &[u8]) -> StoreResult<usize>;

    fn fits(&self, value: &[u8], available: usize) -> StoreResult<bool> {
        Ok(self.size(value)? <= available)
    }
}

/// Sizer for outer-tree values (`PackedValue`)
#[derive(Debug, Clone, Copy)]
pub struct RedisValueSizer {
    block_size: usize,
}

impl RedisValueSizer {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }
}

impl ValueSizer for RedisValueSizer {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn size(&self, value: &[u8]) -> StoreResult<usize> {
        PackedValue::from_bytes(value)?.size(self.block_size)
    }
}

/// Sizer for nested-tree values: a bare blob reference, or the empty set
/// member marker
#[derive(Debug, Clone, Copy)]
pub struct NestedValueSizer {
    block_size: usize,
}

impl NestedValueSizer {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }
}

impl ValueSizer for NestedValueSizer {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn size(&self, value: &[u8]) -> StoreResult<usize> {
        if value.is_empty() {
            return Ok(0);
        }
        blob::ref_size(value, self.block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RedisType;

    #[test]
    fn test_sizers() {
        let redis = RedisValueSizer::new(4096);
        let hash = PackedValue::new_nested(RedisType::Hash);
        assert_eq!(redis.size(hash.as_bytes()).unwrap(), 13);
        assert!(redis.fits(hash.as_bytes(), 13).unwrap());

        let nested = NestedValueSizer::new(4096);
        assert_eq!(nested.size(&[]).unwrap(), 0);
        assert_eq!(nested.size(&[2, b'h', b'i']).unwrap(), 3);
        assert!(!nested.fits(&[2, b'h', b'i'], 2).unwrap());
    }
}
