//! Slot routing and regions
//!
//! Keys hash to one of `TOTAL_SLOTS` slots. A region is a half-open slot range;
//! each CPU shard of a table owns one contiguous region.

use crc::{Crc, CRC_16_XMODEM};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Total number of slots (consistent with Redis Cluster)
pub const TOTAL_SLOTS: u32 = 16384;

/// Number of CPU shards a table is split into on one node
pub const CPU_SHARDING_FACTOR: usize = 4;

/// CRC16 calculator for Redis Cluster (XMODEM variant)
static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculate slot for a key
pub fn slot_for_key(key: &[u8]) -> u32 {
    CRC16.checksum(key) as u32 % TOTAL_SLOTS
}

/// Half-open slot range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotRange {
    /// Start slot (inclusive)
    pub start: u32,
    /// End slot (exclusive)
    pub end: u32,
}

impl SlotRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// The region covering every slot
    pub fn universe() -> Self {
        Self::new(0, TOTAL_SLOTS)
    }

    /// Region owned by CPU shard `shard` out of `shard_count`
    pub fn for_cpu_shard(shard: usize, shard_count: usize) -> Self {
        let n = shard_count.max(1) as u64;
        let start = (shard as u64 * TOTAL_SLOTS as u64 / n) as u32;
        let end = ((shard as u64 + 1) * TOTAL_SLOTS as u64 / n) as u32;
        Self::new(start, end)
    }

    /// CPU shard owning `key`
    pub fn cpu_shard_for_key(key: &[u8], shard_count: usize) -> usize {
        let n = shard_count.max(1) as u64;
        (slot_for_key(key) as u64 * n / TOTAL_SLOTS as u64) as usize
    }

    /// Check if a slot belongs to this range
    pub fn contains_slot(&self, slot: u32) -> bool {
        slot >= self.start && slot < self.end
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.contains_slot(slot_for_key(key))
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn slot_count(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Intersection of two ranges, `None` when they do not overlap
    pub fn intersection(&self, other: &SlotRange) -> Option<SlotRange> {
        let r = SlotRange::new(self.start.max(other.start), self.end.min(other.end));
        (!r.is_empty()).then_some(r)
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_range_contains_slot() {
        let range = SlotRange::new(0, 4096);
        assert!(range.contains_slot(0));
        assert!(range.contains_slot(4095));
        assert!(!range.contains_slot(4096));
        assert!(!range.contains_slot(10000));
    }

    #[test]
    fn test_cpu_shards_partition_universe() {
        let mut next = 0;
        for shard in 0..CPU_SHARDING_FACTOR {
            let range = SlotRange::for_cpu_shard(shard, CPU_SHARDING_FACTOR);
            assert_eq!(range.start, next);
            next = range.end;
        }
        assert_eq!(next, TOTAL_SLOTS);
    }

    #[test]
    fn test_key_lands_in_its_shard_range() {
        for key in [&b"user:1"[..], b"user:2", b"a", b"", b"{tag}x"] {
            let shard = SlotRange::cpu_shard_for_key(key, CPU_SHARDING_FACTOR);
            assert!(shard < CPU_SHARDING_FACTOR);
            assert!(SlotRange::for_cpu_shard(shard, CPU_SHARDING_FACTOR).contains_key(key));
        }
    }

    #[test]
    fn test_intersection() {
        let a = SlotRange::new(0, 100);
        assert_eq!(a.intersection(&SlotRange::new(50, 200)), Some(SlotRange::new(50, 100)));
        assert_eq!(a.intersection(&SlotRange::new(100, 200)), None);
    }
}
