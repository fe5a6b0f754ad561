//! Region-tagged version metainfo
//!
//! Each shard records, per slot region, the replication version its data is
//! at. A fresh shard holds one universe region at version zero.

use nk_core::{BranchId, SlotRange};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Point in a table's branch history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub branch: BranchId,
    pub timestamp: u64,
}

impl Version {
    /// State before any write, on the nil branch
    pub fn zero() -> Self {
        Self {
            branch: BranchId::nil(),
            timestamp: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.branch.is_nil() && self.timestamp == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.branch, self.timestamp)
    }
}

/// Disjoint regions, each tagged with a version, sorted by start slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionMap {
    entries: Vec<(SlotRange, Version)>,
}

impl RegionMap {
    pub fn new(region: SlotRange, version: Version) -> Self {
        Self {
            entries: vec![(region, version)],
        }
    }

    /// No regions at all
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Universe region at version zero
    pub fn initial() -> Self {
        Self::new(SlotRange::universe(), Version::zero())
    }

    pub fn entries(&self) -> &[(SlotRange, Version)] {
        &self.entries
    }

    pub fn get(&self, slot: u32) -> Option<&Version> {
        self.entries
            .iter()
            .find(|(region, _)| region.contains_slot(slot))
            .map(|(_, version)| version)
    }

    /// Tag `region` with `version`, splitting any entries it overlaps
    pub fn update(&mut self, region: SlotRange, version: Version) {
        let mut entries = Vec::with_capacity(self.entries.len() + 2);
        for (existing, v) in self.entries.drain(..) {
            if existing.intersection(&region).is_none() {
                entries.push((existing, v));
                continue;
            }
            let before = SlotRange::new(existing.start, region.start.min(existing.end));
            let after = SlotRange::new(region.end.max(existing.start), existing.end);
            if !before.is_empty() {
                entries.push((before, v));
            }
            if !after.is_empty() {
                entries.push((after, v));
            }
        }
        entries.push((region, version));
        entries.sort_by_key(|(r, _)| r.start);
        self.entries = entries;
    }

    /// Entries restricted to `region`
    pub fn mask(&self, region: SlotRange) -> RegionMap {
        RegionMap {
            entries: self
                .entries
                .iter()
                .filter_map(|(r, v)| r.intersection(&region).map(|i| (i, *v)))
                .collect(),
        }
    }
}

impl fmt::Display for RegionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (region, version)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} -> {}", region, version)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nk_core::TOTAL_SLOTS;

    #[test]
    fn test_initial_covers_universe() {
        let map = RegionMap::initial();
        assert_eq!(map.entries().len(), 1);
        assert!(map.get(0).unwrap().is_zero());
        assert!(map.get(TOTAL_SLOTS - 1).unwrap().is_zero());
    }

    #[test]
    fn test_update_splits_regions() {
        let mut map = RegionMap::initial();
        let version = Version {
            branch: BranchId::generate(),
            timestamp: 7,
        };
        map.update(SlotRange::new(100, 200), version);
        assert_eq!(map.entries().len(), 3);
        assert!(map.get(99).unwrap().is_zero());
        assert_eq!(map.get(150), Some(&version));
        assert!(map.get(200).unwrap().is_zero());

        let masked = map.mask(SlotRange::new(150, 250));
        assert_eq!(masked.entries().len(), 2);
        assert_eq!(masked.entries()[0], (SlotRange::new(150, 200), version));
    }
}
