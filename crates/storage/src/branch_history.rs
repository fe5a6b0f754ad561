//! Per-table branch history
//!
//! Every branch a table's data was written on has a birth certificate: the
//! region it covers, the timestamp it starts at, and the versions of the
//! data it was forked from. Walking certificates answers whether one version
//! is an ancestor of another.

use crate::error::{StoreError, StoreResult};
use crate::metadata::MetadataFile;
use crate::metainfo::{RegionMap, Version};
use nk_core::{BranchId, SlotRange, TableId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchBirthCertificate {
    pub region: SlotRange,
    pub initial_timestamp: u64,
    /// Versions of the parent data over `region`
    pub origin: RegionMap,
}

impl BranchBirthCertificate {
    /// Certificate of the nil branch every fresh shard starts on; it has no
    /// parent data
    pub fn initial() -> Self {
        Self {
            region: SlotRange::universe(),
            initial_timestamp: 0,
            origin: RegionMap::empty(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchHistory {
    pub branches: BTreeMap<BranchId, BranchBirthCertificate>,
}

impl BranchHistory {
    pub fn get(&self, branch: BranchId) -> Option<&BranchBirthCertificate> {
        self.branches.get(&branch)
    }

    /// Whether data at `descendant` includes every write up to `ancestor` at `slot`
    ///
    /// Version zero is an ancestor of everything. An unknown branch is an error.
    pub fn is_ancestor(&self, ancestor: Version, mut descendant: Version, slot: u32) -> StoreResult<bool> {
        if ancestor.is_zero() {
            return Ok(true);
        }
        loop {
            if descendant.branch == ancestor.branch {
                return Ok(ancestor.timestamp <= descendant.timestamp);
            }
            if descendant.is_zero() {
                return Ok(false);
            }
            let cert = self.get(descendant.branch).ok_or_else(|| {
                StoreError::corrupt(format!("branch {} missing from history", descendant.branch))
            })?;
            match cert.origin.get(slot) {
                Some(origin) => descendant = *origin,
                None => return Ok(false),
            }
        }
    }

    /// Copy in certificates from another history; existing ones must agree
    pub fn import(&mut self, other: &BranchHistory) -> StoreResult<()> {
        for (branch, cert) in &other.branches {
            match self.branches.get(branch) {
                Some(existing) if existing != cert => {
                    return Err(StoreError::corrupt(format!(
                        "conflicting birth certificates for branch {}",
                        branch
                    )));
                }
                Some(_) => {}
                None => {
                    self.branches.insert(*branch, cert.clone());
                }
            }
        }
        Ok(())
    }
}

/// Branch history of one table, persisted in the metadata file
#[derive(Clone)]
pub struct BranchHistoryManager {
    table: TableId,
    metadata: Arc<MetadataFile>,
}

impl BranchHistoryManager {
    pub fn new(table: TableId, metadata: Arc<MetadataFile>) -> Self {
        Self { table, metadata }
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub async fn history(&self) -> BranchHistory {
        self.metadata
            .branch_history(self.table)
            .await
            .unwrap_or_default()
    }

    /// Record a new branch over `region` forked from `origin`
    pub async fn create_branch(
        &self,
        region: SlotRange,
        initial_timestamp: u64,
        origin: RegionMap,
    ) -> StoreResult<BranchId> {
        let branch = BranchId::generate();
        let mut history = self.history().await;
        history.branches.insert(
            branch,
            BranchBirthCertificate {
                region,
                initial_timestamp,
                origin,
            },
        );
        self.metadata.put_branch_history(self.table, history).await?;
        info!(table = %self.table, %branch, %region, "Created branch");
        Ok(branch)
    }

    /// Record the nil branch behind version zero unless it is already known
    pub async fn record_initial_branch(&self) -> StoreResult<()> {
        let mut history = self.history().await;
        if history.get(BranchId::nil()).is_some() {
            return Ok(());
        }
        history
            .branches
            .insert(BranchId::nil(), BranchBirthCertificate::initial());
        self.metadata.put_branch_history(self.table, history).await?;
        info!(table = %self.table, "Recorded initial branch");
        Ok(())
    }

    pub async fn import(&self, other: &BranchHistory) -> StoreResult<()> {
        let mut history = self.history().await;
        history.import(other)?;
        self.metadata.put_branch_history(self.table, history).await
    }
}
