//! Set commands
//!
//! Members are keys of the set's nested tree; each maps to an empty marker.

use super::Store;
use crate::btree::{self, VirtualSuperblock};
use crate::error::StoreResult;
use crate::nested::{self, NestedFieldWrite, OuterValueWrite};
use crate::value::RedisType;
use bytes::Bytes;
use resp::CommandResult;

impl Store {
    pub(super) fn sadd(&mut self, key: &[u8], members: &[Bytes], now: u32) -> StoreResult<CommandResult> {
        self.write(|txn, superblock| {
            let mut outer = OuterValueWrite::open(txn, superblock, key, now)?;
            let mut added = 0;
            for member in members {
                let mut op = NestedFieldWrite::open(&mut outer, RedisType::Set, member)?;
                if !op.exists() {
                    op.set_marker()?;
                    added += 1;
                }
                op.finish()?;
            }
            outer.finish()?;
            Ok(CommandResult::Integer(added))
        })
    }

    pub(super) fn srem(&mut self, key: &[u8], members: &[Bytes], now: u32) -> StoreResult<CommandResult> {
        self.write(|txn, superblock| {
            let mut outer = OuterValueWrite::open(txn, superblock, key, now)?;
            if outer.nested_root(RedisType::Set)?.is_none() {
                outer.finish()?;
                return Ok(CommandResult::Integer(0));
            }
            let mut removed = 0;
            for member in members {
                let mut op = NestedFieldWrite::open(&mut outer, RedisType::Set, member)?;
                if op.exists() {
                    op.delete()?;
                    removed += 1;
                }
                op.finish()?;
            }
            outer.finish()?;
            Ok(CommandResult::Integer(removed))
        })
    }

    pub(super) fn sismember(&self, key: &[u8], member: &[u8], now: u32) -> StoreResult<CommandResult> {
        let txn = self.read_txn();
        let found = nested::get_field(&txn, &self.superblock, key, member, RedisType::Set, now)?.is_some();
        Ok(CommandResult::Integer(found as i64))
    }

    /// Members in byte order
    pub(super) fn smembers(&self, key: &[u8], now: u32) -> StoreResult<CommandResult> {
        let txn = self.read_txn();
        let Some(root) = nested::read_nested_root(&txn, &self.superblock, key, RedisType::Set, now)? else {
            return Ok(CommandResult::Array(vec![]));
        };
        let inner = VirtualSuperblock::new(root.root_block_id);
        let members = btree::scan(&txn, &inner)
            .map(|entry| entry.map(|(member, _)| member))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(CommandResult::bulks(members))
    }

    pub(super) fn scard(&self, key: &[u8], now: u32) -> StoreResult<CommandResult> {
        let txn = self.read_txn();
        let len = nested::read_nested_root(&txn, &self.superblock, key, RedisType::Set, now)?
            .map_or(0, |root| root.sub_size);
        Ok(CommandResult::Integer(len as i64))
    }
}
