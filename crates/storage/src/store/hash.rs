//! Hash commands
//!
//! Field writes go through `NestedFieldWrite`, one fresh field scope per
//! field at the hash's current nested root. Missing keys read as empty hashes.

use super::Store;
use crate::blob;
use crate::btree::{self, VirtualSuperblock};
use crate::error::{StoreError, StoreResult};
use crate::nested::{self, NestedFieldWrite, OuterValueWrite};
use crate::txn::Transaction;
use crate::value::RedisType;
use bytes::Bytes;
use resp::CommandResult;

impl Store {
    pub(super) fn hget(&self, key: &[u8], field: &[u8], now: u32) -> StoreResult<CommandResult> {
        Ok(CommandResult::Value(self.hash_field(key, field, now)?))
    }

    pub(super) fn hexists(&self, key: &[u8], field: &[u8], now: u32) -> StoreResult<CommandResult> {
        let txn = self.read_txn();
        let found = nested::get_field(&txn, &self.superblock, key, field, RedisType::Hash, now)?.is_some();
        Ok(CommandResult::Integer(found as i64))
    }

    pub(super) fn hmget(&self, key: &[u8], fields: &[Bytes], now: u32) -> StoreResult<CommandResult> {
        let values = fields
            .iter()
            .map(|field| self.hash_field(key, field, now))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(CommandResult::Array(values))
    }

    pub(super) fn hlen(&self, key: &[u8], now: u32) -> StoreResult<CommandResult> {
        let txn = self.read_txn();
        let len = nested::read_nested_root(&txn, &self.superblock, key, RedisType::Hash, now)?
            .map_or(0, |root| root.sub_size);
        Ok(CommandResult::Integer(len as i64))
    }

    pub(super) fn hgetall(&self, key: &[u8], now: u32) -> StoreResult<CommandResult> {
        let mut pairs = Vec::new();
        self.scan_hash(key, now, |txn, field, reference| {
            pairs.push((field, blob::read(txn, &reference)?));
            Ok(())
        })?;
        Ok(CommandResult::KeyValueArray(pairs))
    }

    pub(super) fn hkeys(&self, key: &[u8], now: u32) -> StoreResult<CommandResult> {
        let mut fields = Vec::new();
        self.scan_hash(key, now, |_, field, _| {
            fields.push(field);
            Ok(())
        })?;
        Ok(CommandResult::bulks(fields))
    }

    pub(super) fn hvals(&self, key: &[u8], now: u32) -> StoreResult<CommandResult> {
        let mut values = Vec::new();
        self.scan_hash(key, now, |txn, _, reference| {
            values.push(blob::read(txn, &reference)?);
            Ok(())
        })?;
        Ok(CommandResult::bulks(values))
    }

    pub(super) fn hset(&mut self, key: &[u8], fvs: &[(Bytes, Bytes)], now: u32) -> StoreResult<CommandResult> {
        let added = self.hash_write(key, fvs, now, true)?;
        Ok(CommandResult::Integer(added))
    }

    pub(super) fn hmset(&mut self, key: &[u8], fvs: &[(Bytes, Bytes)], now: u32) -> StoreResult<CommandResult> {
        self.hash_write(key, fvs, now, true)?;
        Ok(CommandResult::Ok)
    }

    pub(super) fn hsetnx(&mut self, key: &[u8], field: &Bytes, value: &Bytes, now: u32) -> StoreResult<CommandResult> {
        let added = self.hash_write(key, &[(field.clone(), value.clone())], now, false)?;
        Ok(CommandResult::Integer(added))
    }

    pub(super) fn hdel(&mut self, key: &[u8], fields: &[Bytes], now: u32) -> StoreResult<CommandResult> {
        self.write(|txn, superblock| {
            let mut outer = OuterValueWrite::open(txn, superblock, key, now)?;
            if outer.nested_root(RedisType::Hash)?.is_none() {
                outer.finish()?;
                return Ok(CommandResult::Integer(0));
            }
            let mut removed = 0;
            for field in fields {
                let mut op = NestedFieldWrite::open(&mut outer, RedisType::Hash, field)?;
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

    pub(super) fn hincrby(&mut self, key: &[u8], field: &[u8], delta: i64, now: u32) -> StoreResult<CommandResult> {
        self.write(|txn, superblock| {
            let mut outer = OuterValueWrite::open(txn, superblock, key, now)?;
            let mut op = NestedFieldWrite::open(&mut outer, RedisType::Hash, field)?;
            let current = match op.read_blob()? {
                Some(content) => parse_i64(&content)?,
                None => 0,
            };
            let next = current.checked_add(delta).ok_or(StoreError::Overflow)?;
            op.set_blob(next.to_string().as_bytes())?;
            op.finish()?;
            outer.finish()?;
            Ok(CommandResult::Integer(next))
        })
    }

    /// Set fields one scope at a time; returns how many were new
    fn hash_write(&mut self, key: &[u8], fvs: &[(Bytes, Bytes)], now: u32, overwrite: bool) -> StoreResult<i64> {
        self.write(|txn, superblock| {
            let mut outer = OuterValueWrite::open(txn, superblock, key, now)?;
            let mut added = 0;
            for (field, value) in fvs {
                let mut op = NestedFieldWrite::open(&mut outer, RedisType::Hash, field)?;
                let existed = op.exists();
                if !existed {
                    added += 1;
                }
                if overwrite || !existed {
                    op.set_blob(value)?;
                }
                op.finish()?;
            }
            outer.finish()?;
            Ok(added)
        })
    }

    fn hash_field(&self, key: &[u8], field: &[u8], now: u32) -> StoreResult<Option<Bytes>> {
        let txn = self.read_txn();
        match nested::get_field(&txn, &self.superblock, key, field, RedisType::Hash, now)? {
            Some(reference) => Ok(Some(blob::read(&txn, &reference)?)),
            None => Ok(None),
        }
    }

    /// Visit every field of a hash in field order
    fn scan_hash<F>(&self, key: &[u8], now: u32, mut visit: F) -> StoreResult<()>
    where
        F: FnMut(&Transaction, Bytes, Bytes) -> StoreResult<()>,
    {
        let txn = self.read_txn();
        let Some(root) = nested::read_nested_root(&txn, &self.superblock, key, RedisType::Hash, now)? else {
            return Ok(());
        };
        let inner = VirtualSuperblock::new(root.root_block_id);
        for entry in btree::scan(&txn, &inner) {
            let (field, reference) = entry?;
            visit(&txn, field, reference)?;
        }
        Ok(())
    }
}

fn parse_i64(content: &[u8]) -> StoreResult<i64> {
    std::str::from_utf8(content)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(StoreError::NotAnInteger)
}
