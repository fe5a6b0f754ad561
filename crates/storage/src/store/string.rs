//! String commands

use super::Store;
use crate::blob;
use crate::error::StoreResult;
use crate::nested::{self, OuterValueWrite};
use crate::value::PackedValue;
use bytes::Bytes;
use resp::CommandResult;

impl Store {
    pub(super) fn get(&self, key: &[u8], now: u32) -> StoreResult<CommandResult> {
        let txn = self.read_txn();
        let Some(value) = nested::read_value(&txn, &self.superblock, key, now)? else {
            return Ok(CommandResult::Value(None));
        };
        let content = blob::read(&txn, value.string_ref()?)?;
        Ok(CommandResult::Value(Some(content)))
    }

    pub(super) fn set(&mut self, key: &[u8], content: &Bytes, now: u32) -> StoreResult<CommandResult> {
        self.write(|txn, superblock| {
            let mut outer = OuterValueWrite::open(txn, superblock, key, now)?;
            outer.delete()?;
            let reference = blob::write(outer.txn(), content)?;
            outer.replace(PackedValue::new_string(&reference))?;
            outer.finish()?;
            Ok(CommandResult::Ok)
        })
    }

    pub(super) fn setnx(&mut self, key: &[u8], content: &Bytes, now: u32) -> StoreResult<CommandResult> {
        self.write(|txn, superblock| {
            let mut outer = OuterValueWrite::open(txn, superblock, key, now)?;
            let created = outer.value().is_none();
            if created {
                let reference = blob::write(outer.txn(), content)?;
                outer.replace(PackedValue::new_string(&reference))?;
            }
            outer.finish()?;
            Ok(CommandResult::Integer(created as i64))
        })
    }

    pub(super) fn append(&mut self, key: &[u8], extra: &Bytes, now: u32) -> StoreResult<CommandResult> {
        self.write(|txn, superblock| {
            let mut outer = OuterValueWrite::open(txn, superblock, key, now)?;
            let existing = match outer.value() {
                Some(value) => Some(value.string_ref()?.to_vec()),
                None => None,
            };
            let reference = match existing {
                Some(reference) => blob::append(outer.txn(), &reference, extra)?,
                None => blob::write(outer.txn(), extra)?,
            };
            let len = blob::value_len(&reference)?;
            match outer.value_mut() {
                Some(value) => value.set_payload(&reference),
                None => outer.replace(PackedValue::new_string(&reference))?,
            }
            outer.finish()?;
            Ok(CommandResult::Integer(len as i64))
        })
    }

    pub(super) fn strlen(&self, key: &[u8], now: u32) -> StoreResult<CommandResult> {
        let txn = self.read_txn();
        let len = match nested::read_value(&txn, &self.superblock, key, now)? {
            Some(value) => blob::value_len(value.string_ref()?)?,
            None => 0,
        };
        Ok(CommandResult::Integer(len as i64))
    }
}
