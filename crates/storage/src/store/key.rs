//! Generic key commands

use super::Store;
use crate::error::StoreResult;
use crate::nested::{self, OuterValueWrite};
use bytes::Bytes;
use resp::CommandResult;

impl Store {
    pub(super) fn del(&mut self, keys: &[Bytes], now: u32) -> StoreResult<CommandResult> {
        self.write(|txn, superblock| {
            let mut removed = 0;
            for key in keys {
                let mut outer = OuterValueWrite::open(txn, superblock, key, now)?;
                if outer.delete()? {
                    removed += 1;
                }
                outer.finish()?;
            }
            Ok(CommandResult::Integer(removed))
        })
    }

    pub(super) fn exists(&self, keys: &[Bytes], now: u32) -> StoreResult<CommandResult> {
        let txn = self.read_txn();
        let mut count = 0;
        for key in keys {
            if nested::read_value(&txn, &self.superblock, key, now)?.is_some() {
                count += 1;
            }
        }
        Ok(CommandResult::Integer(count))
    }

    pub(super) fn key_type(&self, key: &[u8], now: u32) -> StoreResult<CommandResult> {
        let txn = self.read_txn();
        let name = match nested::read_value(&txn, &self.superblock, key, now)? {
            Some(value) => value.get_redis_type()?.name(),
            None => "none",
        };
        Ok(CommandResult::SimpleString(Bytes::from_static(name.as_bytes())))
    }

    /// Set an absolute expiration; a time already past deletes the key
    pub(super) fn expire_at(&mut self, key: &[u8], at: u64, now: u32) -> StoreResult<CommandResult> {
        self.write(|txn, superblock| {
            let mut outer = OuterValueWrite::open(txn, superblock, key, now)?;
            if outer.value().is_none() {
                outer.finish()?;
                return Ok(CommandResult::Integer(0));
            }
            if at <= now as u64 {
                outer.delete()?;
            } else if let Some(value) = outer.value_mut() {
                value.set_expiration(at.min(u32::MAX as u64) as u32);
            }
            outer.finish()?;
            Ok(CommandResult::Integer(1))
        })
    }

    pub(super) fn persist(&mut self, key: &[u8], now: u32) -> StoreResult<CommandResult> {
        self.write(|txn, superblock| {
            let mut outer = OuterValueWrite::open(txn, superblock, key, now)?;
            let voided = outer.value_mut().is_some_and(|value| value.void_expiration());
            outer.finish()?;
            Ok(CommandResult::Integer(voided as i64))
        })
    }

    pub(super) fn ttl(&self, key: &[u8], now: u32) -> StoreResult<CommandResult> {
        let txn = self.read_txn();
        let ttl = match nested::read_value(&txn, &self.superblock, key, now)? {
            None => -2,
            Some(value) => match value.get_expiration() {
                None => -1,
                Some(at) => at.saturating_sub(now) as i64,
            },
        };
        Ok(CommandResult::Integer(ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{bulk, run, run_at, test_store};
    use bytes::Bytes;
    use resp::CommandResult;
    use tempfile::TempDir;

    #[test]
    fn test_del_exists_type() {
        let dir = TempDir::new().unwrap();
        let mut store = test_store(&dir);
        run(&mut store, &["SET", "s", "v"]);
        run(&mut store, &["HSET", "h", "f", "v"]);
        run(&mut store, &["SADD", "m", "a"]);

        assert_eq!(run(&mut store, &["EXISTS", "s", "h", "m", "x"]), CommandResult::Integer(3));
        assert_eq!(
            run(&mut store, &["TYPE", "h"]),
            CommandResult::SimpleString(Bytes::from_static(b"hash"))
        );
        assert_eq!(
            run(&mut store, &["TYPE", "x"]),
            CommandResult::SimpleString(Bytes::from_static(b"none"))
        );
        assert_eq!(run(&mut store, &["DEL", "s", "h", "x"]), CommandResult::Integer(2));
        assert_eq!(run(&mut store, &["EXISTS", "s", "h", "m"]), CommandResult::Integer(1));
        assert_eq!(run(&mut store, &["HGET", "h", "f"]), CommandResult::Value(None));
    }

    #[test]
    fn test_expiration_lifecycle() {
        let dir = TempDir::new().unwrap();
        let mut store = test_store(&dir);
        run_at(&mut store, &["SET", "k", "v"], 100);

        assert_eq!(run_at(&mut store, &["TTL", "k"], 100), CommandResult::Integer(-1));
        assert_eq!(run_at(&mut store, &["EXPIRE", "k", "50"], 100), CommandResult::Integer(1));
        assert_eq!(run_at(&mut store, &["TTL", "k"], 120), CommandResult::Integer(30));
        assert_eq!(run_at(&mut store, &["GET", "k"], 149), CommandResult::Value(bulk("v")));
        assert_eq!(run_at(&mut store, &["GET", "k"], 150), CommandResult::Value(None));
        assert_eq!(run_at(&mut store, &["TTL", "k"], 150), CommandResult::Integer(-2));

        run_at(&mut store, &["SET", "k", "again"], 200);
        assert_eq!(run_at(&mut store, &["EXPIREAT", "k", "300"], 200), CommandResult::Integer(1));
        assert_eq!(run_at(&mut store, &["PERSIST", "k"], 250), CommandResult::Integer(1));
        assert_eq!(run_at(&mut store, &["PERSIST", "k"], 250), CommandResult::Integer(0));
        assert_eq!(run_at(&mut store, &["GET", "k"], 400), CommandResult::Value(bulk("again")));

        assert_eq!(run_at(&mut store, &["EXPIREAT", "k", "10"], 400), CommandResult::Integer(1));
        assert_eq!(run_at(&mut store, &["EXISTS", "k"], 400), CommandResult::Integer(0));
        assert_eq!(run_at(&mut store, &["EXPIRE", "missing", "10"], 400), CommandResult::Integer(0));
    }
}
