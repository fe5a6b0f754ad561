//! One CPU shard of a table
//!
//! A `Store` owns the shard's superblock (local block 0 of its serializer
//! proxy) and executes typed commands against the outer key tree. Every write
//! runs in one transaction that also rewrites the superblock, so the tree
//! root, allocation cursor and metainfo move together.
//!
//! Command implementations are split by value type:
//! - `key`: DEL, EXISTS, TYPE, EXPIRE, EXPIREAT, PERSIST, TTL
//! - `string`: GET, SET, SETNX, APPEND, STRLEN
//! - `hash`: the H* commands
//! - `set`: SADD, SREM, SISMEMBER, SMEMBERS, SCARD

mod hash;
mod key;
mod set;
mod string;

use crate::btree::TreeRoot;
use crate::error::{StoreError, StoreResult};
use crate::metainfo::RegionMap;
use crate::nested;
use crate::outdated::OutdatedIndexReport;
use crate::serializer::{BlockId, SerializerProxy, NULL_BLOCK_ID};
use crate::txn::{Transaction, SUPERBLOCK_ID};
use crate::value::{NestedRoot, RedisType};
use bytes::Bytes;
use resp::{Command, CommandResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

const SUPERBLOCK_MAGIC: u32 = 0x4e4b_5342;

/// Secondary index format written by this version
pub const CURRENT_SINDEX_FORMAT: u32 = 2;

/// Secondary index record kept in shard 0's superblock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIndex {
    pub format_version: u32,
}

impl SecondaryIndex {
    pub fn is_outdated(&self) -> bool {
        self.format_version < CURRENT_SINDEX_FORMAT
    }
}

/// Root record of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSuperblock {
    magic: u32,
    next_block_id: u64,
    tree_root: BlockId,
    metainfo: RegionMap,
    sindexes: BTreeMap<String, SecondaryIndex>,
}

impl ShardSuperblock {
    fn new(metainfo: RegionMap) -> Self {
        Self {
            magic: SUPERBLOCK_MAGIC,
            next_block_id: SUPERBLOCK_ID.0 + 1,
            tree_root: NULL_BLOCK_ID,
            metainfo,
            sindexes: BTreeMap::new(),
        }
    }

    fn decode(data: &[u8]) -> StoreResult<Self> {
        let (superblock, _): (Self, usize) =
            bincode::serde::decode_from_slice(data, bincode::config::standard())?;
        if superblock.magic != SUPERBLOCK_MAGIC {
            return Err(StoreError::corrupt("bad shard superblock magic"));
        }
        Ok(superblock)
    }

    fn encode(&self) -> StoreResult<Bytes> {
        Ok(Bytes::from(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?))
    }
}

impl TreeRoot for ShardSuperblock {
    fn root_block_id(&self) -> BlockId {
        self.tree_root
    }

    fn set_root_block_id(&mut self, id: BlockId) {
        self.tree_root = id;
    }
}

pub struct Store {
    shard: usize,
    proxy: SerializerProxy,
    superblock: ShardSuperblock,
    report: Option<OutdatedIndexReport>,
}

impl Store {
    /// Initialize a new shard with `metainfo` as its region map
    pub fn create(
        proxy: SerializerProxy,
        report: Option<OutdatedIndexReport>,
        metainfo: RegionMap,
    ) -> StoreResult<Self> {
        let superblock = ShardSuperblock::new(metainfo);
        let mut txn = Transaction::begin(proxy.clone(), superblock.next_block_id);
        txn.write(SUPERBLOCK_ID, superblock.encode()?);
        txn.commit()?;
        info!(shard = proxy.shard(), metainfo = %superblock.metainfo, "Created store");
        Ok(Self {
            shard: proxy.shard(),
            proxy,
            superblock,
            report,
        })
    }

    /// Load an existing shard
    pub fn open(proxy: SerializerProxy, report: Option<OutdatedIndexReport>) -> StoreResult<Self> {
        let data = proxy
            .read(SUPERBLOCK_ID)
            .ok_or(StoreError::BlockNotFound(SUPERBLOCK_ID))?;
        let superblock = ShardSuperblock::decode(&data)?;
        let store = Self {
            shard: proxy.shard(),
            proxy,
            superblock,
            report,
        };
        store.refresh_outdated_report();
        debug!(shard = store.shard, sindexes = store.superblock.sindexes.len(), "Opened store");
        Ok(store)
    }

    pub fn shard(&self) -> usize {
        self.shard
    }

    pub fn metainfo(&self) -> &RegionMap {
        &self.superblock.metainfo
    }

    pub fn set_metainfo(&mut self, metainfo: RegionMap) -> StoreResult<()> {
        self.write(|_, superblock| {
            superblock.metainfo = metainfo;
            Ok(())
        })
    }

    pub fn sindexes(&self) -> &BTreeMap<String, SecondaryIndex> {
        &self.superblock.sindexes
    }

    /// Record a secondary index; returns false if the name is taken
    pub fn create_sindex(&mut self, name: &str, format_version: u32) -> StoreResult<bool> {
        if self.superblock.sindexes.contains_key(name) {
            return Ok(false);
        }
        self.write(|_, superblock| {
            superblock
                .sindexes
                .insert(name.to_string(), SecondaryIndex { format_version });
            Ok(())
        })?;
        self.refresh_outdated_report();
        Ok(true)
    }

    pub fn drop_sindex(&mut self, name: &str) -> StoreResult<bool> {
        if !self.superblock.sindexes.contains_key(name) {
            return Ok(false);
        }
        self.write(|_, superblock| {
            superblock.sindexes.remove(name);
            Ok(())
        })?;
        if let Some(report) = &self.report {
            report.index_dropped(name);
        }
        Ok(true)
    }

    pub fn rename_sindex(&mut self, old_name: &str, new_name: &str) -> StoreResult<bool> {
        if !self.superblock.sindexes.contains_key(old_name) || self.superblock.sindexes.contains_key(new_name) {
            return Ok(false);
        }
        self.write(|_, superblock| {
            if let Some(index) = superblock.sindexes.remove(old_name) {
                superblock.sindexes.insert(new_name.to_string(), index);
            }
            Ok(())
        })?;
        if let Some(report) = &self.report {
            report.index_renamed(old_name, new_name);
        }
        Ok(true)
    }

    fn refresh_outdated_report(&self) {
        let Some(report) = &self.report else {
            return;
        };
        let outdated: BTreeSet<String> = self
            .superblock
            .sindexes
            .iter()
            .filter(|(_, index)| index.is_outdated())
            .map(|(name, _)| name.clone())
            .collect();
        report.set_outdated_indexes(outdated);
    }

    /// Execute a command at the current wall-clock time
    pub fn execute(&mut self, command: &Command) -> CommandResult {
        self.execute_at(command, unix_now())
    }

    /// Execute a command treating `now` as the current time
    pub fn execute_at(&mut self, command: &Command, now: u32) -> CommandResult {
        match self.dispatch(command, now) {
            Ok(result) => result,
            Err(StoreError::WrongType) => CommandResult::WrongType,
            Err(e) if e.is_user_error() => CommandResult::error(e.to_string()),
            Err(e) => {
                error!(shard = self.shard, command = command.name(), error = %e, "Command failed");
                CommandResult::error("internal storage error")
            }
        }
    }

    fn dispatch(&mut self, command: &Command, now: u32) -> StoreResult<CommandResult> {
        match command {
            Command::Ping { message } => Ok(match message {
                Some(m) => CommandResult::Value(Some(m.clone())),
                None => CommandResult::SimpleString(Bytes::from_static(b"PONG")),
            }),

            Command::Del { keys } => self.del(keys, now),
            Command::Exists { keys } => self.exists(keys, now),
            Command::Type { key } => self.key_type(key, now),
            Command::Expire { key, seconds } => {
                let at = (now as u64).saturating_add(*seconds);
                self.expire_at(key, at, now)
            }
            Command::ExpireAt { key, timestamp } => self.expire_at(key, *timestamp, now),
            Command::Persist { key } => self.persist(key, now),
            Command::Ttl { key } => self.ttl(key, now),

            Command::Get { key } => self.get(key, now),
            Command::Set { key, value } => self.set(key, value, now),
            Command::SetNx { key, value } => self.setnx(key, value, now),
            Command::Append { key, value } => self.append(key, value, now),
            Command::StrLen { key } => self.strlen(key, now),

            Command::HDel { key, fields } => self.hdel(key, fields, now),
            Command::HExists { key, field } => self.hexists(key, field, now),
            Command::HGet { key, field } => self.hget(key, field, now),
            Command::HGetAll { key } => self.hgetall(key, now),
            Command::HIncrBy { key, field, delta } => self.hincrby(key, field, *delta, now),
            Command::HKeys { key } => self.hkeys(key, now),
            Command::HLen { key } => self.hlen(key, now),
            Command::HMGet { key, fields } => self.hmget(key, fields, now),
            Command::HMSet { key, fvs } => self.hmset(key, fvs, now),
            Command::HSet { key, fvs } => self.hset(key, fvs, now),
            Command::HSetNx { key, field, value } => self.hsetnx(key, field, value, now),
            Command::HVals { key } => self.hvals(key, now),

            Command::SAdd { key, members } => self.sadd(key, members, now),
            Command::SRem { key, members } => self.srem(key, members, now),
            Command::SIsMember { key, member } => self.sismember(key, member, now),
            Command::SMembers { key } => self.smembers(key, now),
            Command::SCard { key } => self.scard(key, now),
        }
    }

    /// Transaction for reads; it is never committed
    fn read_txn(&self) -> Transaction {
        Transaction::begin(self.proxy.clone(), self.superblock.next_block_id)
    }

    /// Run `f` in a write transaction and commit it with the new superblock
    ///
    /// The cached superblock only changes once the commit succeeded.
    fn write<T, F>(&mut self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Transaction, &mut ShardSuperblock) -> StoreResult<T>,
    {
        let mut superblock = self.superblock.clone();
        let mut txn = Transaction::begin(self.proxy.clone(), superblock.next_block_id);
        let out = f(&mut txn, &mut superblock)?;
        if !txn.is_dirty() && superblock == self.superblock {
            return Ok(out);
        }
        superblock.next_block_id = txn.next_block_id();
        txn.write(SUPERBLOCK_ID, superblock.encode()?);
        txn.commit()?;
        self.superblock = superblock;
        Ok(out)
    }

    /// Root of the outer key tree
    pub fn tree_root(&self) -> BlockId {
        self.superblock.tree_root
    }

    /// Nested tree root of the hash or set at `key`
    pub fn nested_root(&self, key: &[u8], kind: RedisType) -> StoreResult<Option<NestedRoot>> {
        let txn = self.read_txn();
        nested::read_nested_root(&txn, &self.superblock, key, kind, unix_now())
    }
}

pub(crate) fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::txn::tests::test_proxy;
    use resp::RespValue;
    use tempfile::TempDir;

    pub(crate) fn test_store(dir: &TempDir) -> Store {
        Store::create(test_proxy(dir, 4096), None, RegionMap::initial()).unwrap()
    }

    /// Run a command given as its wire arguments
    pub(crate) fn run(store: &mut Store, args: &[&str]) -> CommandResult {
        run_at(store, args, 1_000)
    }

    pub(crate) fn run_at(store: &mut Store, args: &[&str], now: u32) -> CommandResult {
        let args: Vec<Bytes> = args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect();
        let command = Command::from_args(&args).unwrap();
        store.execute_at(&command, now)
    }

    pub(crate) fn bulk(s: &str) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_open_after_create() {
        let dir = TempDir::new().unwrap();
        let proxy = test_proxy(&dir, 4096);
        let mut store = Store::create(proxy.clone(), None, RegionMap::initial()).unwrap();
        assert_eq!(run(&mut store, &["SET", "k", "v"]), CommandResult::Ok);
        drop(store);

        let mut store = Store::open(proxy, None).unwrap();
        assert_eq!(store.metainfo(), &RegionMap::initial());
        assert_eq!(run(&mut store, &["GET", "k"]), CommandResult::Value(bulk("v")));
    }

    #[test]
    fn test_ping_and_wrongtype_reply() {
        let dir = TempDir::new().unwrap();
        let mut store = test_store(&dir);
        assert_eq!(
            RespValue::from(run(&mut store, &["PING"])),
            RespValue::SimpleString(Bytes::from_static(b"PONG"))
        );
        run(&mut store, &["SET", "s", "x"]);
        let reply = RespValue::from(run(&mut store, &["HGET", "s", "f"]));
        assert!(reply.is_error());
    }

    #[test]
    fn test_failed_write_keeps_superblock() {
        let dir = TempDir::new().unwrap();
        let mut store = test_store(&dir);
        run(&mut store, &["SET", "s", "x"]);
        let before = store.superblock.clone();
        assert_eq!(run(&mut store, &["HSET", "s", "f", "v"]), CommandResult::WrongType);
        assert_eq!(store.superblock, before);
    }

    #[test]
    fn test_sindex_reporting() {
        use crate::outdated::OutdatedIndexTracker;
        use nk_core::TableId;

        let dir = TempDir::new().unwrap();
        let tracker = OutdatedIndexTracker::new(1);
        let table = TableId::generate();
        let proxy = test_proxy(&dir, 4096);
        let mut store =
            Store::create(proxy.clone(), Some(tracker.report(table)), RegionMap::initial()).unwrap();

        assert!(store.create_sindex("old", CURRENT_SINDEX_FORMAT - 1).unwrap());
        assert!(store.create_sindex("fresh", CURRENT_SINDEX_FORMAT).unwrap());
        assert!(!store.create_sindex("fresh", CURRENT_SINDEX_FORMAT).unwrap());
        let expected: BTreeSet<String> = ["old".to_string()].into();
        assert_eq!(tracker.with_index_set(table, |s| s.clone()), expected);

        assert!(store.rename_sindex("old", "older").unwrap());
        let expected: BTreeSet<String> = ["older".to_string()].into();
        assert_eq!(tracker.with_index_set(table, |s| s.clone()), expected);
        drop(store);
        assert!(tracker.with_index_set(table, |s| s.is_empty()));

        let store = Store::open(proxy, Some(tracker.report(table))).unwrap();
        assert_eq!(tracker.with_index_set(table, |s| s.clone()), expected);
        assert_eq!(store.sindexes().len(), 2);
    }
}
