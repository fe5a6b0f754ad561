//! Multistore: all CPU shards of one table
//!
//! One serializer file backs a table. The serializer and its multiplexer live
//! on one worker thread; each shard's `Store` lives on its own worker thread
//! and is only ever touched there, through `ThreadPool::run_on`.
//!
//! Creation records the table's initial branch, writes the file under the
//! staging directory and moves it to its permanent path as the very last
//! step, so a crash mid-creation leaves only a staging file behind.
//!
//! A multistore claims its table in the context's open table set for its
//! whole lifetime.

use crate::branch_history::BranchHistoryManager;
use crate::context::{StorageContext, TableClaim};
use crate::error::{StoreError, StoreResult};
use crate::metainfo::RegionMap;
use crate::serializer::{MergerSerializer, Serializer, SerializerMultiplexer, SharedSerializer};
use crate::store::Store;
use bytes::Bytes;
use futures_util::future::join_all;
use nk_core::{interruptible, Interruptor, SlotRange, TableId, ThreadId, CPU_SHARDING_FACTOR};
use parking_lot::Mutex;
use resp::{Command, CommandResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

struct ShardSlot {
    thread: ThreadId,
    store: Arc<Mutex<Option<Store>>>,
}

pub struct Multistore {
    table: TableId,
    ctx: StorageContext,
    serializer_thread: ThreadId,
    serializer: Option<SharedSerializer>,
    multiplexer: Option<SerializerMultiplexer>,
    shards: Vec<ShardSlot>,
    branch_history: BranchHistoryManager,
    // Declared last so it is released after the serializer is gone
    _claim: TableClaim,
}

impl Multistore {
    /// Create the data file of the table `branch_history` belongs to; fails
    /// if one already exists
    pub async fn create(
        ctx: &StorageContext,
        branch_history: BranchHistoryManager,
        interruptor: &Interruptor,
    ) -> StoreResult<Self> {
        let table = branch_history.table();
        if ctx.config.table_path(table).exists() {
            return Err(StoreError::TableExists(table));
        }
        Self::construct(ctx, branch_history, true, interruptor).await
    }

    /// Open the table's existing data file
    pub async fn open(
        ctx: &StorageContext,
        branch_history: BranchHistoryManager,
        interruptor: &Interruptor,
    ) -> StoreResult<Self> {
        Self::construct(ctx, branch_history, false, interruptor).await
    }

    /// Open the data file if there is one, otherwise create it
    pub async fn load(
        ctx: &StorageContext,
        branch_history: BranchHistoryManager,
        interruptor: &Interruptor,
    ) -> StoreResult<Self> {
        let create = !ctx.config.table_path(branch_history.table()).exists();
        Self::construct(ctx, branch_history, create, interruptor).await
    }

    async fn construct(
        ctx: &StorageContext,
        branch_history: BranchHistoryManager,
        create: bool,
        interruptor: &Interruptor,
    ) -> StoreResult<Self> {
        let table = branch_history.table();
        let claim = ctx.open_tables.claim(table)?;
        if create {
            // Fresh shards start at version zero on the nil branch
            interruptible(branch_history.record_initial_branch(), interruptor).await??;
        }

        let pool = ctx.pool.clone();
        let config = ctx.config.clone();
        let serializer_thread = pool.pick_thread();

        let staging_path = config.staging_path(table);
        let table_path = config.table_path(table);
        let (serializer, multiplexer) = interruptible(
            pool.run_on(serializer_thread, move || -> StoreResult<_> {
                let file = if create {
                    Serializer::create(staging_path, config.block_size)?
                } else {
                    Serializer::open(table_path)?
                };
                let shared = MergerSerializer::new(file, config.merger_flush_threshold).into_shared();
                if create {
                    SerializerMultiplexer::create(&shared, CPU_SHARDING_FACTOR)?;
                }
                let multiplexer = SerializerMultiplexer::open(shared.clone())?;
                Ok((shared, multiplexer))
            }),
            interruptor,
        )
        .await???;

        let threads: Vec<ThreadId> = (0..multiplexer.proxy_count()).map(|_| pool.pick_thread()).collect();
        let builds = multiplexer.proxies().into_iter().zip(threads.iter().copied()).map(|(proxy, thread)| {
            let tracker = ctx.outdated.clone();
            pool.run_on(thread, move || {
                // Outdated indexes are tracked per table; shard 0 reports them
                let report = (proxy.shard() == 0).then(|| tracker.report(table));
                if create {
                    Store::create(proxy, report, RegionMap::initial())
                } else {
                    Store::open(proxy, report)
                }
            })
        });
        let results = interruptible(join_all(builds), interruptor).await?;

        let mut shards = Vec::with_capacity(results.len());
        for (result, thread) in results.into_iter().zip(threads) {
            let store = result??;
            shards.push(ShardSlot {
                thread,
                store: Arc::new(Mutex::new(Some(store))),
            });
        }

        let multistore = Self {
            table,
            ctx: ctx.clone(),
            serializer_thread,
            serializer: Some(serializer),
            multiplexer: Some(multiplexer),
            shards,
            branch_history,
            _claim: claim,
        };

        if create {
            let serializer = multistore.shared_serializer()?;
            let table_path = multistore.ctx.config.table_path(table);
            interruptible(
                pool.run_on(serializer_thread, move || -> StoreResult<()> {
                    let mut serializer = serializer.lock();
                    serializer.flush()?;
                    serializer.inner_mut().move_to(table_path)
                }),
                interruptor,
            )
            .await???;
            info!(table = %table, shards = multistore.shards.len(), "Created multistore");
        } else {
            info!(table = %table, shards = multistore.shards.len(), "Opened multistore");
        }
        Ok(multistore)
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn branch_history(&self) -> &BranchHistoryManager {
        &self.branch_history
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard owning `key`
    pub fn shard_for_key(&self, key: &[u8]) -> usize {
        SlotRange::cpu_shard_for_key(key, self.shards.len())
    }

    fn shared_serializer(&self) -> StoreResult<SharedSerializer> {
        self.serializer.clone().ok_or(StoreError::Closed(self.table))
    }

    /// Run `f` against one shard's store on that store's thread
    pub async fn with_store<F, R>(&self, shard: usize, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Store) -> R + Send + 'static,
        R: Send + 'static,
    {
        let slot = self
            .shards
            .get(shard)
            .ok_or_else(|| StoreError::corrupt(format!("no shard {} in table {}", shard, self.table)))?;
        let store = slot.store.clone();
        let table = self.table;
        self.ctx
            .pool
            .run_on(slot.thread, move || -> StoreResult<R> {
                let mut guard = store.lock();
                let store = guard.as_mut().ok_or(StoreError::Closed(table))?;
                Ok(f(store))
            })
            .await?
    }

    /// Every shard's region map, in shard order
    pub async fn metainfo(&self) -> StoreResult<Vec<RegionMap>> {
        let mut maps = Vec::with_capacity(self.shards.len());
        for shard in 0..self.shards.len() {
            maps.push(self.with_store(shard, |store| store.metainfo().clone()).await?);
        }
        Ok(maps)
    }

    /// Execute a command on the shards owning its keys
    ///
    /// DEL and EXISTS may span shards; their per-shard counts are summed.
    pub async fn execute(&self, command: Command) -> CommandResult {
        match command {
            Command::Del { keys } => self.execute_split(keys, |keys| Command::Del { keys }).await,
            Command::Exists { keys } => self.execute_split(keys, |keys| Command::Exists { keys }).await,
            command => {
                let shard = command.keys().first().map_or(0, |key| self.shard_for_key(key));
                self.execute_on(shard, command).await
            }
        }
    }

    async fn execute_split<F>(&self, keys: Vec<Bytes>, rebuild: F) -> CommandResult
    where
        F: Fn(Vec<Bytes>) -> Command,
    {
        let mut by_shard: BTreeMap<usize, Vec<Bytes>> = BTreeMap::new();
        for key in keys {
            by_shard.entry(self.shard_for_key(&key)).or_default().push(key);
        }
        let replies = join_all(
            by_shard
                .into_iter()
                .map(|(shard, keys)| self.execute_on(shard, rebuild(keys))),
        )
        .await;

        let mut total = 0;
        for reply in replies {
            match reply {
                CommandResult::Integer(n) => total += n,
                other => return other,
            }
        }
        CommandResult::Integer(total)
    }

    async fn execute_on(&self, shard: usize, command: Command) -> CommandResult {
        let name = command.name();
        match self.with_store(shard, move |store| store.execute(&command)).await {
            Ok(result) => result,
            Err(e) => {
                error!(table = %self.table, shard, command = name, error = %e, "Shard unavailable");
                CommandResult::error("internal storage error")
            }
        }
    }

    /// Tear down stores, then the multiplexer, then the serializer
    pub async fn shutdown(mut self) -> StoreResult<()> {
        let pool = self.ctx.pool.clone();
        let closes = self.shards.iter().map(|slot| {
            let store = slot.store.clone();
            pool.run_on(slot.thread, move || {
                if let Some(store) = store.lock().take() {
                    debug!(shard = store.shard(), "Closing store");
                }
            })
        });
        for closed in join_all(closes).await {
            closed?;
        }

        let serializer = self.serializer.take();
        let multiplexer = self.multiplexer.take();
        pool.run_on(self.serializer_thread, move || -> StoreResult<()> {
            drop(multiplexer);
            match serializer {
                Some(serializer) => serializer.lock().flush(),
                None => Ok(()),
            }
        })
        .await??;
        info!(table = %self.table, "Closed multistore");
        Ok(())
    }
}

impl Drop for Multistore {
    fn drop(&mut self) {
        if self.serializer.is_some() {
            warn!(table = %self.table, "Multistore dropped without shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::metadata::MetadataFile;
    use nk_core::BranchId;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> StorageContext {
        let mut config = StorageConfig::with_data_dir(dir.path());
        config.worker_threads = 3;
        StorageContext::new(config).unwrap()
    }

    async fn history(ctx: &StorageContext, table: TableId) -> BranchHistoryManager {
        let metadata = MetadataFile::open(ctx.config.metadata_path()).await.unwrap();
        BranchHistoryManager::new(table, Arc::new(metadata))
    }

    fn args(list: &[&str]) -> Command {
        let args: Vec<Bytes> = list.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect();
        Command::from_args(&args).unwrap()
    }

    #[tokio::test]
    async fn test_create_moves_file_out_of_staging() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let table = TableId::generate();
        let branch_history = history(&ctx, table).await;
        let multistore = Multistore::create(&ctx, branch_history.clone(), &Interruptor::new())
            .await
            .unwrap();

        assert_eq!(multistore.shard_count(), CPU_SHARDING_FACTOR);
        assert!(ctx.config.table_path(table).exists());
        assert!(!ctx.config.staging_path(table).exists());
        for map in multistore.metainfo().await.unwrap() {
            assert_eq!(map, RegionMap::initial());
        }
        multistore.shutdown().await.unwrap();

        assert!(matches!(
            Multistore::create(&ctx, branch_history, &Interruptor::new()).await,
            Err(StoreError::TableExists(_))
        ));
    }

    #[tokio::test]
    async fn test_initial_branch_and_claim() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let table = TableId::generate();
        let branch_history = history(&ctx, table).await;
        let multistore = Multistore::create(&ctx, branch_history.clone(), &Interruptor::new())
            .await
            .unwrap();

        assert!(ctx.open_tables.is_open(table));
        assert!(matches!(
            Multistore::open(&ctx, branch_history.clone(), &Interruptor::new()).await,
            Err(StoreError::TableOpen(_))
        ));
        let initial = multistore.branch_history().history().await;
        assert!(initial.get(BranchId::nil()).is_some());
        multistore.shutdown().await.unwrap();
        assert!(!ctx.open_tables.is_open(table));

        // A fresh metadata handle sees the branch recorded on disk
        let reopened = Multistore::open(&ctx, history(&ctx, table).await, &Interruptor::new())
            .await
            .unwrap();
        assert_eq!(reopened.branch_history().history().await, initial);
        for map in reopened.metainfo().await.unwrap() {
            let version = map.get(0).unwrap();
            assert!(initial.get(version.branch).is_some());
        }
        reopened.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_spread_across_shards() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let table = TableId::generate();
        let multistore = Multistore::load(&ctx, history(&ctx, table).await, &Interruptor::new())
            .await
            .unwrap();

        let keys: Vec<String> = (0..64).map(|i| format!("key:{}", i)).collect();
        let shards: std::collections::BTreeSet<usize> =
            keys.iter().map(|k| multistore.shard_for_key(k.as_bytes())).collect();
        assert!(shards.len() > 1);

        for key in &keys {
            assert_eq!(multistore.execute(args(&["SET", key.as_str(), "v"])).await, CommandResult::Ok);
        }
        let mut exists = vec!["EXISTS".to_string()];
        exists.extend(keys.iter().cloned());
        exists.push("missing".to_string());
        let exists: Vec<&str> = exists.iter().map(String::as_str).collect();
        assert_eq!(multistore.execute(args(&exists)).await, CommandResult::Integer(64));

        let mut del = vec!["DEL"];
        del.extend(exists[1..].iter().copied());
        assert_eq!(multistore.execute(args(&del)).await, CommandResult::Integer(64));
        assert_eq!(
            multistore.execute(args(&["GET", "key:1"])).await,
            CommandResult::Value(None)
        );
        multistore.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let table = TableId::generate();
        let result = Multistore::open(&ctx, history(&ctx, table).await, &Interruptor::new()).await;
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(!ctx.open_tables.is_open(table));
    }

    #[tokio::test]
    async fn test_interrupted_before_start() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let interruptor = Interruptor::new();
        interruptor.cancel();
        let table = TableId::generate();
        let result = Multistore::create(&ctx, history(&ctx, table).await, &interruptor).await;
        assert!(matches!(result, Err(StoreError::Interrupted(_))));
        assert!(!ctx.open_tables.is_open(table));
    }
}
