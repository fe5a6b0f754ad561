mod common;

use common::{bulk, cmd, context, persistor};
use nk_core::{Interruptor, TableId};
use resp::CommandResult;
use nk_core::BranchId;
use std::sync::Arc;
use storage::branch_history::BranchHistoryManager;
use storage::metadata::MetadataFile;
use storage::{Multistore, StoreError, TablePersistentState, TablePersistor};
use tempfile::TempDir;

#[tokio::test]
async fn test_reopen_keeps_data_and_metainfo() {
    let dir = TempDir::new().unwrap();
    let table = TableId::generate();
    let interruptor = Interruptor::new();

    let metainfo_before = {
        let persistor = persistor(&dir).await;
        let multistore = persistor
            .add_table(table, TablePersistentState::new("users"), &interruptor)
            .await
            .unwrap();
        for i in 0..100 {
            let key = format!("user:{}", i);
            let name = format!("name-{}", i);
            multistore
                .execute(cmd(&["HSET", key.as_str(), "name", name.as_str()]))
                .await;
        }
        multistore.execute(cmd(&["SET", "greeting", "hello"])).await;
        multistore.execute(cmd(&["SADD", "tags", "a", "b"])).await;
        let metainfo = multistore.metainfo().await.unwrap();
        multistore.shutdown().await.unwrap();
        metainfo
    };

    let persistor = persistor(&dir).await;
    let mut opened = Vec::new();
    let skipped = persistor
        .read_all_tables(|id, state, multistore| opened.push((id, state, multistore)), &interruptor)
        .await
        .unwrap();
    assert!(skipped.is_empty());
    assert_eq!(opened.len(), 1);

    let (id, state, multistore) = opened.pop().unwrap();
    assert_eq!(id, table);
    assert_eq!(state.name, "users");
    assert_eq!(multistore.metainfo().await.unwrap(), metainfo_before);
    let history = multistore.branch_history().history().await;
    for map in &metainfo_before {
        for (_, version) in map.entries() {
            assert!(history.get(version.branch).is_some());
        }
    }
    for i in [0, 42, 99] {
        let key = format!("user:{}", i);
        assert_eq!(
            multistore.execute(cmd(&["HGET", key.as_str(), "name"])).await,
            CommandResult::Value(bulk(&format!("name-{}", i)))
        );
    }
    assert_eq!(
        multistore.execute(cmd(&["GET", "greeting"])).await,
        CommandResult::Value(bulk("hello"))
    );
    assert_eq!(
        multistore.execute(cmd(&["SCARD", "tags"])).await,
        CommandResult::Integer(2)
    );
    multistore.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_record_without_data_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let interruptor = Interruptor::new();

    // A crash right after the record was written, while the data file was
    // still being staged
    let crashed = TableId::generate();
    let metadata = MetadataFile::open(ctx.config.metadata_path()).await.unwrap();
    metadata
        .put_table(crashed, TablePersistentState::new("crashed"))
        .await
        .unwrap();
    std::fs::create_dir_all(ctx.config.staging_dir()).unwrap();
    std::fs::write(ctx.config.staging_path(crashed), b"half written").unwrap();
    drop(metadata);

    let persistor = TablePersistor::open(ctx.clone()).await.unwrap();
    let healthy = TableId::generate();
    persistor
        .add_table(healthy, TablePersistentState::new("healthy"), &interruptor)
        .await
        .unwrap()
        .shutdown()
        .await
        .unwrap();
    assert!(!ctx.config.staging_path(crashed).exists());

    let mut opened = Vec::new();
    let skipped = persistor
        .read_all_tables(|id, _, multistore| opened.push((id, multistore)), &interruptor)
        .await
        .unwrap();
    assert_eq!(skipped, vec![crashed]);
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].0, healthy);
    for (_, multistore) in opened {
        multistore.shutdown().await.unwrap();
    }

    // The dangling record can be dropped like any other table
    persistor.remove_table(crashed, &interruptor).await.unwrap();
    assert_eq!(persistor.tables().await.len(), 1);
}

#[tokio::test]
async fn test_crash_after_branch_history_is_recoverable() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let interruptor = Interruptor::new();

    // Record and branch history are on disk; the data file never got staged
    let crashed = TableId::generate();
    let metadata = Arc::new(MetadataFile::open(ctx.config.metadata_path()).await.unwrap());
    metadata
        .put_table(crashed, TablePersistentState::new("crashed"))
        .await
        .unwrap();
    BranchHistoryManager::new(crashed, metadata.clone())
        .record_initial_branch()
        .await
        .unwrap();
    drop(metadata);

    let persistor = TablePersistor::open(ctx.clone()).await.unwrap();
    let skipped = persistor
        .read_all_tables(|_, _, _: Multistore| panic!("nothing to open"), &interruptor)
        .await
        .unwrap();
    assert_eq!(skipped, vec![crashed]);

    let multistore = persistor.recreate_table(crashed, &interruptor).await.unwrap();
    assert_eq!(
        multistore.execute(cmd(&["SET", "k", "v"])).await,
        CommandResult::Ok
    );
    let history = multistore.branch_history().history().await;
    assert_eq!(history.branches.len(), 1);
    assert!(history.get(BranchId::nil()).is_some());
    multistore.shutdown().await.unwrap();

    let mut opened = Vec::new();
    let skipped = persistor
        .read_all_tables(|id, _, multistore| opened.push((id, multistore)), &interruptor)
        .await
        .unwrap();
    assert!(skipped.is_empty());
    let (id, multistore) = opened.pop().unwrap();
    assert_eq!(id, crashed);
    assert_eq!(
        multistore.execute(cmd(&["GET", "k"])).await,
        CommandResult::Value(bulk("v"))
    );
    multistore.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_crash_before_staged_file_moved() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let interruptor = Interruptor::new();
    let table = TableId::generate();

    // A complete, flushed data file that never left the staging directory
    {
        let persistor = TablePersistor::open(ctx.clone()).await.unwrap();
        let multistore = persistor
            .add_table(table, TablePersistentState::new("staged"), &interruptor)
            .await
            .unwrap();
        multistore.execute(cmd(&["SET", "k", "v"])).await;
        multistore.shutdown().await.unwrap();
    }
    std::fs::rename(ctx.config.table_path(table), ctx.config.staging_path(table)).unwrap();

    let persistor = TablePersistor::open(ctx.clone()).await.unwrap();
    assert!(!ctx.config.staging_path(table).exists());
    assert!(!ctx.config.table_path(table).exists());
    let skipped = persistor
        .read_all_tables(|_, _, _: Multistore| panic!("nothing to open"), &interruptor)
        .await
        .unwrap();
    assert_eq!(skipped, vec![table]);

    // Staged data never counts as committed; the table comes back empty
    let multistore = persistor.recreate_table(table, &interruptor).await.unwrap();
    assert_eq!(
        multistore.execute(cmd(&["GET", "k"])).await,
        CommandResult::Value(None)
    );
    multistore.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remove_table_then_reload() {
    let dir = TempDir::new().unwrap();
    let interruptor = Interruptor::new();
    let table = TableId::generate();
    {
        let persistor = persistor(&dir).await;
        persistor
            .add_table(table, TablePersistentState::new("gone"), &interruptor)
            .await
            .unwrap()
            .shutdown()
            .await
            .unwrap();
        persistor.remove_table(table, &interruptor).await.unwrap();
    }

    let persistor = persistor(&dir).await;
    let mut count = 0;
    let skipped = persistor
        .read_all_tables(|_, _, _| count += 1, &interruptor)
        .await
        .unwrap();
    assert!(skipped.is_empty());
    assert_eq!(count, 0);
    assert!(persistor.branch_history(table).history().await.branches.is_empty());
}

#[tokio::test]
async fn test_interrupted_scan() {
    let dir = TempDir::new().unwrap();
    let persistor = persistor(&dir).await;
    persistor
        .add_table(TableId::generate(), TablePersistentState::new("t"), &Interruptor::new())
        .await
        .unwrap()
        .shutdown()
        .await
        .unwrap();

    let interruptor = Interruptor::new();
    interruptor.cancel();
    let result = persistor
        .read_all_tables(|_, _, _: Multistore| {}, &interruptor)
        .await;
    assert!(matches!(result, Err(StoreError::Interrupted(_))));
}
