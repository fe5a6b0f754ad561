#![allow(dead_code)]

use bytes::Bytes;
use resp::Command;
use storage::{StorageConfig, StorageContext, TablePersistor};
use tempfile::TempDir;

pub fn context(dir: &TempDir) -> StorageContext {
    let mut config = StorageConfig::with_data_dir(dir.path());
    config.worker_threads = 4;
    config.merger_flush_threshold = 8;
    StorageContext::new(config).unwrap()
}

pub async fn persistor(dir: &TempDir) -> TablePersistor {
    TablePersistor::open(context(dir)).await.unwrap()
}

/// Build a command from its wire arguments
pub fn cmd(args: &[&str]) -> Command {
    let args: Vec<Bytes> = args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect();
    Command::from_args(&args).unwrap()
}

pub fn bulk(s: &str) -> Option<Bytes> {
    Some(Bytes::copy_from_slice(s.as_bytes()))
}
