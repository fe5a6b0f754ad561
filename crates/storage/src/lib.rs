//! Storage engine for nested Redis values
//!
//! Layering, bottom up:
//!
//! - `serializer`: block file, merging layer and the per-shard multiplexer
//! - `txn` / `blob`: buffered block transactions and blob references
//! - `value`: packed on-disk value headers and payloads
//! - `btree`: byte-keyed B+tree over transaction blocks
//! - `nested`: hash/set field access through a nested tree held by a value
//! - `store`: one CPU shard, executing typed commands
//! - `multistore` / `persistor`: table lifecycle across all CPU shards

pub mod blob;
pub mod branch_history;
pub mod btree;
pub mod config;
pub mod context;
pub mod error;
pub mod metadata;
pub mod metainfo;
pub mod multistore;
pub mod nested;
pub mod outdated;
pub mod persistor;
pub mod serializer;
pub mod store;
pub mod txn;
pub mod value;

pub use config::StorageConfig;
pub use context::StorageContext;
pub use error::{StoreError, StoreResult};
pub use metadata::TablePersistentState;
pub use multistore::Multistore;
pub use outdated::{OutdatedIndexMap, OutdatedIndexReport, OutdatedIndexTracker};
pub use persistor::TablePersistor;
pub use serializer::{BlockId, NULL_BLOCK_ID};
pub use store::Store;
pub use value::{PackedValue, RedisType};
