//! Core primitives shared by the storage engine and the node
//!
//! - Key to slot hashing and slot ranges (regions)
//! - Table and branch identifiers
//! - Interruptor signal used by every cancellable operation
//! - Worker thread pool with explicit thread switching

pub mod ids;
pub mod shard;
pub mod signal;
pub mod threads;

// Re-export commonly used types
pub use ids::{BranchId, TableId};
pub use shard::{slot_for_key, SlotRange, CPU_SHARDING_FACTOR, TOTAL_SLOTS};
pub use signal::{interruptible, Interrupted, Interruptor};
pub use threads::{ThreadId, ThreadPool, ThreadPoolClosed};
