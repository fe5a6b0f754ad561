//! Storage error types

use crate::serializer::BlockId;
use crate::value::RedisType;
use nk_core::{Interrupted, TableId, ThreadPoolClosed};
use thiserror::Error;

/// Storage error
#[derive(Debug, Error)]
pub enum StoreError {
    /// Key holds a value of another Redis type
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Type tag outside the known Redis types; the value is corrupt
    #[error("corrupt redis type tag {0}")]
    CorruptTypeTag(u8),

    /// Valid type tag whose value layout is not supported
    #[error("{0} values are not supported")]
    NotYetImplemented(RedisType),

    #[error("hash value is not an integer")]
    NotAnInteger,

    #[error("increment or decrement would overflow")]
    Overflow,

    #[error("key of {0} bytes exceeds the maximum key length")]
    KeyTooLong(usize),

    #[error("value of {0} bytes exceeds the maximum blob length")]
    ValueTooLarge(usize),

    #[error("block {0} not found")]
    BlockNotFound(BlockId),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error(transparent)]
    WorkerGone(#[from] ThreadPoolClosed),

    #[error("table {0} already exists")]
    TableExists(TableId),

    #[error("table {0} not found")]
    TableNotFound(TableId),

    /// The table's multistore was shut down
    #[error("table {0} is closed")]
    Closed(TableId),

    /// The table has a live multistore in this process
    #[error("table {0} is open")]
    TableOpen(TableId),
}

impl StoreError {
    /// Errors a client may trigger through ordinary commands
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            StoreError::WrongType
                | StoreError::NotYetImplemented(_)
                | StoreError::NotAnInteger
                | StoreError::Overflow
                | StoreError::KeyTooLong(_)
                | StoreError::ValueTooLarge(_)
        )
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        StoreError::Corrupt(msg.into())
    }
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(e: bincode::error::EncodeError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(e: bincode::error::DecodeError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
