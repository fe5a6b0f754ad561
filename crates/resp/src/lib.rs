//! RESP (REdis Serialization Protocol) support library
//!
//! Reply values, their wire encoding, and typed commands built from
//! already-tokenized arguments

pub mod command;
mod encoder;

pub use command::{Command, CommandError, CommandErrorKind, CommandResult};
pub use encoder::{encode_to_vec, RespEncoder};

use bytes::Bytes;

/// RESP data type
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(Bytes),
    /// Error: -ERR message\r\n
    Error(Bytes),
    /// Integer: :123\r\n
    Integer(i64),
    /// Bulk string: $5\r\nhello\r\n
    BulkString(Option<Bytes>),
    /// Array: *2\r\n$3\r\nGET\r\n$3\r\nkey\r\n
    Array(Vec<RespValue>),
    /// Null: $-1\r\n
    Null,
}

impl RespValue {
    /// Convert to Redis command string array
    pub fn to_command(&self) -> Option<Vec<Bytes>> {
        match self {
            RespValue::Array(items) => items
                .iter()
                .map(|item| match item {
                    RespValue::BulkString(Some(bytes)) | RespValue::SimpleString(bytes) => {
                        Some(bytes.clone())
                    }
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// Create RESP array from command
    pub fn from_command(cmd: Vec<Bytes>) -> Self {
        RespValue::Array(
            cmd.into_iter()
                .map(|s| RespValue::BulkString(Some(s)))
                .collect(),
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}
