//! Command execution result type

use crate::RespValue;
use bytes::Bytes;

/// Command execution result
///
/// Every handler answers with one of these; each maps onto exactly one RESP reply shape.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// +OK
    Ok,
    /// Custom status line (TYPE, PING)
    SimpleString(Bytes),
    /// Integer reply
    Integer(i64),
    /// Bulk reply, nil when `None`
    Value(Option<Bytes>),
    /// Multi-bulk reply; `None` items encode as nil
    Array(Vec<Option<Bytes>>),
    /// Flattened field/value multi-bulk (HGETALL)
    KeyValueArray(Vec<(Bytes, Bytes)>),
    /// -ERR reply
    Error(String),
    /// -WRONGTYPE reply
    WrongType,
}

impl CommandResult {
    pub fn ok() -> Self {
        CommandResult::Ok
    }

    pub fn integer(n: i64) -> Self {
        CommandResult::Integer(n)
    }

    pub fn value(v: Option<Bytes>) -> Self {
        CommandResult::Value(v)
    }

    /// Multi-bulk of present values
    pub fn bulks(items: Vec<Bytes>) -> Self {
        CommandResult::Array(items.into_iter().map(Some).collect())
    }

    pub fn error(msg: impl Into<String>) -> Self {
        CommandResult::Error(msg.into())
    }

    pub fn wrong_type() -> Self {
        CommandResult::WrongType
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CommandResult::Error(_) | CommandResult::WrongType)
    }
}

fn bulk(v: Option<Bytes>) -> RespValue {
    match v {
        Some(bytes) => RespValue::BulkString(Some(bytes)),
        None => RespValue::Null,
    }
}

impl From<CommandResult> for RespValue {
    fn from(result: CommandResult) -> Self {
        match result {
            CommandResult::Ok => RespValue::SimpleString(Bytes::from_static(b"OK")),
            CommandResult::SimpleString(s) => RespValue::SimpleString(s),
            CommandResult::Integer(n) => RespValue::Integer(n),
            CommandResult::Value(v) => bulk(v),
            CommandResult::Array(arr) => RespValue::Array(arr.into_iter().map(bulk).collect()),
            CommandResult::KeyValueArray(kvs) => RespValue::Array(
                kvs.into_iter()
                    .flat_map(|(k, v)| {
                        [
                            RespValue::BulkString(Some(k)),
                            RespValue::BulkString(Some(v)),
                        ]
                    })
                    .collect(),
            ),
            CommandResult::Error(msg) => RespValue::Error(Bytes::from(format!("ERR {}", msg))),
            CommandResult::WrongType => RespValue::Error(Bytes::from_static(
                b"WRONGTYPE Operation against a key holding the wrong kind of value",
            )),
        }
    }
}
