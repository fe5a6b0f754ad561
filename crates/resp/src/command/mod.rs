//! Typed Redis commands
//!
//! Builds `Command` values from an already-tokenized request (an array of
//! bulk strings). Only the commands the storage engine serves are known.

mod error;
mod result;

pub use error::{CommandError, CommandErrorKind};
pub use result::CommandResult;

use crate::RespValue;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Redis command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// PING [message]
    Ping { message: Option<Bytes> },

    // ==================== Key Commands ====================
    /// DEL key [key ...]
    Del { keys: Vec<Bytes> },
    /// EXISTS key [key ...]
    Exists { keys: Vec<Bytes> },
    /// TYPE key
    Type { key: Bytes },
    /// EXPIRE key seconds
    Expire { key: Bytes, seconds: u64 },
    /// EXPIREAT key timestamp
    ExpireAt { key: Bytes, timestamp: u64 },
    /// PERSIST key
    Persist { key: Bytes },
    /// TTL key
    Ttl { key: Bytes },

    // ==================== String Commands ====================
    /// GET key
    Get { key: Bytes },
    /// SET key value
    Set { key: Bytes, value: Bytes },
    /// SETNX key value
    SetNx { key: Bytes, value: Bytes },
    /// APPEND key value
    Append { key: Bytes, value: Bytes },
    /// STRLEN key
    StrLen { key: Bytes },

    // ==================== Hash Commands ====================
    /// HDEL key field [field ...]
    HDel { key: Bytes, fields: Vec<Bytes> },
    /// HEXISTS key field
    HExists { key: Bytes, field: Bytes },
    /// HGET key field
    HGet { key: Bytes, field: Bytes },
    /// HGETALL key
    HGetAll { key: Bytes },
    /// HINCRBY key field increment
    HIncrBy {
        key: Bytes,
        field: Bytes,
        delta: i64,
    },
    /// HKEYS key
    HKeys { key: Bytes },
    /// HLEN key
    HLen { key: Bytes },
    /// HMGET key field [field ...]
    HMGet { key: Bytes, fields: Vec<Bytes> },
    /// HMSET key field value [field value ...]
    HMSet {
        key: Bytes,
        fvs: Vec<(Bytes, Bytes)>,
    },
    /// HSET key field value [field value ...]
    HSet {
        key: Bytes,
        fvs: Vec<(Bytes, Bytes)>,
    },
    /// HSETNX key field value
    HSetNx {
        key: Bytes,
        field: Bytes,
        value: Bytes,
    },
    /// HVALS key
    HVals { key: Bytes },

    // ==================== Set Commands ====================
    /// SADD key member [member ...]
    SAdd { key: Bytes, members: Vec<Bytes> },
    /// SREM key member [member ...]
    SRem { key: Bytes, members: Vec<Bytes> },
    /// SISMEMBER key member
    SIsMember { key: Bytes, member: Bytes },
    /// SMEMBERS key
    SMembers { key: Bytes },
    /// SCARD key
    SCard { key: Bytes },
}

impl Command {
    /// Keys touched by the command, in argument order
    pub fn keys(&self) -> Vec<&[u8]> {
        match self {
            Command::Ping { .. } => Vec::new(),
            Command::Del { keys } | Command::Exists { keys } => {
                keys.iter().map(|k| k.as_ref()).collect()
            }
            Command::Type { key }
            | Command::Expire { key, .. }
            | Command::ExpireAt { key, .. }
            | Command::Persist { key }
            | Command::Ttl { key }
            | Command::Get { key }
            | Command::Set { key, .. }
            | Command::SetNx { key, .. }
            | Command::Append { key, .. }
            | Command::StrLen { key }
            | Command::HDel { key, .. }
            | Command::HExists { key, .. }
            | Command::HGet { key, .. }
            | Command::HGetAll { key }
            | Command::HIncrBy { key, .. }
            | Command::HKeys { key }
            | Command::HLen { key }
            | Command::HMGet { key, .. }
            | Command::HMSet { key, .. }
            | Command::HSet { key, .. }
            | Command::HSetNx { key, .. }
            | Command::HVals { key }
            | Command::SAdd { key, .. }
            | Command::SRem { key, .. }
            | Command::SIsMember { key, .. }
            | Command::SMembers { key }
            | Command::SCard { key } => vec![key.as_ref()],
        }
    }

    /// Get command name
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping { .. } => "PING",
            Command::Del { .. } => "DEL",
            Command::Exists { .. } => "EXISTS",
            Command::Type { .. } => "TYPE",
            Command::Expire { .. } => "EXPIRE",
            Command::ExpireAt { .. } => "EXPIREAT",
            Command::Persist { .. } => "PERSIST",
            Command::Ttl { .. } => "TTL",
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::SetNx { .. } => "SETNX",
            Command::Append { .. } => "APPEND",
            Command::StrLen { .. } => "STRLEN",
            Command::HDel { .. } => "HDEL",
            Command::HExists { .. } => "HEXISTS",
            Command::HGet { .. } => "HGET",
            Command::HGetAll { .. } => "HGETALL",
            Command::HIncrBy { .. } => "HINCRBY",
            Command::HKeys { .. } => "HKEYS",
            Command::HLen { .. } => "HLEN",
            Command::HMGet { .. } => "HMGET",
            Command::HMSet { .. } => "HMSET",
            Command::HSet { .. } => "HSET",
            Command::HSetNx { .. } => "HSETNX",
            Command::HVals { .. } => "HVALS",
            Command::SAdd { .. } => "SADD",
            Command::SRem { .. } => "SREM",
            Command::SIsMember { .. } => "SISMEMBER",
            Command::SMembers { .. } => "SMEMBERS",
            Command::SCard { .. } => "SCARD",
        }
    }

    /// Build a command from its tokens (name first)
    pub fn from_args(args: &[Bytes]) -> Result<Self, CommandError> {
        let (name, rest) = args.split_first().ok_or_else(|| {
            CommandError::new(CommandErrorKind::EmptyCommand, "empty command")
        })?;
        let name = String::from_utf8_lossy(name).to_uppercase();
        parse_command(&name, rest)
    }
}

impl TryFrom<RespValue> for Command {
    type Error = CommandError;

    fn try_from(value: RespValue) -> Result<Self, Self::Error> {
        Self::try_from(&value)
    }
}

impl TryFrom<&RespValue> for Command {
    type Error = CommandError;

    fn try_from(value: &RespValue) -> Result<Self, Self::Error> {
        let args = extract_args(value)?;
        Self::from_args(&args)
    }
}

/// Extract argument list from RespValue
fn extract_args(value: &RespValue) -> Result<Vec<Bytes>, CommandError> {
    let RespValue::Array(items) = value else {
        return Err(CommandError::new(
            CommandErrorKind::InvalidFormat,
            "command must be an array",
        ));
    };
    items
        .iter()
        .map(|item| match item {
            RespValue::BulkString(Some(bytes)) | RespValue::SimpleString(bytes) => {
                Ok(bytes.clone())
            }
            RespValue::Integer(n) => Ok(Bytes::from(n.to_string())),
            _ => Err(CommandError::new(
                CommandErrorKind::InvalidArgument,
                "invalid argument type",
            )),
        })
        .collect()
}

fn parse_int(arg: &[u8], name: &str) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            CommandError::new(
                CommandErrorKind::InvalidArgument,
                format!("{} is not an integer or out of range", name),
            )
        })
}

fn parse_uint(arg: &[u8], name: &str) -> Result<u64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| {
            CommandError::new(
                CommandErrorKind::InvalidArgument,
                format!("{} must be a non-negative integer", name),
            )
        })
}

/// Check argument count
fn check_arity(
    args: &[Bytes],
    min: usize,
    max: Option<usize>,
    cmd: &str,
) -> Result<(), CommandError> {
    let too_many = max.is_some_and(|max| args.len() > max);
    if args.len() < min || too_many {
        return Err(CommandError::new(
            CommandErrorKind::WrongArity,
            format!("wrong number of arguments for '{}' command", cmd.to_lowercase()),
        ));
    }
    Ok(())
}

/// Parse `field value [field value ...]` after the key
fn parse_pairs(args: &[Bytes], cmd: &str) -> Result<Vec<(Bytes, Bytes)>, CommandError> {
    check_arity(args, 3, None, cmd)?;
    if (args.len() - 1) % 2 != 0 {
        return Err(CommandError::new(
            CommandErrorKind::WrongArity,
            format!("wrong number of arguments for '{}' command", cmd.to_lowercase()),
        ));
    }
    Ok(args[1..]
        .chunks(2)
        .map(|c| (c[0].clone(), c[1].clone()))
        .collect())
}

fn parse_command(cmd: &str, args: &[Bytes]) -> Result<Command, CommandError> {
    match cmd {
        "PING" => {
            check_arity(args, 0, Some(1), cmd)?;
            Ok(Command::Ping {
                message: args.first().cloned(),
            })
        }

        // Key commands
        "DEL" => {
            check_arity(args, 1, None, cmd)?;
            Ok(Command::Del {
                keys: args.to_vec(),
            })
        }
        "EXISTS" => {
            check_arity(args, 1, None, cmd)?;
            Ok(Command::Exists {
                keys: args.to_vec(),
            })
        }
        "TYPE" => {
            check_arity(args, 1, Some(1), cmd)?;
            Ok(Command::Type {
                key: args[0].clone(),
            })
        }
        "EXPIRE" => {
            check_arity(args, 2, Some(2), cmd)?;
            Ok(Command::Expire {
                key: args[0].clone(),
                seconds: parse_uint(&args[1], "seconds")?,
            })
        }
        "EXPIREAT" => {
            check_arity(args, 2, Some(2), cmd)?;
            Ok(Command::ExpireAt {
                key: args[0].clone(),
                timestamp: parse_uint(&args[1], "timestamp")?,
            })
        }
        "PERSIST" => {
            check_arity(args, 1, Some(1), cmd)?;
            Ok(Command::Persist {
                key: args[0].clone(),
            })
        }
        "TTL" => {
            check_arity(args, 1, Some(1), cmd)?;
            Ok(Command::Ttl {
                key: args[0].clone(),
            })
        }

        // String commands
        "GET" => {
            check_arity(args, 1, Some(1), cmd)?;
            Ok(Command::Get {
                key: args[0].clone(),
            })
        }
        "SET" => {
            check_arity(args, 2, Some(2), cmd)?;
            Ok(Command::Set {
                key: args[0].clone(),
                value: args[1].clone(),
            })
        }
        "SETNX" => {
            check_arity(args, 2, Some(2), cmd)?;
            Ok(Command::SetNx {
                key: args[0].clone(),
                value: args[1].clone(),
            })
        }
        "APPEND" => {
            check_arity(args, 2, Some(2), cmd)?;
            Ok(Command::Append {
                key: args[0].clone(),
                value: args[1].clone(),
            })
        }
        "STRLEN" => {
            check_arity(args, 1, Some(1), cmd)?;
            Ok(Command::StrLen {
                key: args[0].clone(),
            })
        }

        // Hash commands
        "HDEL" => {
            check_arity(args, 2, None, cmd)?;
            Ok(Command::HDel {
                key: args[0].clone(),
                fields: args[1..].to_vec(),
            })
        }
        "HEXISTS" => {
            check_arity(args, 2, Some(2), cmd)?;
            Ok(Command::HExists {
                key: args[0].clone(),
                field: args[1].clone(),
            })
        }
        "HGET" => {
            check_arity(args, 2, Some(2), cmd)?;
            Ok(Command::HGet {
                key: args[0].clone(),
                field: args[1].clone(),
            })
        }
        "HGETALL" => {
            check_arity(args, 1, Some(1), cmd)?;
            Ok(Command::HGetAll {
                key: args[0].clone(),
            })
        }
        "HINCRBY" => {
            check_arity(args, 3, Some(3), cmd)?;
            Ok(Command::HIncrBy {
                key: args[0].clone(),
                field: args[1].clone(),
                delta: parse_int(&args[2], "value")?,
            })
        }
        "HKEYS" => {
            check_arity(args, 1, Some(1), cmd)?;
            Ok(Command::HKeys {
                key: args[0].clone(),
            })
        }
        "HLEN" => {
            check_arity(args, 1, Some(1), cmd)?;
            Ok(Command::HLen {
                key: args[0].clone(),
            })
        }
        "HMGET" => {
            check_arity(args, 2, None, cmd)?;
            Ok(Command::HMGet {
                key: args[0].clone(),
                fields: args[1..].to_vec(),
            })
        }
        "HMSET" => {
            let fvs = parse_pairs(args, cmd)?;
            Ok(Command::HMSet {
                key: args[0].clone(),
                fvs,
            })
        }
        "HSET" => {
            let fvs = parse_pairs(args, cmd)?;
            Ok(Command::HSet {
                key: args[0].clone(),
                fvs,
            })
        }
        "HSETNX" => {
            check_arity(args, 3, Some(3), cmd)?;
            Ok(Command::HSetNx {
                key: args[0].clone(),
                field: args[1].clone(),
                value: args[2].clone(),
            })
        }
        "HVALS" => {
            check_arity(args, 1, Some(1), cmd)?;
            Ok(Command::HVals {
                key: args[0].clone(),
            })
        }

        // Set commands
        "SADD" => {
            check_arity(args, 2, None, cmd)?;
            Ok(Command::SAdd {
                key: args[0].clone(),
                members: args[1..].to_vec(),
            })
        }
        "SREM" => {
            check_arity(args, 2, None, cmd)?;
            Ok(Command::SRem {
                key: args[0].clone(),
                members: args[1..].to_vec(),
            })
        }
        "SISMEMBER" => {
            check_arity(args, 2, Some(2), cmd)?;
            Ok(Command::SIsMember {
                key: args[0].clone(),
                member: args[1].clone(),
            })
        }
        "SMEMBERS" => {
            check_arity(args, 1, Some(1), cmd)?;
            Ok(Command::SMembers {
                key: args[0].clone(),
            })
        }
        "SCARD" => {
            check_arity(args, 1, Some(1), cmd)?;
            Ok(Command::SCard {
                key: args[0].clone(),
            })
        }

        _ => Err(CommandError::new(
            CommandErrorKind::UnknownCommand,
            format!("unknown command '{}'", cmd),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cmd(args: &[&str]) -> RespValue {
        RespValue::Array(
            args.iter()
                .map(|s| RespValue::BulkString(Some(Bytes::from(s.to_string()))))
                .collect(),
        )
    }

    #[test]
    fn test_parse_hset_pairs() {
        let cmd = Command::try_from(make_cmd(&["hset", "hash", "f1", "v1", "f2", "v2"])).unwrap();
        assert_eq!(
            cmd,
            Command::HSet {
                key: Bytes::from("hash"),
                fvs: vec![
                    (Bytes::from("f1"), Bytes::from("v1")),
                    (Bytes::from("f2"), Bytes::from("v2")),
                ],
            }
        );
        assert_eq!(cmd.keys(), vec![&b"hash"[..]]);
    }

    #[test]
    fn test_parse_hset_odd_pairs() {
        let err = Command::try_from(make_cmd(&["HSET", "hash", "f1", "v1", "f2"])).unwrap_err();
        assert_eq!(err.kind(), CommandErrorKind::WrongArity);
    }

    #[test]
    fn test_parse_hincrby_requires_integer() {
        let cmd = Command::try_from(make_cmd(&["HINCRBY", "h", "n", "-5"])).unwrap();
        assert_eq!(
            cmd,
            Command::HIncrBy {
                key: Bytes::from("h"),
                field: Bytes::from("n"),
                delta: -5,
            }
        );
        let err = Command::try_from(make_cmd(&["HINCRBY", "h", "n", "x"])).unwrap_err();
        assert_eq!(err.kind(), CommandErrorKind::InvalidArgument);
    }

    #[test]
    fn test_parse_hmget_name() {
        let cmd = Command::try_from(make_cmd(&["hmget", "h", "a", "b"])).unwrap();
        assert_eq!(cmd.name(), "HMGET");
        assert_eq!(cmd.keys(), vec![&b"h"[..]]);
    }

    #[test]
    fn test_parse_del_many_keys() {
        let cmd = Command::try_from(make_cmd(&["DEL", "a", "b"])).unwrap();
        assert_eq!(cmd.keys(), vec![&b"a"[..], &b"b"[..]]);
    }

    #[test]
    fn test_wrong_arity() {
        let result = Command::try_from(make_cmd(&["HGET", "only-key"]));
        assert_eq!(result.unwrap_err().kind(), CommandErrorKind::WrongArity);
    }

    #[test]
    fn test_unknown_command() {
        let err = Command::try_from(make_cmd(&["LPUSH", "l", "x"])).unwrap_err();
        assert_eq!(err.kind(), CommandErrorKind::UnknownCommand);
        assert_eq!(err.to_string(), "ERR unknown command 'LPUSH'");
    }

    #[test]
    fn test_empty_and_malformed() {
        let err = Command::try_from(RespValue::Array(vec![])).unwrap_err();
        assert_eq!(err.kind(), CommandErrorKind::EmptyCommand);
        let err = Command::try_from(RespValue::Integer(1)).unwrap_err();
        assert_eq!(err.kind(), CommandErrorKind::InvalidFormat);
    }
}
