//! Command decoding errors

use std::fmt;

/// Command error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    /// Empty command
    EmptyCommand,
    /// Unknown command
    UnknownCommand,
    /// Wrong number of arguments
    WrongArity,
    /// Argument could not be decoded
    InvalidArgument,
    /// Request is not an array of strings
    InvalidFormat,
}

/// Command decoding error
#[derive(Debug, Clone)]
pub struct CommandError {
    kind: CommandErrorKind,
    message: String,
}

impl CommandError {
    pub fn new(kind: CommandErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> CommandErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERR {}", self.message)
    }
}

impl std::error::Error for CommandError {}
