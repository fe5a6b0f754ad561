//! nestkv node
//!
//! Wires a node's storage into the cluster: configuration, the mailbox RPC
//! primitive, and the outdated index issue tracker.

pub mod config;
pub mod issues;
pub mod mailbox;
pub mod outdated_index;

pub use config::{Config, ConfigError};
pub use issues::{GlobalIssue, IssueSource, OutdatedIndexIssue};
pub use mailbox::{MailboxAddress, PeerDirectory, RpcError};
pub use outdated_index::{LocalIndexes, OutdatedIndexIssueTracker, OutdatedIndexRequest};
