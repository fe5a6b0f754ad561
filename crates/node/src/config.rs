//! Configuration module for a nestkv node
//!
//! Supports YAML configuration files with module-based organization

use serde::{Deserialize, Serialize};
use std::time::Duration;
use storage::StorageConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Cluster configuration
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to YAML file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let yaml =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Config with every field unset, so merging it changes nothing
    ///
    /// Used as the base for command line overrides.
    pub fn unset() -> Self {
        Self {
            node: NodeConfig {
                node_id: String::new(),
            },
            storage: StorageConfig {
                data_dir: Default::default(),
                block_size: 0,
                merger_flush_threshold: 0,
                worker_threads: 0,
            },
            cluster: ClusterConfig { issue_timeout_ms: 0 },
            log: LogConfig { level: String::new() },
        }
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        self.node.merge(other.node);
        self.storage.merge(other.storage);
        self.cluster.merge(other.cluster);
        self.log.merge(other.log);
    }
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node ID, also this node's name in the peer directory
    #[serde(default = "default_node_id")]
    pub node_id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
        }
    }
}

impl NodeConfig {
    fn merge(&mut self, other: Self) {
        if !other.node_id.is_empty() {
            self.node_id = other.node_id;
        }
    }
}

/// Cluster configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Deadline for collecting outdated indexes from peers, in milliseconds
    #[serde(default = "default_issue_timeout_ms")]
    pub issue_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            issue_timeout_ms: default_issue_timeout_ms(),
        }
    }
}

impl ClusterConfig {
    fn merge(&mut self, other: Self) {
        if other.issue_timeout_ms > 0 {
            self.issue_timeout_ms = other.issue_timeout_ms;
        }
    }

    /// Get issue collection timeout as Duration
    pub fn issue_timeout(&self) -> Duration {
        Duration::from_millis(self.issue_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    fn merge(&mut self, other: Self) {
        if !other.level.is_empty() {
            self.level = other.level;
        }
    }
}

// Default value functions

fn default_node_id() -> String {
    "node1".to_string()
}

fn default_issue_timeout_ms() -> u64 {
    3000 // 3 seconds
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}
