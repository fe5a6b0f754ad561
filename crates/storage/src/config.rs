//! Storage configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for table data and the metadata file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Block size of newly created serializer files
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Dirty blocks the merging layer buffers before writing through
    #[serde(default = "default_merger_flush_threshold")]
    pub merger_flush_threshold: usize,
    /// Worker threads hosting stores and serializers
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            block_size: default_block_size(),
            merger_flush_threshold: default_merger_flush_threshold(),
            worker_threads: default_worker_threads(),
        }
    }
}

impl StorageConfig {
    /// Config rooted at `data_dir` with all other settings defaulted
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        if !other.data_dir.as_os_str().is_empty() {
            self.data_dir = other.data_dir;
        }
        if other.block_size > 0 {
            self.block_size = other.block_size;
        }
        if other.merger_flush_threshold > 0 {
            self.merger_flush_threshold = other.merger_flush_threshold;
        }
        if other.worker_threads > 0 {
            self.worker_threads = other.worker_threads;
        }
    }

    /// Directory holding committed table data files
    pub fn tables_dir(&self) -> PathBuf {
        self.data_dir.join("tables")
    }

    /// Staging directory for data files still being created
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("metadata.json")
    }

    pub fn table_file_name(table: impl std::fmt::Display) -> String {
        format!("{}.data", table)
    }

    pub fn table_path(&self, table: impl std::fmt::Display) -> PathBuf {
        self.tables_dir().join(Self::table_file_name(table))
    }

    pub fn staging_path(&self, table: impl std::fmt::Display) -> PathBuf {
        self.staging_dir().join(Self::table_file_name(table))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_block_size() -> usize {
    4096
}

fn default_merger_flush_threshold() -> usize {
    64
}

fn default_worker_threads() -> usize {
    4
}
