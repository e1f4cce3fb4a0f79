//! Engine configuration
//!
//! One concrete value handed to every service; there is no process-wide
//! mutable state. Loadable from TOML with every field optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_THREADS: usize = 3;
pub const DEFAULT_TASK_QUEUE_CAPACITY: usize = 20_000;
pub const DEFAULT_ERROR_QUEUE_CAPACITY: usize = 1;
/// Files at least this large are first offered to the server by checksum
pub const DEFAULT_MIN_CHECKSUM_DEPLOY: u64 = 10 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Worker threads draining the task queue
    pub threads: usize,
    pub dry_run: bool,
    pub task_queue_capacity: usize,
    /// How many errors are retained and surfaced; later ones are dropped
    pub error_queue_capacity: usize,
    /// Records held in memory per external sort chunk
    pub sort_chunk_size: usize,
    pub min_checksum_deploy: u64,
    /// Show a progress bar on stderr
    pub progress: bool,
    /// Append timestamped event lines to this file
    pub log_file: Option<PathBuf>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            dry_run: false,
            task_queue_capacity: DEFAULT_TASK_QUEUE_CAPACITY,
            error_queue_capacity: DEFAULT_ERROR_QUEUE_CAPACITY,
            sort_chunk_size: crate::stream::DEFAULT_SORT_CHUNK,
            min_checksum_deploy: DEFAULT_MIN_CHECKSUM_DEPLOY,
            progress: false,
            log_file: None,
        }
    }
}

impl TransferConfig {
    pub fn from_toml_str(data: &str) -> Result<Self> {
        let cfg: TransferConfig = toml::from_str(data).context("Invalid transfer config")?;
        Ok(cfg)
    }

    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if let Ok(data) = std::fs::read_to_string(path) {
            Self::from_toml_str(&data)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Worker count, never zero
    pub fn worker_count(&self) -> usize {
        self.threads.max(1)
    }
}
