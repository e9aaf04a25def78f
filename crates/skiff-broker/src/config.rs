//! Broker Configuration
//!
//! Option bags for the broker and its batcher, with serde defaults so
//! partial config files work the obvious way.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use skiff_storage::Compressor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Create a topic on first use instead of failing with topic-not-found.
    #[serde(default = "default_auto_create_topics")]
    pub auto_create_topics: bool,

    /// Logical prefix under which topic directories live in the backing
    /// store. Empty means topics sit at the store root.
    #[serde(default)]
    pub root_dir: String,

    /// Whole-file compression applied to batch files.
    #[serde(default)]
    pub compression: CompressionKind,

    /// How single-record appends are coalesced into batches.
    #[serde(default)]
    pub batcher: BatcherKind,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            auto_create_topics: default_auto_create_topics(),
            root_dir: String::new(),
            compression: CompressionKind::default(),
            batcher: BatcherKind::default(),
        }
    }
}

impl BrokerConfig {
    pub(crate) fn compressor(&self) -> Compressor {
        match self.compression {
            CompressionKind::None => Compressor::None,
            CompressionKind::Gzip => Compressor::Gzip,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    None,
    Gzip,
}

/// Flush policy for the per-topic record batcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatcherKind {
    /// Flush on every record (batch size 1).
    Null,
    /// Coalesce a window of records, bounded by time, count, and bytes.
    Window(BatcherConfig),
}

impl Default for BatcherKind {
    fn default() -> Self {
        BatcherKind::Window(BatcherConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// How long a window stays open after its first record arrives.
    #[serde(default = "default_max_wait")]
    pub max_wait: Duration,

    /// Maximum records per window.
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Maximum payload bytes per window.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_wait: default_max_wait(),
            max_records: default_max_records(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_auto_create_topics() -> bool {
    true
}

fn default_max_wait() -> Duration {
    Duration::from_millis(10)
}

fn default_max_records() -> usize {
    512
}

fn default_max_bytes() -> usize {
    4 * 1024 * 1024 // 4MiB
}
