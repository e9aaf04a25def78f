//! Backing-Store Abstraction
//!
//! Record-batch files live in an object-store-shaped substrate: opaque blobs
//! under `/`-separated string keys. The broker only ever needs four
//! operations, so that is the whole contract.
//!
//! ## Guarantees required of every implementation
//!
//! - `put` is atomic: readers observe either the previous object or the
//!   complete new one, never a torn write.
//! - An absent key is reported as [`Error::NotInStorage`], distinguishable
//!   from transport failures.
//! - `list_files` normalises its prefix (no leading `/`, trailing `/`
//!   ensured) before touching the store, and pagination is transparent to
//!   callers.

use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use skiff_core::Result;

/// A listed object: its full key and size in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
}

/// The durable substrate for record-batch files.
#[async_trait]
pub trait BackingStorage: Send + Sync {
    /// Store `data` under `key`, replacing any previous object. The write is
    /// visible to readers atomically on completion.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Fetch the object under `key`. Fails with [`Error::NotInStorage`] when
    /// the key is absent.
    ///
    /// [`Error::NotInStorage`]: skiff_core::Error::NotInStorage
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Fetch a byte range of the object under `key`.
    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes>;

    /// List objects under `prefix` whose names end in `suffix`.
    async fn list_files(&self, prefix: &str, suffix: &str) -> Result<Vec<FileEntry>>;
}

/// Normalise a listing prefix: strip any leading `/`, ensure a trailing `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_start_matches('/');
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}
