//! Record-Batch Cache with LRU Eviction
//!
//! A byte-bounded cache keyed by batch-file paths. The topic log mirrors
//! every committed batch into the cache (best-effort) and consults it before
//! going to the backing store, which has object-store latencies.
//!
//! ## How It Works
//!
//! ```text
//! read(key)
//!     ↓
//! entry present? ──NO──→ Error::NotInCache (caller falls back to storage)
//!     │YES
//!     ↓
//! refresh last_accessed_at, fetch blob from the back-end
//!
//! write(key, blob)
//!     ↓
//! back-end install (atomic replace), then accounting += new - old
//!
//! evict_least_recently_used(max_bytes)
//!     ↓
//! drop entries in ascending (last_accessed_at, insertion order)
//! until size() <= max_bytes
//! ```
//!
//! Eviction is an explicit operation — the owner decides the byte budget and
//! when to enforce it (the server runs it on a timer). The accounted size
//! equals the byte-sum of live entries at every quiescent point, including
//! after overwrites.
//!
//! ## Back-ends
//!
//! The blob store behind the cache is pluggable via [`CacheStorage`]:
//! [`MemoryCacheStorage`] keeps blobs in a map, [`DiskCacheStorage`] keeps
//! them as files under a root directory (key = relative path). Policy and
//! accounting are identical for both. On open, the cache enumerates the
//! back-end and rebuilds its accounting, so a disk cache survives restarts
//! with its contents (recency order is re-seeded at open).
//!
//! ## Concurrency
//!
//! The index mutex only guards map and accounting updates — blob I/O happens
//! outside it. Readers hold refcounted [`Bytes`] (memory back-end) or a fully
//! read buffer (disk back-end), so evicting an entry never invalidates a
//! blob a concurrent reader already obtained.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use skiff_core::{Error, Result};

use crate::backing::FileEntry;

/// Clock used to stamp entry recency; injectable so LRU-order tests are
/// deterministic.
pub type NowFn = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// Blob store behind the cache.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Install `data` under `key`, atomically replacing any previous blob.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Fetch the blob under `key`; [`Error::NotInCache`] when absent.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Remove the blob under `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Enumerate every stored blob. Used to rebuild accounting on open.
    async fn list(&self) -> Result<Vec<FileEntry>>;
}

/// In-memory cache back-end.
#[derive(Default)]
pub struct MemoryCacheStorage {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.blobs.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotInCache {
                key: key.to_string(),
            })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FileEntry>> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .iter()
            .map(|(key, blob)| FileEntry {
                path: key.clone(),
                size: blob.len() as u64,
            })
            .collect())
    }
}

/// On-disk cache back-end: `key` is a relative file path under `root`.
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.blob_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = path.with_extension("partial");
        tokio::fs::write(&staging, &data).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        match tokio::fs::read(self.blob_path(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(Error::NotInCache {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> Result<Vec<FileEntry>> {
        let mut files = Vec::new();
        let mut dirs = vec![self.root.clone()];

        while let Some(dir) = dirs.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };

            while let Some(entry) = read_dir.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    dirs.push(entry.path());
                    continue;
                }
                let metadata = entry.metadata().await?;
                let path = entry
                    .path()
                    .strip_prefix(&self.root)
                    .expect("entry is under the cache root")
                    .to_string_lossy()
                    .replace('\\', "/");
                files.push(FileEntry {
                    path,
                    size: metadata.len(),
                });
            }
        }

        Ok(files)
    }
}

struct CacheEntry {
    size: u64,
    accessed_at: SystemTime,
    // Tie-break for identical timestamps: insertion / access order.
    seq: u64,
}

#[derive(Default)]
struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
    size: u64,
    next_seq: u64,
}

impl CacheIndex {
    fn touch(&mut self, key: &str, now: SystemTime) -> bool {
        let next_seq = self.next_seq;
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.accessed_at = now;
                entry.seq = next_seq;
                self.next_seq += 1;
                true
            }
            None => false,
        }
    }

    fn install(&mut self, key: &str, size: u64, now: SystemTime) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let previous = self.entries.insert(
            key.to_string(),
            CacheEntry {
                size,
                accessed_at: now,
                seq,
            },
        );
        self.size = self.size + size - previous.map(|e| e.size).unwrap_or(0);
    }
}

/// Byte-bounded LRU cache over a [`CacheStorage`] back-end.
pub struct Cache {
    storage: Arc<dyn CacheStorage>,
    now: NowFn,
    index: Mutex<CacheIndex>,
}

impl Cache {
    /// Open a cache over `storage`, rebuilding accounting from its contents.
    pub async fn new(storage: Arc<dyn CacheStorage>) -> Result<Self> {
        Self::with_now(storage, Arc::new(SystemTime::now)).await
    }

    /// Like [`Cache::new`], with an injected clock.
    pub async fn with_now(storage: Arc<dyn CacheStorage>, now: NowFn) -> Result<Self> {
        let existing = storage.list().await?;

        let mut index = CacheIndex::default();
        let opened_at = (*now)();
        for file in existing {
            index.install(&file.path, file.size, opened_at);
        }

        tracing::debug!(
            entries = index.entries.len(),
            bytes = index.size,
            "opened cache"
        );

        Ok(Self {
            storage,
            now,
            index: Mutex::new(index),
        })
    }

    /// Install `data` under `key`, replacing any previous value, and return
    /// the number of bytes written.
    pub async fn write(&self, key: &str, data: Bytes) -> Result<usize> {
        let n = data.len();
        self.storage.put(key, data).await?;

        let now = (*self.now)();
        self.index.lock().unwrap().install(key, n as u64, now);

        tracing::trace!(key, bytes = n, "cached entry");
        Ok(n)
    }

    /// Fetch the blob under `key`, refreshing its recency. Fails with
    /// [`Error::NotInCache`] when the key is absent.
    pub async fn read(&self, key: &str) -> Result<Bytes> {
        let now = (*self.now)();
        if !self.index.lock().unwrap().touch(key, now) {
            return Err(Error::NotInCache {
                key: key.to_string(),
            });
        }

        self.storage.get(key).await
    }

    /// Total accounted size in bytes.
    pub fn size(&self) -> u64 {
        self.index.lock().unwrap().size
    }

    /// Remove entries in ascending recency order until the accounted size is
    /// at most `max_bytes`. A no-op when already below the target; an empty
    /// cache never fails.
    pub async fn evict_least_recently_used(&self, max_bytes: u64) -> Result<()> {
        let victims = {
            let mut index = self.index.lock().unwrap();
            if index.size <= max_bytes {
                return Ok(());
            }

            let mut order: Vec<(String, SystemTime, u64, u64)> = index
                .entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.accessed_at, entry.seq, entry.size))
                .collect();
            order.sort_by(|a, b| (a.1, a.2).cmp(&(b.1, b.2)));

            let mut victims = Vec::new();
            for (key, _, _, size) in order {
                if index.size <= max_bytes {
                    break;
                }
                index.entries.remove(&key);
                index.size -= size;
                victims.push(key);
            }
            victims
        };

        for key in &victims {
            if let Err(err) = self.storage.remove(key).await {
                tracing::warn!(key, error = %err, "failed to remove evicted cache entry");
            }
        }

        tracing::debug!(
            evicted = victims.len(),
            max_bytes,
            bytes = self.size(),
            "evicted least recently used cache entries"
        );
        Ok(())
    }
}
