//! Local-Filesystem Backing Storage
//!
//! [`DiskStorage`] keeps objects as plain files under a root directory, with
//! keys interpreted as relative paths. Writes are staged to a temporary
//! sibling and renamed into place, so a concurrent reader sees either the
//! old object or the new one, never a partial file.

use std::ops::Range;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use skiff_core::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::backing::{normalize_prefix, BackingStorage, FileEntry};

pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl BackingStorage for DiskStorage {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.full_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Stage and rename so the object becomes visible atomically.
        let staging = path.with_extension("partial");
        tokio::fs::write(&staging, &data).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        match tokio::fs::read(self.full_path(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(Error::NotInStorage {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        let mut file = match tokio::fs::File::open(self.full_path(key)).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotInStorage {
                    key: key.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        file.seek(std::io::SeekFrom::Start(range.start)).await?;
        let len = (range.end - range.start) as usize;
        let mut buf = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let n = file.read(&mut buf[read..]).await?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(Bytes::from(buf))
    }

    async fn list_files(&self, prefix: &str, suffix: &str) -> Result<Vec<FileEntry>> {
        let prefix = normalize_prefix(prefix);
        let dir = self.root.join(&prefix);

        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(suffix) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                files.push(FileEntry {
                    path: format!("{prefix}{name}"),
                    size: metadata.len(),
                });
            }
        }

        Ok(files)
    }
}
