//! Object-Store Backing Storage
//!
//! [`ObjectStorage`] adapts any [`object_store::ObjectStore`] — Amazon S3 in
//! production (`AmazonS3Builder`), `InMemory` in tests — to the
//! [`BackingStorage`] contract. A configurable root key prefix lets several
//! deployments share one bucket.
//!
//! The remote "no such key" error code is recognised and mapped to the
//! [`Error::NotInStorage`] sentinel so callers can distinguish an absent
//! batch from a transport failure.
//!
//! [`Error::NotInStorage`]: skiff_core::Error::NotInStorage

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use skiff_core::{Error, Result};

use crate::backing::{normalize_prefix, BackingStorage, FileEntry};

pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    key_prefix: Option<String>,
}

impl ObjectStorage {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            key_prefix: None,
        }
    }

    /// All keys pass through `key_prefix` before reaching the store.
    pub fn with_key_prefix(store: Arc<dyn ObjectStore>, key_prefix: impl Into<String>) -> Self {
        let key_prefix = key_prefix.into();
        let key_prefix = key_prefix.trim_matches('/').to_string();
        Self {
            store,
            key_prefix: (!key_prefix.is_empty()).then_some(key_prefix),
        }
    }

    fn full_key(&self, key: &str) -> ObjectPath {
        let key = key.trim_start_matches('/');
        match &self.key_prefix {
            Some(prefix) => ObjectPath::from(format!("{prefix}/{key}")),
            None => ObjectPath::from(key),
        }
    }

    /// Undo `full_key` for keys coming back from a listing.
    fn caller_key(&self, location: &ObjectPath) -> String {
        let location = location.as_ref();
        match &self.key_prefix {
            Some(prefix) => location
                .strip_prefix(prefix.as_str())
                .map(|rest| rest.trim_start_matches('/'))
                .unwrap_or(location)
                .to_string(),
            None => location.to_string(),
        }
    }
}

#[async_trait]
impl BackingStorage for ObjectStorage {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.store.put(&self.full_key(key), data.into()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        match self.store.get(&self.full_key(key)).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => Err(Error::NotInStorage {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        match self.store.get_range(&self.full_key(key), range).await {
            Ok(bytes) => Ok(bytes),
            Err(object_store::Error::NotFound { .. }) => Err(Error::NotInStorage {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_files(&self, prefix: &str, suffix: &str) -> Result<Vec<FileEntry>> {
        let prefix = normalize_prefix(prefix);
        let list_prefix = self.full_key(&prefix);

        let mut files = Vec::new();
        let mut objects = self.store.list(Some(&list_prefix));
        while let Some(meta) = objects.next().await {
            let meta = meta?;
            let path = self.caller_key(&meta.location);
            if path.ends_with(suffix) {
                files.push(FileEntry {
                    path,
                    size: meta.size as u64,
                });
            }
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn memory_storage() -> ObjectStorage {
        ObjectStorage::new(Arc::new(InMemory::new()))
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let storage = memory_storage();
        let data = Bytes::from_static(b"record batch bytes");

        storage.put("topic/000000000000.record_batch", data.clone()).await.unwrap();

        let got = storage.get("topic/000000000000.record_batch").await.unwrap();
        assert_eq!(got, data);
    }

    #[tokio::test]
    async fn test_get_absent_key_is_not_in_storage() {
        let storage = memory_storage();

        let result = storage.get("topic/does-not-exist").await;
        assert!(matches!(result, Err(Error::NotInStorage { .. })));

        let result = storage.get_range("topic/does-not-exist", 0..9).await;
        assert!(matches!(result, Err(Error::NotInStorage { .. })));
    }

    #[tokio::test]
    async fn test_get_range() {
        let storage = memory_storage();
        storage
            .put("key", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();

        let head = storage.get_range("key", 0..4).await.unwrap();
        assert_eq!(head, Bytes::from_static(b"0123"));
    }

    #[tokio::test]
    async fn test_put_replaces_previous_object() {
        let storage = memory_storage();
        storage.put("key", Bytes::from_static(b"old")).await.unwrap();
        storage.put("key", Bytes::from_static(b"new")).await.unwrap();

        assert_eq!(storage.get("key").await.unwrap(), Bytes::from_static(b"new"));
    }

    // ---------------------------------------------------------------
    // Listing and prefix normalisation
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_list_files_filters_by_suffix() {
        let storage = memory_storage();
        storage
            .put("dummy/dir/000000000000.record_batch", Bytes::from_static(b"aaaa"))
            .await
            .unwrap();
        storage
            .put("dummy/dir/000000000005.record_batch", Bytes::from_static(b"bb"))
            .await
            .unwrap();
        storage
            .put("dummy/dir/notes.txt", Bytes::from_static(b"n"))
            .await
            .unwrap();

        let mut files = storage.list_files("dummy/dir", ".record_batch").await.unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(
            files,
            vec![
                FileEntry {
                    path: "dummy/dir/000000000000.record_batch".to_string(),
                    size: 4
                },
                FileEntry {
                    path: "dummy/dir/000000000005.record_batch".to_string(),
                    size: 2
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_list_files_prefix_spellings_are_equivalent() {
        let storage = memory_storage();
        storage
            .put("dummy/dir/000000000000.record_batch", Bytes::from_static(b"x"))
            .await
            .unwrap();

        // Leading slash stripped, trailing slash ensured: every spelling of
        // the prefix lists the same objects.
        for prefix in ["dummy/dir", "/dummy/dir", "dummy/dir/", "/dummy/dir/"] {
            let files = storage.list_files(prefix, ".record_batch").await.unwrap();
            assert_eq!(files.len(), 1, "prefix '{}'", prefix);
            assert_eq!(files[0].path, "dummy/dir/000000000000.record_batch");
        }
    }

    #[tokio::test]
    async fn test_list_files_prefix_does_not_match_sibling_dirs() {
        let storage = memory_storage();
        storage
            .put("topic/000000000000.record_batch", Bytes::from_static(b"x"))
            .await
            .unwrap();
        storage
            .put("topic-2/000000000000.record_batch", Bytes::from_static(b"y"))
            .await
            .unwrap();

        let files = storage.list_files("topic", ".record_batch").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "topic/000000000000.record_batch");
    }

    // ---------------------------------------------------------------
    // Root key prefix
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_key_prefix_applied_to_keys() {
        let inner: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let storage = ObjectStorage::with_key_prefix(Arc::clone(&inner), "some-prefix");

        storage
            .put("topic/000000000123.record_batch", Bytes::from_static(b"data"))
            .await
            .unwrap();

        // The object landed under the prefixed key.
        let raw = inner
            .get(&ObjectPath::from("some-prefix/topic/000000000123.record_batch"))
            .await
            .unwrap();
        assert_eq!(raw.bytes().await.unwrap(), Bytes::from_static(b"data"));

        // Reads and listings stay caller-relative.
        let got = storage.get("topic/000000000123.record_batch").await.unwrap();
        assert_eq!(got, Bytes::from_static(b"data"));

        let files = storage.list_files("topic", ".record_batch").await.unwrap();
        assert_eq!(files[0].path, "topic/000000000123.record_batch");
    }
}
