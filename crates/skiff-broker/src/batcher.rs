//! Producer-Coalescing Record Batcher
//!
//! Turns a stream of single-record appends from many producers into one
//! durable batch per flush, so each producer pays roughly one storage write
//! amortised.
//!
//! ## Contract
//!
//! [`RecordBatcher::add_record`] blocks the caller until its record has been
//! committed as part of a batch, then returns the caller's assigned offset.
//! Offsets are assigned in the order records enter the window; after a
//! flush, waiter `i` of the window receives `start_offset + i`. If the flush
//! fails, every waiter in that window receives the same failure — there are
//! no partial commits.
//!
//! ## Coordinator
//!
//! One coordinator task per topic owns the window. Producers hand their
//! record over a rendezvous channel together with a oneshot completion
//! handle, then park on the handle. The coordinator accumulates from the
//! first pending record until the window times out or hits its record/byte
//! bound, flushes the whole window as one `add_record_batch`, and releases
//! the waiters. No window state is shared between tasks.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use skiff_core::{Error, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::config::BatcherConfig;
use crate::topic::Topic;

type FlushResult = std::result::Result<u64, Arc<Error>>;
type Waiter = oneshot::Sender<FlushResult>;

/// Coalesces single-record appends into durable batches.
#[async_trait]
pub trait RecordBatcher: Send + Sync {
    /// Append one record, blocking until it is part of a committed batch,
    /// and return its assigned offset.
    async fn add_record(&self, record: Bytes) -> Result<u64>;
}

/// A batcher that flushes every record as its own batch. Used in tests and
/// for low-throughput deployments where latency beats write amortisation.
pub struct NullBatcher {
    topic: Arc<Topic>,
}

impl NullBatcher {
    pub fn new(topic: Arc<Topic>) -> Self {
        Self { topic }
    }
}

#[async_trait]
impl RecordBatcher for NullBatcher {
    async fn add_record(&self, record: Bytes) -> Result<u64> {
        self.topic
            .add_record_batch(std::slice::from_ref(&record))
            .await
    }
}

/// A batcher that accumulates a bounded window of records before flushing.
///
/// The window closes on whichever bound is hit first: `max_wait` since the
/// first pending record, `max_records`, or `max_bytes`.
pub struct WindowBatcher {
    tx: mpsc::Sender<(Bytes, Waiter)>,
}

impl WindowBatcher {
    pub fn new(topic: Arc<Topic>, config: BatcherConfig) -> Self {
        // Rendezvous-sized: producers hand off directly to the coordinator.
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(run_coordinator(topic, config, rx));
        Self { tx }
    }
}

#[async_trait]
impl RecordBatcher for WindowBatcher {
    async fn add_record(&self, record: Bytes) -> Result<u64> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send((record, done_tx))
            .await
            .map_err(|_| Error::BatcherStopped)?;

        match done_rx.await {
            Ok(Ok(offset)) => Ok(offset),
            Ok(Err(err)) => Err(Error::BatchWrite(err)),
            Err(_) => Err(Error::BatcherStopped),
        }
    }
}

async fn run_coordinator(
    topic: Arc<Topic>,
    config: BatcherConfig,
    mut rx: mpsc::Receiver<(Bytes, Waiter)>,
) {
    // Each iteration handles one window: the first recv opens it, the
    // deadline (or a size bound) closes it.
    while let Some((record, waiter)) = rx.recv().await {
        let mut window_bytes = record.len();
        let mut records = vec![record];
        let mut waiters = vec![waiter];
        let deadline = Instant::now() + config.max_wait;

        while records.len() < config.max_records && window_bytes < config.max_bytes {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((record, waiter))) => {
                    window_bytes += record.len();
                    records.push(record);
                    waiters.push(waiter);
                }
                // Channel closed or window expired.
                Ok(None) | Err(_) => break,
            }
        }

        match topic.add_record_batch(&records).await {
            Ok(start_offset) => {
                tracing::debug!(
                    topic = %topic.name(),
                    start_offset,
                    records = records.len(),
                    bytes = window_bytes,
                    "flushed batch window"
                );
                for (i, waiter) in waiters.into_iter().enumerate() {
                    let _ = waiter.send(Ok(start_offset + i as u64));
                }
            }
            Err(err) => {
                tracing::error!(
                    topic = %topic.name(),
                    records = records.len(),
                    error = %err,
                    "batch window flush failed"
                );
                let err = Arc::new(err);
                for waiter in waiters {
                    let _ = waiter.send(Err(Arc::clone(&err)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::ops::Range;
    use std::time::Duration;

    use object_store::memory::InMemory;
    use skiff_storage::{BackingStorage, Cache, Compressor, FileEntry, MemoryCacheStorage, ObjectStorage};

    async fn test_topic() -> Arc<Topic> {
        let storage = Arc::new(ObjectStorage::new(Arc::new(InMemory::new())));
        let cache = Arc::new(Cache::new(Arc::new(MemoryCacheStorage::new())).await.unwrap());
        Arc::new(
            Topic::open(storage, "", "topic", cache, Compressor::None)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_null_batcher_assigns_sequential_offsets() {
        let topic = test_topic().await;
        let batcher = NullBatcher::new(Arc::clone(&topic));

        for expected in 0..10u64 {
            let offset = batcher
                .add_record(Bytes::from(format!("record-{expected}")))
                .await
                .unwrap();
            assert_eq!(offset, expected);
        }
        assert_eq!(topic.next_offset(), 10);
    }

    #[tokio::test]
    async fn test_window_batcher_returns_each_producer_its_offset() {
        let topic = test_topic().await;
        let batcher = Arc::new(WindowBatcher::new(
            Arc::clone(&topic),
            BatcherConfig {
                max_wait: Duration::from_millis(5),
                ..BatcherConfig::default()
            },
        ));

        let mut handles = Vec::new();
        for i in 0..50u32 {
            let batcher = Arc::clone(&batcher);
            handles.push(tokio::spawn(async move {
                let record = Bytes::from(format!("record-{i}"));
                let offset = batcher.add_record(record.clone()).await.unwrap();
                (offset, record)
            }));
        }

        let mut offsets = HashSet::new();
        for handle in handles {
            let (offset, record) = handle.await.unwrap();
            assert!(offsets.insert(offset), "duplicate offset {offset}");
            // The offset the producer got back addresses its own record.
            assert_eq!(topic.read_record(offset).await.unwrap(), record);
        }

        assert_eq!(offsets.len(), 50);
        assert_eq!(topic.next_offset(), 50);
        // Offsets are dense: exactly [0, 50).
        assert_eq!(*offsets.iter().max().unwrap(), 49);
    }

    #[tokio::test]
    async fn test_window_batcher_coalesces_concurrent_producers() {
        let storage: Arc<dyn BackingStorage> =
            Arc::new(ObjectStorage::new(Arc::new(InMemory::new())));
        let cache = Arc::new(Cache::new(Arc::new(MemoryCacheStorage::new())).await.unwrap());
        let topic = Arc::new(
            Topic::open(Arc::clone(&storage), "", "topic", cache, Compressor::None)
                .await
                .unwrap(),
        );
        let batcher = Arc::new(WindowBatcher::new(
            Arc::clone(&topic),
            BatcherConfig {
                max_wait: Duration::from_millis(20),
                ..BatcherConfig::default()
            },
        ));

        let mut handles = Vec::new();
        for i in 0..32u32 {
            let batcher = Arc::clone(&batcher);
            handles.push(tokio::spawn(async move {
                batcher.add_record(Bytes::from(format!("r{i}"))).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(topic.next_offset(), 32);

        // 32 records written while a 20ms window is open: far fewer batch
        // files than records.
        let files = storage.list_files("topic", ".record_batch").await.unwrap();
        assert!(
            files.len() < 32,
            "expected coalescing, got {} batch files for 32 records",
            files.len()
        );
    }

    #[tokio::test]
    async fn test_window_batcher_flushes_on_record_bound() {
        let topic = test_topic().await;
        let batcher = Arc::new(WindowBatcher::new(
            Arc::clone(&topic),
            BatcherConfig {
                // A window the test would otherwise sleep through.
                max_wait: Duration::from_secs(5),
                max_records: 4,
                max_bytes: usize::MAX,
            },
        ));

        let mut handles = Vec::new();
        for i in 0..4u32 {
            let batcher = Arc::clone(&batcher);
            handles.push(tokio::spawn(async move {
                batcher.add_record(Bytes::from(format!("r{i}"))).await.unwrap()
            }));
        }

        // All four producers return long before the 5s window would expire.
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("window should flush on record bound")
                .unwrap();
        }
        assert_eq!(topic.next_offset(), 4);
    }

    #[tokio::test]
    async fn test_window_batcher_fails_whole_window() {
        // A topic over a storage that always fails: every waiter of the
        // window sees the same failure and nothing commits.
        struct FailingStorage;

        #[async_trait]
        impl BackingStorage for FailingStorage {
            async fn put(&self, _key: &str, _data: Bytes) -> Result<()> {
                Err(Error::Io(std::io::Error::other("disk on fire")))
            }
            async fn get(&self, key: &str) -> Result<Bytes> {
                Err(Error::NotInStorage { key: key.to_string() })
            }
            async fn get_range(&self, key: &str, _range: Range<u64>) -> Result<Bytes> {
                Err(Error::NotInStorage { key: key.to_string() })
            }
            async fn list_files(&self, _prefix: &str, _suffix: &str) -> Result<Vec<FileEntry>> {
                Ok(Vec::new())
            }
        }

        let cache = Arc::new(Cache::new(Arc::new(MemoryCacheStorage::new())).await.unwrap());
        let topic = Arc::new(
            Topic::open(Arc::new(FailingStorage), "", "topic", cache, Compressor::None)
                .await
                .unwrap(),
        );
        let batcher = Arc::new(WindowBatcher::new(
            Arc::clone(&topic),
            BatcherConfig {
                max_wait: Duration::from_millis(5),
                ..BatcherConfig::default()
            },
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let batcher = Arc::clone(&batcher);
            handles.push(tokio::spawn(async move {
                batcher.add_record(Bytes::from_static(b"doomed")).await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(matches!(result, Err(Error::BatchWrite(_))));
        }
        assert_eq!(topic.next_offset(), 0);
    }

}
