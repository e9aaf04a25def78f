//! The Broker: Process-Wide Topic Registry
//!
//! A [`Broker`] owns the map of live topics, builds a topic log and its
//! batcher on first use (when auto-creation is enabled), and routes every
//! producer and consumer operation to the right topic.
//!
//! Topic construction touches the backing store (one listing plus one header
//! read) and runs with the registry lock held. That serialises first access
//! to unrelated topics; accepted for simplicity, since it happens once per
//! topic per process lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use skiff_core::{Error, Result};
use skiff_storage::{BackingStorage, Cache};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::batcher::{NullBatcher, RecordBatcher, WindowBatcher};
use crate::config::{BatcherKind, BrokerConfig};
use crate::topic::{Topic, TopicMetadata};

#[derive(Clone)]
struct TopicHandle {
    topic: Arc<Topic>,
    batcher: Arc<dyn RecordBatcher>,
}

pub struct Broker {
    storage: Arc<dyn BackingStorage>,
    cache: Arc<Cache>,
    config: BrokerConfig,
    topics: Mutex<HashMap<String, TopicHandle>>,
}

impl Broker {
    pub fn new(
        storage: Arc<dyn BackingStorage>,
        cache: Arc<Cache>,
        config: BrokerConfig,
    ) -> Broker {
        Broker {
            storage,
            cache,
            config,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Append a single record through the topic's batcher, blocking until it
    /// is part of a committed batch. Returns the record's offset.
    pub async fn add_record(&self, topic_name: &str, record: Bytes) -> Result<u64> {
        let handle = self.topic_handle(topic_name).await?;
        handle.batcher.add_record(record).await
    }

    /// Append `records` as one batch, bypassing the batcher. Returns one
    /// offset per input record.
    pub async fn add_records(&self, topic_name: &str, records: Vec<Bytes>) -> Result<Vec<u64>> {
        let handle = self.topic_handle(topic_name).await?;
        let start_offset = handle.topic.add_record_batch(&records).await?;
        Ok((start_offset..start_offset + records.len() as u64).collect())
    }

    /// Read the record at `offset`. Non-blocking: an uncommitted offset is
    /// [`Error::OutOfBounds`], never a wait.
    pub async fn get_record(&self, topic_name: &str, offset: u64) -> Result<Bytes> {
        let handle = self.topic_handle(topic_name).await?;
        handle.topic.read_record(offset).await
    }

    /// Read records starting at `offset`, blocking on the topic's
    /// offset-wait until `offset` has been committed or `ctx` fires.
    ///
    /// `max_records == 0` means the default of 10; `soft_max_bytes == 0`
    /// disables the byte cap (which is soft: at least one record is returned
    /// even when it alone exceeds the cap).
    pub async fn get_records(
        &self,
        ctx: &CancellationToken,
        topic_name: &str,
        offset: u64,
        max_records: usize,
        soft_max_bytes: usize,
    ) -> Result<Vec<Bytes>> {
        let handle = self.topic_handle(topic_name).await?;
        handle.topic.wait_for_offset(ctx, offset).await?;
        handle
            .topic
            .read_records(ctx, offset, max_records, soft_max_bytes)
            .await
    }

    /// Create a topic, failing with [`Error::TopicAlreadyExists`] when it is
    /// already live in this broker or already has records in the backing
    /// store.
    pub async fn create_topic(&self, topic_name: &str) -> Result<()> {
        let mut topics = self.topics.lock().await;
        if topics.contains_key(topic_name) {
            return Err(Error::TopicAlreadyExists {
                topic: topic_name.to_string(),
            });
        }

        let handle = self.open_topic(topic_name).await?;

        // The registry only knows topics seen during this broker's lifetime.
        // A non-zero next offset is the evidence that the topic already
        // exists in the backing store.
        if handle.topic.next_offset() != 0 {
            return Err(Error::TopicAlreadyExists {
                topic: topic_name.to_string(),
            });
        }

        tracing::info!(topic = topic_name, "created topic");
        topics.insert(topic_name.to_string(), handle);
        Ok(())
    }

    /// Metadata for `topic_name`; [`Error::TopicNotFound`] when auto-create
    /// is off and the topic is absent.
    pub async fn metadata(&self, topic_name: &str) -> Result<TopicMetadata> {
        let handle = self.topic_handle(topic_name).await?;
        Ok(handle.topic.metadata())
    }

    async fn topic_handle(&self, topic_name: &str) -> Result<TopicHandle> {
        let mut topics = self.topics.lock().await;
        if let Some(handle) = topics.get(topic_name) {
            return Ok(handle.clone());
        }

        if !self.config.auto_create_topics {
            return Err(Error::TopicNotFound {
                topic: topic_name.to_string(),
            });
        }

        tracing::debug!(topic = topic_name, "opening topic on first use");

        // NOTE: the open below does storage I/O while the registry lock is
        // held, stalling first access to other topics.
        let handle = self.open_topic(topic_name).await?;
        topics.insert(topic_name.to_string(), handle.clone());
        Ok(handle)
    }

    async fn open_topic(&self, topic_name: &str) -> Result<TopicHandle> {
        let topic = Arc::new(
            Topic::open(
                Arc::clone(&self.storage),
                &self.config.root_dir,
                topic_name,
                Arc::clone(&self.cache),
                self.config.compressor(),
            )
            .await?,
        );

        let batcher: Arc<dyn RecordBatcher> = match &self.config.batcher {
            BatcherKind::Null => Arc::new(NullBatcher::new(Arc::clone(&topic))),
            BatcherKind::Window(config) => {
                Arc::new(WindowBatcher::new(Arc::clone(&topic), config.clone()))
            }
        };

        Ok(TopicHandle { topic, batcher })
    }
}
