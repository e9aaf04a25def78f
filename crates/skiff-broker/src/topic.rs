//! The Per-Topic Append Log
//!
//! A [`Topic`] owns one topic's batch files in the backing store, the
//! in-memory index of batch first-offsets, the next-offset counter, and the
//! offset-wait primitive that lets readers block until a target offset has
//! been committed.
//!
//! ## On-disk layout
//!
//! Under `root_dir/<topic>/`, each committed batch is an immutable file
//! named after the offset of its first record:
//!
//! ```text
//! root_dir/
//!   clickstream/
//!     000000000000.record_batch
//!     000000000005.record_batch
//!     000000000012.record_batch
//! ```
//!
//! The sorted first-offsets form a contiguous cover of `[0, next_offset)`:
//! each file's first offset equals the previous file's first offset plus its
//! record count. That makes the filename list a complete index — opening a
//! topic is one listing plus a single header read of the newest file.
//!
//! ## Offset-wait
//!
//! `next_offset` lives in a `watch` channel. Every commit publishes the new
//! value, waking all waiters at once; each waiter re-checks its predicate
//! (`next_offset > target`), so spurious wake-ups are harmless. Cancellation
//! is a token raced against the watch; it wins with [`Error::Canceled`].

use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use bytes::Bytes;
use skiff_core::batch::{self, HEADER_SIZE, RECORD_BATCH_EXTENSION};
use skiff_core::{Error, RecordBatch, Result};
use skiff_storage::{BackingStorage, Cache, Compressor};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Default for `read_records` when the caller passes `max_records == 0`.
const DEFAULT_MAX_RECORDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicMetadata {
    pub next_offset: u64,
    pub latest_commit_at: SystemTime,
}

pub struct Topic {
    name: String,
    path: String,
    storage: Arc<dyn BackingStorage>,
    cache: Arc<Cache>,
    compressor: Compressor,

    // Serialises writers; reader state lives behind its own locks so reads
    // never queue behind an in-flight commit's storage I/O.
    write_lock: tokio::sync::Mutex<()>,
    base_offsets: RwLock<Vec<u64>>,
    next_offset_tx: watch::Sender<u64>,
    latest_commit_at: Mutex<SystemTime>,
}

impl Topic {
    /// Open a topic, reconstructing its offset index from the batch files
    /// present in the backing store.
    pub async fn open(
        storage: Arc<dyn BackingStorage>,
        root_dir: &str,
        name: &str,
        cache: Arc<Cache>,
        compressor: Compressor,
    ) -> Result<Topic> {
        let path = topic_path(root_dir, name);

        let files = storage.list_files(&path, RECORD_BATCH_EXTENSION).await?;
        let mut base_offsets = Vec::with_capacity(files.len());
        for file in &files {
            base_offsets.push(parse_batch_stem(&file.path)?);
        }
        base_offsets.sort_unstable();

        let next_offset = match base_offsets.last() {
            Some(&last) => {
                let header =
                    read_batch_header(storage.as_ref(), &batch_key(&path, last), compressor)
                        .await?;
                last + header.num_records as u64
            }
            None => 0,
        };

        tracing::debug!(
            topic = name,
            batches = base_offsets.len(),
            next_offset,
            "opened topic log"
        );

        let (next_offset_tx, _) = watch::channel(next_offset);

        Ok(Topic {
            name: name.to_string(),
            path,
            storage,
            cache,
            compressor,
            write_lock: tokio::sync::Mutex::new(()),
            base_offsets: RwLock::new(base_offsets),
            next_offset_tx,
            latest_commit_at: Mutex::new(SystemTime::now()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The offset the next committed record will receive.
    pub fn next_offset(&self) -> u64 {
        *self.next_offset_tx.borrow()
    }

    pub fn metadata(&self) -> TopicMetadata {
        TopicMetadata {
            next_offset: self.next_offset(),
            latest_commit_at: *self.latest_commit_at.lock().unwrap(),
        }
    }

    /// Durably append `records` as one batch and return the offset assigned
    /// to the first record.
    ///
    /// On a storage failure nothing is advanced: the batch file is not part
    /// of the index, `next_offset` is unchanged, and no waiter wakes up.
    pub async fn add_record_batch(&self, records: &[Bytes]) -> Result<u64> {
        if records.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let _write = self.write_lock.lock().await;

        let start_offset = self.next_offset();
        let key = batch_key(&self.path, start_offset);

        let encoded = batch::encode(records)?;
        let stored = self.compressor.encode(encoded)?;
        self.storage.put(&key, stored.clone()).await?;

        self.base_offsets.write().unwrap().push(start_offset);
        *self.latest_commit_at.lock().unwrap() = SystemTime::now();

        // The backing store is authoritative; a failed cache mirror only
        // costs the next reader a fetch.
        if let Err(err) = self.cache.write(&key, stored).await {
            tracing::warn!(
                topic = %self.name,
                key = %key,
                error = %err,
                "failed to mirror batch to cache"
            );
        }

        self.next_offset_tx
            .send_replace(start_offset + records.len() as u64);

        tracing::debug!(
            topic = %self.name,
            start_offset,
            records = records.len(),
            "committed record batch"
        );

        Ok(start_offset)
    }

    /// Read the single record at `offset`.
    pub async fn read_record(&self, offset: u64) -> Result<Bytes> {
        let next_offset = self.next_offset();
        if offset >= next_offset {
            return Err(Error::OutOfBounds {
                offset,
                available: next_offset,
            });
        }

        let base_offset = self.batch_containing(offset);
        let parsed = self.load_batch(base_offset).await?;
        parsed.record((offset - base_offset) as u32)
    }

    /// Read up to `max_records` records starting at `start_offset`.
    ///
    /// `max_records == 0` means the default of 10. `soft_max_bytes` caps the
    /// cumulative returned byte size, except that at least one record is
    /// always returned; `0` disables the cap. Cancellation observed after at
    /// least one record has been collected returns the partial batch;
    /// observed before any record, [`Error::Canceled`].
    pub async fn read_records(
        &self,
        ctx: &CancellationToken,
        start_offset: u64,
        max_records: usize,
        soft_max_bytes: usize,
    ) -> Result<Vec<Bytes>> {
        let max_records = if max_records == 0 {
            DEFAULT_MAX_RECORDS
        } else {
            max_records
        };

        let next_offset = self.next_offset();
        if start_offset >= next_offset {
            return Err(Error::OutOfBounds {
                offset: start_offset,
                available: next_offset,
            });
        }

        let mut records = Vec::new();
        let mut record_bytes = 0usize;
        let mut offset = start_offset;

        'batches: while offset < next_offset && records.len() < max_records {
            if ctx.is_cancelled() {
                if records.is_empty() {
                    return Err(Error::Canceled);
                }
                break;
            }

            let base_offset = self.batch_containing(offset);
            let parsed = self.load_batch(base_offset).await?;
            let batch_end = base_offset + parsed.num_records() as u64;

            while offset < batch_end && offset < next_offset && records.len() < max_records {
                let record = parsed.record((offset - base_offset) as u32)?;

                if soft_max_bytes > 0
                    && !records.is_empty()
                    && record_bytes + record.len() > soft_max_bytes
                {
                    break 'batches;
                }

                record_bytes += record.len();
                records.push(record);
                offset += 1;
            }
        }

        Ok(records)
    }

    /// Block until `next_offset > target_offset` or the token fires.
    ///
    /// Wake-ups are broadcast — one commit unblocks every waiter — and the
    /// predicate is re-checked on each wake-up.
    pub async fn wait_for_offset(
        &self,
        ctx: &CancellationToken,
        target_offset: u64,
    ) -> Result<()> {
        let mut next_offset_rx = self.next_offset_tx.subscribe();
        // Biased so a fired token wins even when the target offset is
        // already committed and both branches are ready on the first poll.
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(Error::Canceled),
            changed = next_offset_rx.wait_for(|next| *next > target_offset) => {
                changed.map(|_| ()).map_err(|_| Error::Canceled)
            }
        }
    }

    /// First offset of the batch containing `offset`. Caller must have
    /// checked `offset < next_offset`.
    fn batch_containing(&self, offset: u64) -> u64 {
        let base_offsets = self.base_offsets.read().unwrap();
        let idx = base_offsets.partition_point(|&base| base <= offset);
        base_offsets[idx - 1]
    }

    /// Fetch and parse the batch starting at `first_offset`: cache first,
    /// backing store on a miss. Cache failures other than absence degrade to
    /// a miss.
    async fn load_batch(&self, first_offset: u64) -> Result<RecordBatch> {
        let key = batch_key(&self.path, first_offset);

        let stored = match self.cache.read(&key).await {
            Ok(bytes) => bytes,
            Err(Error::NotInCache { .. }) => {
                tracing::debug!(topic = %self.name, key = %key, "batch not in cache");
                self.storage.get(&key).await?
            }
            Err(err) => {
                tracing::warn!(topic = %self.name, key = %key, error = %err, "cache read failed");
                self.storage.get(&key).await?
            }
        };

        let data = self.compressor.decode(stored)?;
        RecordBatch::parse(data)
    }
}

fn topic_path(root_dir: &str, name: &str) -> String {
    let root_dir = root_dir.trim_matches('/');
    if root_dir.is_empty() {
        name.to_string()
    } else {
        format!("{root_dir}/{name}")
    }
}

/// Key of the batch file whose first record has offset `first_offset`.
fn batch_key(topic_path: &str, first_offset: u64) -> String {
    format!("{topic_path}/{first_offset:012}{RECORD_BATCH_EXTENSION}")
}

/// Recover a batch's first offset from its file name.
fn parse_batch_stem(path: &str) -> Result<u64> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name
        .strip_suffix(RECORD_BATCH_EXTENSION)
        .ok_or_else(|| Error::Corrupt(format!("unexpected batch file name '{name}'")))?;
    stem.parse::<u64>()
        .map_err(|_| Error::Corrupt(format!("batch file name '{name}' is not an offset")))
}

async fn read_batch_header(
    storage: &dyn BackingStorage,
    key: &str,
    compressor: Compressor,
) -> Result<batch::BatchHeader> {
    if compressor.is_none() {
        let head = storage.get_range(key, 0..HEADER_SIZE as u64).await?;
        RecordBatch::header_only(&head)
    } else {
        let stored = storage.get(key).await?;
        let data = compressor.decode(stored)?;
        RecordBatch::header_only(&data)
    }
}
