//! Error Types for Skiff
//!
//! This module defines the single error enum shared across all Skiff crates.
//!
//! ## Error Categories
//!
//! ### Sentinels
//! Errors that callers are expected to match on:
//! - `TopicNotFound`: topic is unknown and auto-creation is disabled
//! - `TopicAlreadyExists`: topic is live in the broker or in the backing store
//! - `OutOfBounds`: offset at or beyond the topic's next offset
//! - `NotInCache`: cache miss (best-effort tier; callers fall back to storage)
//! - `NotInStorage`: key absent from the backing store
//! - `Unauthorized`: request carried a missing or wrong API key
//!
//! ### Cancellation
//! `Canceled` is returned verbatim when the caller's cancellation token fires.
//! It is never logged as an error.
//!
//! ### Codec / storage
//! `InvalidMagic`, `UnsupportedVersion`, `Corrupt`, `Io`, and `Storage` carry
//! their sources and surface as internal failures at the HTTP boundary.
//!
//! ## Usage
//!
//! All fallible operations return `Result<T>`, aliased to
//! `Result<T, Error>`, so `?` propagation works throughout. Sentinels stay
//! matchable after wrapping:
//!
//! ```ignore
//! match topic.read_record(offset).await {
//!     Err(Error::OutOfBounds { .. }) => respond_404(),
//!     other => other?,
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("topic not found: '{topic}'")]
    TopicNotFound { topic: String },

    #[error("topic already exists: '{topic}'")]
    TopicAlreadyExists { topic: String },

    #[error("offset {offset} is out of bounds ({available} available)")]
    OutOfBounds { offset: u64, available: u64 },

    #[error("not in cache: '{key}'")]
    NotInCache { key: String },

    #[error("not in storage: '{key}'")]
    NotInStorage { key: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("operation canceled")]
    Canceled,

    #[error("record batch contains no records")]
    EmptyBatch,

    #[error("invalid magic bytes")]
    InvalidMagic,

    #[error("unsupported file format version: {0}")]
    UnsupportedVersion(i16),

    #[error("corrupt record batch: {0}")]
    Corrupt(String),

    #[error("record batcher stopped")]
    BatcherStopped,

    // One storage failure fails every producer waiting on the same batch
    // window, so the underlying error is shared.
    #[error("writing batch: {0}")]
    BatchWrite(Arc<Error>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    Storage(#[from] object_store::Error),
}
