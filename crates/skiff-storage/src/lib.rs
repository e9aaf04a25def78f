//! Skiff Storage Layer
//!
//! This crate implements the durable tier of Skiff: the backing-store
//! abstraction that record-batch files are written to and read from, the
//! byte-bounded LRU cache that sits in front of it, and the whole-file
//! stream compressor.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐
//! │  Topic log   │
//! └──────┬───────┘
//!        │ batch files
//!        ▼
//! ┌──────────────────┐   best-effort   ┌──────────────┐
//! │  BackingStorage  │ ◄────────────── │    Cache     │
//! │  (authoritative) │    mirror       │ (LRU, bytes) │
//! └──────┬───────────┘                 └──────────────┘
//!        │
//!   ┌────┴──────┐
//!   ▼           ▼
//! ObjectStorage DiskStorage
//! (S3 / memory) (local fs)
//! ```
//!
//! The backing store is authoritative: cache failures are logged and
//! swallowed by callers, and a reader that misses the cache always finds the
//! batch in the backing store.

pub mod backing;
pub mod cache;
pub mod compress;
pub mod disk;
pub mod object;

pub use backing::{BackingStorage, FileEntry};
pub use cache::{Cache, CacheStorage, DiskCacheStorage, MemoryCacheStorage};
pub use compress::Compressor;
pub use disk::DiskStorage;
pub use object::ObjectStorage;
