//! Record-Batch File Format
//!
//! This module implements the binary format of the `.record_batch` file — the
//! durable unit of a topic. A batch holds N opaque records behind a fixed
//! header and a per-record offset index.
//!
//! ## File Structure
//!
//! All integers are little-endian.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ Header (9 bytes)                              │
//! │ - Magic bytes: "slc" (3 bytes)                │
//! │ - Version: 1 (2 bytes, signed)                │
//! │ - Record count N (4 bytes, unsigned)          │
//! ├───────────────────────────────────────────────┤
//! │ Record index (4·N bytes)                      │
//! │ - payload-relative start of each record (u32) │
//! ├───────────────────────────────────────────────┤
//! │ Payloads (concatenated records, no padding)   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Record K spans `[index[K], index[K+1])` of the payload region; the last
//! record runs to the end of the file. There is no framing beyond this: a
//! stream compressor, when configured, wraps the whole file transparently.
//!
//! ## Usage
//!
//! ```ignore
//! let data = batch::encode(&records)?;
//! // ... store data, fetch it back ...
//! let parsed = RecordBatch::parse(data)?;
//! let first = parsed.record(0)?;
//! ```
//!
//! `RecordBatch` keeps the backing `Bytes`, so `record()` is a zero-copy
//! slice of the shared buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Magic bytes at the start of every batch file.
pub const MAGIC: [u8; 3] = *b"slc";

/// Current file format version.
pub const FORMAT_VERSION: i16 = 1;

/// Size of the fixed header: magic + version + record count.
pub const HEADER_SIZE: usize = 9;

/// Size of one record index entry.
pub const RECORD_INDEX_SIZE: usize = 4;

/// File name extension of batch files inside a topic directory.
pub const RECORD_BATCH_EXTENSION: &str = ".record_batch";

/// The fixed header of a batch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHeader {
    pub version: i16,
    pub num_records: u32,
}

/// Serialize `records` into a complete batch file: header, record index,
/// then concatenated payloads.
///
/// An empty batch file has no meaning (it would cover zero offsets), so an
/// empty input slice is rejected.
pub fn encode(records: &[Bytes]) -> Result<Bytes> {
    if records.is_empty() {
        return Err(Error::EmptyBatch);
    }

    let payload_len: usize = records.iter().map(|r| r.len()).sum();
    let mut buf =
        BytesMut::with_capacity(HEADER_SIZE + RECORD_INDEX_SIZE * records.len() + payload_len);

    buf.put_slice(&MAGIC);
    buf.put_i16_le(FORMAT_VERSION);
    buf.put_u32_le(records.len() as u32);

    let mut record_index = 0u32;
    for record in records {
        buf.put_u32_le(record_index);
        record_index += record.len() as u32;
    }

    for record in records {
        buf.put_slice(record);
    }

    Ok(buf.freeze())
}

/// A parsed batch file handle, giving access to individual records.
pub struct RecordBatch {
    header: BatchHeader,
    index: Vec<u32>,
    data: Bytes,
}

impl RecordBatch {
    /// Parse a batch file, validating magic and version and reading the full
    /// record index. Payload bytes are only touched by later `record()` calls.
    pub fn parse(data: Bytes) -> Result<Self> {
        let header = Self::parse_header(&data)?;

        let index_end = HEADER_SIZE + RECORD_INDEX_SIZE * header.num_records as usize;
        if data.len() < index_end {
            return Err(Error::Corrupt(format!(
                "file is {} bytes, record index requires {}",
                data.len(),
                index_end
            )));
        }

        let mut cursor = &data[HEADER_SIZE..index_end];
        let mut index = Vec::with_capacity(header.num_records as usize);
        for _ in 0..header.num_records {
            index.push(cursor.get_u32_le());
        }

        Ok(Self {
            header,
            index,
            data,
        })
    }

    /// Parse just the fixed header. Used by the topic open protocol, which
    /// fetches only the first [`HEADER_SIZE`] bytes of the newest batch.
    pub fn header_only(data: &[u8]) -> Result<BatchHeader> {
        Self::parse_header(data)
    }

    fn parse_header(data: &[u8]) -> Result<BatchHeader> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corrupt(format!(
                "file is {} bytes, header requires {}",
                data.len(),
                HEADER_SIZE
            )));
        }

        let mut cursor = data;
        let mut magic = [0u8; 3];
        cursor.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(Error::InvalidMagic);
        }

        let version = cursor.get_i16_le();
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let num_records = cursor.get_u32_le();
        Ok(BatchHeader {
            version,
            num_records,
        })
    }

    pub fn num_records(&self) -> u32 {
        self.header.num_records
    }

    /// Return record `record_index` as a zero-copy slice of the file.
    pub fn record(&self, record_index: u32) -> Result<Bytes> {
        if record_index >= self.header.num_records {
            return Err(Error::OutOfBounds {
                offset: record_index as u64,
                available: self.header.num_records as u64,
            });
        }

        let payload_start = HEADER_SIZE + RECORD_INDEX_SIZE * self.header.num_records as usize;
        let i = record_index as usize;
        let start = payload_start + self.index[i] as usize;
        let end = match self.index.get(i + 1) {
            Some(&next) => payload_start + next as usize,
            None => self.data.len(),
        };

        if start > end || end > self.data.len() {
            return Err(Error::Corrupt(format!(
                "record {} spans {}..{} in a {}-byte file",
                record_index,
                start,
                end,
                self.data.len()
            )));
        }

        Ok(self.data.slice(start..end))
    }

    /// Collect every record in the batch.
    pub fn records(&self) -> Result<Vec<Bytes>> {
        (0..self.header.num_records).map(|i| self.record(i)).collect()
    }
}
