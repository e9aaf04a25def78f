//! Whole-File Stream Compression
//!
//! Batch files can optionally pass through a deflate-family codec on their
//! way to the backing store. Compression is applied at whole-file
//! granularity — the batch format itself is unaware of it — and a
//! write/read round-trip preserves byte contents exactly.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use skiff_core::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compressor {
    #[default]
    None,
    Gzip,
}

impl Compressor {
    pub fn encode(&self, data: Bytes) -> Result<Bytes> {
        match self {
            Compressor::None => Ok(data),
            Compressor::Gzip => {
                let mut encoder =
                    GzEncoder::new(Vec::with_capacity(data.len() / 2), flate2::Compression::default());
                encoder.write_all(&data)?;
                Ok(Bytes::from(encoder.finish()?))
            }
        }
    }

    pub fn decode(&self, data: Bytes) -> Result<Bytes> {
        match self {
            Compressor::None => Ok(data),
            Compressor::Gzip => {
                let mut decoder = GzDecoder::new(data.as_ref());
                let mut out = Vec::with_capacity(data.len() * 2);
                decoder
                    .read_to_end(&mut out)
                    .map_err(|err| Error::Corrupt(format!("gunzip: {err}")))?;
                Ok(Bytes::from(out))
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Compressor::None)
    }
}
