//! Payload compression for entries written to the shared store.

use std::io::{Read, Write};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compress(#[from] std::io::Error),
    #[error("payload is neither gzip nor UTF-8 text")]
    Corrupt,
}

pub fn compress(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2), Compression::default());
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

/// Inflate a stored payload.
///
/// Entries written before compression was introduced are plain UTF-8 JSON;
/// those are returned unchanged instead of failing the read.
pub fn decompress(stored: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(stored);
    let mut inflated = Vec::new();
    match decoder.read_to_end(&mut inflated) {
        Ok(_) => Ok(inflated),
        Err(_) if std::str::from_utf8(stored).is_ok() => Ok(stored.to_vec()),
        Err(_) => Err(CodecError::Corrupt),
    }
}
