//! Column encodings: embeddings as little-endian f32 blobs, timestamps as
//! RFC 3339 text.

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use warden_core::Embedding;

#[derive(Error, Debug, PartialEq)]
pub enum CodecError {
    #[error("embedding blob length {0} is not a multiple of 4")]
    BlobLength(usize),
    #[error("embedding blob is empty")]
    EmptyBlob,
    #[error("embedding contains non-finite values")]
    NonFinite,
    #[error("unparseable timestamp {0:?}")]
    Timestamp(String),
}

pub fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(embedding.values.as_slice()));
    for &value in &embedding.values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn decode_embedding(blob: &[u8]) -> Result<Embedding, CodecError> {
    if blob.is_empty() {
        return Err(CodecError::EmptyBlob);
    }
    if blob.len() % 4 != 0 {
        return Err(CodecError::BlobLength(blob.len()));
    }

    let mut values = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err(CodecError::NonFinite);
        }
        values.push(value);
    }
    Ok(Embedding::new(values))
}

pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parse a stored timestamp.
///
/// Besides RFC 3339, accepts the offset-less `YYYY-MM-DDTHH:MM:SS[.ffffff]`
/// and `YYYY-MM-DD HH:MM:SS` forms found in older databases, read as UTC.
pub fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, CodecError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(CodecError::Timestamp(raw.to_string()))
}
