//! Stored object encoding: compact JSON, gzip, SHA-256 of the compressed bytes.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::StorageError;

pub const CONTENT_TYPE: &str = "application/json";
pub const CONTENT_ENCODING: &str = "gzip";
/// User-metadata key carrying the hex digest.
pub const CONTENT_HASH_METADATA: &str = "content-hash";

/// A document ready to be written.
#[derive(Debug, Clone)]
pub struct EncodedObject {
    pub bytes: Bytes,
    /// Lowercase hex SHA-256 of `bytes`.
    pub content_hash: String,
}

/// Serialize `document` compactly, gzip it and digest the result.
///
/// The gzip header carries no timestamp, so equal documents encode to equal
/// bytes and equal hashes.
pub fn encode(document: &Value) -> Result<EncodedObject, StorageError> {
    let json = serde_json::to_vec(document)
        .map_err(|e| StorageError::Codec(format!("JSON encode failed: {e}")))?;

    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    let content_hash = content_hash(&compressed);
    Ok(EncodedObject {
        bytes: Bytes::from(compressed),
        content_hash,
    })
}

/// Inverse of [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Value, StorageError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| StorageError::Codec(format!("gzip decode failed: {e}")))?;
    serde_json::from_slice(&json).map_err(|e| StorageError::Codec(format!("JSON decode failed: {e}")))
}

pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
