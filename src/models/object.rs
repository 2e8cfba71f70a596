//! Represents an object (blob) stored under a flat key namespace.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::metadata::Metadata;

/// Row stored in the `objects` table.
///
/// The row describes the payload; the bytes themselves live on disk (or in
/// memory for the in-process store).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRow {
    /// Object key (path-like identifier, e.g. `pdfs/1700000000000-ab12cd34-book.pdf`).
    pub key: String,

    /// Final path segment of the key.
    pub filename: String,

    /// Content type (MIME type).
    pub content_type: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload.
    pub etag: String,

    /// Timestamp of the last write to this key.
    pub uploaded_at: DateTime<Utc>,

    /// Payload file relative to the store's base directory. Every write gets
    /// a fresh file; the row names the one that is live.
    pub payload_path: String,
}

/// Object description returned by `head` and `list`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ObjectInfo {
    pub key: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub etag: String,
    pub uploaded_at: DateTime<Utc>,

    /// Custom per-object metadata (expiry stamps, chunk bookkeeping, ...).
    pub metadata: Metadata,
}

impl ObjectInfo {
    pub fn from_row(row: ObjectRow, metadata: Metadata) -> Self {
        Self {
            key: row.key,
            filename: row.filename,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            etag: row.etag,
            uploaded_at: row.uploaded_at,
            metadata,
        }
    }
}

/// A fetched object: description plus payload.
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub info: ObjectInfo,
    pub body: Bytes,
}

/// Final path segment of a storage key.
pub fn filename_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
