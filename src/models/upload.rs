//! Upload keys and chunked upload sessions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Namespace for raw uploads.
pub const UPLOADS_PREFIX: &str = "uploads/";
/// Namespace for produced documents.
pub const DOCUMENTS_PREFIX: &str = "pdfs/";

const CHUNK_INFIX: &str = ".chunk.";
const FALLBACK_NAME: &str = "upload.zip";

/// Build a fresh upload key: `uploads/<unix-millis>-<token>-<name>`.
pub fn new_upload_key(original_name: &str, now: DateTime<Utc>) -> String {
    let token = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}-{}-{}",
        UPLOADS_PREFIX,
        now.timestamp_millis(),
        &token[..8],
        sanitize_file_name(original_name)
    )
}

/// Keep only the final path segment of a client-supplied name and drop
/// characters that have no business in a storage key.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let mut base = base.trim().trim_start_matches('.').to_string();
    // storage keys may not contain `..`
    while base.contains("..") {
        base = base.replace("..", ".");
    }
    if base.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        base
    }
}

/// Storage key of one part: `<fileKey>.chunk.<index>`.
pub fn chunk_key(file_key: &str, index: u32) -> String {
    format!("{file_key}{CHUNK_INFIX}{index}")
}

/// Listing prefix covering every part of `file_key`.
pub fn chunk_prefix(file_key: &str) -> String {
    format!("{file_key}{CHUNK_INFIX}")
}

/// Parse the part index out of a chunk key belonging to `file_key`.
pub fn parse_chunk_index(file_key: &str, key: &str) -> Option<u32> {
    let suffix = key.strip_prefix(file_key)?.strip_prefix(CHUNK_INFIX)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// One logical file being assembled from parts.
///
/// Reconstructed from the chunk keys present in the store, so every handler
/// (and every process) sees the same session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSession {
    pub file_key: String,
    pub total_chunks: u32,
    pub received: BTreeSet<u32>,
}

impl UploadSession {
    pub fn new(file_key: impl Into<String>, total_chunks: u32) -> Self {
        Self {
            file_key: file_key.into(),
            total_chunks,
            received: BTreeSet::new(),
        }
    }

    /// Record every chunk key under this session's prefix. Foreign keys and
    /// out-of-range indices are ignored.
    pub fn observe_keys<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        for key in keys {
            if let Some(index) = parse_chunk_index(&self.file_key, key) {
                if index < self.total_chunks {
                    self.received.insert(index);
                }
            }
        }
    }

    /// Complete iff the received indices are exactly `[0, total_chunks)`.
    pub fn is_complete(&self) -> bool {
        self.received.len() == self.total_chunks as usize
            && self.received.iter().copied().eq(0..self.total_chunks)
    }

    pub fn missing(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }
}
