//! The produced document and its lifetime stamps.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Creation and expiry stamps persisted as object metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryStamp {
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A stored conversion result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionArtifact {
    /// Storage key of the document (`pdfs/...`).
    pub key: String,
    /// Upload the document was produced from.
    pub source_key: String,
    /// Pages actually embedded.
    pub page_count: usize,
    /// Pages dropped because their bytes were not a supported image.
    pub skipped_pages: Vec<String>,
    pub password_used: Option<String>,
    pub has_front_cover: bool,
    pub has_back_cover: bool,
    pub size_bytes: usize,
    #[serde(flatten)]
    pub expiry: ExpiryStamp,
}
