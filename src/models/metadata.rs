//! User-defined metadata associated with stored objects.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Key-value metadata attached to an object. Ordered so listings and logs are
/// stable.
pub type Metadata = BTreeMap<String, String>;

/// RFC 3339 creation stamp written by the lifecycle manager.
pub const CREATED_AT: &str = "created-at";
/// RFC 3339 expiry stamp written by the lifecycle manager.
pub const EXPIRES_AT: &str = "expires-at";
/// Declared part count carried by every chunk of a chunked upload.
pub const TOTAL_CHUNKS: &str = "total-chunks";
/// Index of a chunk within its upload.
pub const CHUNK_INDEX: &str = "chunk-index";
/// Number of parts a merged upload was assembled from.
pub const REASSEMBLED_FROM: &str = "reassembled-from";
pub const PAGE_COUNT: &str = "page-count";
pub const SOURCE_KEY: &str = "source-key";
pub const HAS_FRONT_COVER: &str = "has-front-cover";
pub const HAS_BACK_COVER: &str = "has-back-cover";

/// Row stored in the `object_metadata` table.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectMetadataRow {
    /// Key of the owning object.
    pub object_key: String,

    /// Metadata name (e.g. `expires-at`).
    pub name: String,

    /// Metadata value as plain text.
    pub value: String,
}
