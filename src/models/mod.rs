//! Core data models for the archive-to-document converter.
//!
//! Storage records map to SQLite rows via `sqlx::FromRow` and serialize as
//! JSON via `serde`. Pipeline records (entries, pages, artifacts) are plain
//! values passed between the conversion stages.

pub mod archive;
pub mod artifact;
pub mod metadata;
pub mod object;
pub mod upload;
