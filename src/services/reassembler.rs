//! Merges chunked uploads into one object.
//!
//! Each part is stored under `<fileKey>.chunk.<index>`. After every part the
//! session is rebuilt from the chunk keys present in the store; when they
//! cover `[0, totalChunks)` the parts are concatenated in index order,
//! written to `fileKey` in a single put, and then deleted.

use crate::models::{
    metadata::{CHUNK_INDEX, Metadata, REASSEMBLED_FROM, TOTAL_CHUNKS},
    object::ObjectInfo,
    upload::{UploadSession, chunk_key, chunk_prefix},
};
use crate::services::{
    lifecycle::LifecycleManager,
    storage_service::{BlobStore, StorageError},
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const UPLOAD_CONTENT_TYPE: &str = "application/zip";
const CHUNK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum ReassemblyError {
    #[error("chunk index {index} is outside [0, {total})")]
    InvalidChunk { index: u32, total: u32 },
    #[error("chunk {index} of `{file_key}` declares {declared} parts but the upload has {expected}")]
    TotalMismatch {
        file_key: String,
        index: u32,
        declared: u32,
        expected: u32,
    },
    #[error("upload `{file_key}` is missing chunks {missing:?}")]
    ReassemblyIncomplete { file_key: String, missing: Vec<u32> },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of receiving one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub complete: bool,
    pub received: usize,
    pub total_chunks: u32,
    /// Size of the merged object once complete.
    pub size: Option<i64>,
}

#[derive(Clone)]
pub struct Reassembler {
    store: Arc<dyn BlobStore>,
    lifecycle: LifecycleManager,
}

impl Reassembler {
    pub fn new(store: Arc<dyn BlobStore>, lifecycle: LifecycleManager) -> Self {
        Self { store, lifecycle }
    }

    /// Store one part and merge the upload if it is now complete.
    ///
    /// Parts may arrive in any order and may be re-sent; a re-sent part
    /// overwrites the stored bytes for its index.
    pub async fn receive_chunk(
        &self,
        file_key: &str,
        chunk_index: u32,
        total_chunks: u32,
        bytes: Bytes,
    ) -> Result<ChunkReceipt, ReassemblyError> {
        if total_chunks == 0 || chunk_index >= total_chunks {
            return Err(ReassemblyError::InvalidChunk {
                index: chunk_index,
                total: total_chunks,
            });
        }

        if total_chunks == 1 {
            let info = self.store_whole(file_key, bytes, None).await?;
            return Ok(ChunkReceipt {
                complete: true,
                received: 1,
                total_chunks,
                size: Some(info.size_bytes),
            });
        }

        let mut metadata = Metadata::new();
        metadata.insert(CHUNK_INDEX.into(), chunk_index.to_string());
        metadata.insert(TOTAL_CHUNKS.into(), total_chunks.to_string());
        self.store
            .put(
                &chunk_key(file_key, chunk_index),
                bytes,
                CHUNK_CONTENT_TYPE,
                metadata,
            )
            .await?;

        let session = self.load_session(file_key, total_chunks).await?;
        debug!(
            file_key,
            chunk_index,
            received = session.received.len(),
            total_chunks,
            "stored chunk"
        );
        if !session.is_complete() {
            if let Some(existing) = self.already_merged(&session).await? {
                debug!(file_key, chunk_index, "late duplicate of a merged upload");
                self.discard_part(&chunk_key(file_key, chunk_index)).await;
                return Ok(ChunkReceipt {
                    complete: true,
                    received: total_chunks as usize,
                    total_chunks,
                    size: Some(existing.size_bytes),
                });
            }
            debug!(file_key, missing = ?session.missing(), "upload still incomplete");
            return Ok(ChunkReceipt {
                complete: false,
                received: session.received.len(),
                total_chunks,
                size: None,
            });
        }

        let info = self.merge(&session).await?;
        Ok(ChunkReceipt {
            complete: true,
            received: session.received.len(),
            total_chunks,
            size: Some(info.size_bytes),
        })
    }

    /// Rebuild the session from the durable store, rejecting parts that
    /// were declared with a different total.
    pub async fn load_session(
        &self,
        file_key: &str,
        total_chunks: u32,
    ) -> Result<UploadSession, ReassemblyError> {
        let parts = self.store.list(&chunk_prefix(file_key)).await?;
        for part in &parts {
            let declared = part
                .metadata
                .get(TOTAL_CHUNKS)
                .and_then(|v| v.parse::<u32>().ok());
            if let Some(declared) = declared.filter(|d| *d != total_chunks) {
                let index = part
                    .metadata
                    .get(CHUNK_INDEX)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default();
                return Err(ReassemblyError::TotalMismatch {
                    file_key: file_key.to_string(),
                    index,
                    declared,
                    expected: total_chunks,
                });
            }
        }

        let mut session = UploadSession::new(file_key, total_chunks);
        session.observe_keys(parts.iter().map(|p| p.key.as_str()));
        Ok(session)
    }

    /// Concatenate every part in index order into `file_key`, then remove
    /// the parts.
    ///
    /// A part that disappeared mid-merge is fine when a concurrent handler
    /// already produced the merged object; otherwise the merge fails
    /// without writing anything.
    pub async fn merge(&self, session: &UploadSession) -> Result<ObjectInfo, ReassemblyError> {
        let file_key = session.file_key.as_str();
        let mut merged = BytesMut::new();
        let mut missing = Vec::new();

        for index in 0..session.total_chunks {
            match self.store.get(&chunk_key(file_key, index)).await {
                Ok(part) => merged.extend_from_slice(&part.body),
                Err(StorageError::ObjectNotFound(_)) => missing.push(index),
                Err(err) => return Err(err.into()),
            }
        }

        if !missing.is_empty() {
            if let Some(existing) = self.already_merged(session).await? {
                debug!(file_key, "parts consumed by a concurrent merge");
                return Ok(existing);
            }
            return Err(ReassemblyError::ReassemblyIncomplete {
                file_key: file_key.to_string(),
                missing,
            });
        }

        let info = self
            .store_whole(file_key, merged.freeze(), Some(session.total_chunks))
            .await?;
        info!(
            file_key,
            parts = session.total_chunks,
            size = info.size_bytes,
            "reassembled upload"
        );

        for index in 0..session.total_chunks {
            self.discard_part(&chunk_key(file_key, index)).await;
        }
        Ok(info)
    }

    async fn discard_part(&self, key: &str) {
        match self.store.delete(key).await {
            Ok(()) | Err(StorageError::ObjectNotFound(_)) => {}
            // The sweep reclaims leftovers by age.
            Err(err) => warn!(key, error = %err, "failed to delete merged chunk"),
        }
    }

    async fn already_merged(
        &self,
        session: &UploadSession,
    ) -> Result<Option<ObjectInfo>, ReassemblyError> {
        match self.store.head(&session.file_key).await {
            Ok(info) => {
                let parts = info
                    .metadata
                    .get(REASSEMBLED_FROM)
                    .and_then(|v| v.parse::<u32>().ok());
                Ok((parts == Some(session.total_chunks)).then_some(info))
            }
            Err(StorageError::ObjectNotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Write a complete upload with expiry stamps.
    async fn store_whole(
        &self,
        file_key: &str,
        bytes: Bytes,
        parts: Option<u32>,
    ) -> Result<ObjectInfo, ReassemblyError> {
        let mut metadata = Metadata::new();
        self.lifecycle.tag_expiry(&mut metadata, Utc::now());
        if let Some(parts) = parts {
            metadata.insert(REASSEMBLED_FROM.into(), parts.to_string());
        }
        Ok(self
            .store
            .put(file_key, bytes, UPLOAD_CONTENT_TYPE, metadata)
            .await?)
    }
}
