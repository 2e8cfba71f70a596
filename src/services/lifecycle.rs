//! Artifact lifetime: expiry stamps, evict-on-access and namespace sweeps.
//!
//! Every upload and document is written with `created-at` / `expires-at`
//! metadata. Objects written without stamps (chunk parts, legacy uploads)
//! fall back to their recorded creation time plus the TTL.

use crate::models::{
    artifact::ExpiryStamp,
    metadata::{CREATED_AT, EXPIRES_AT, Metadata},
    object::{ObjectInfo, StoredObject},
    upload::{DOCUMENTS_PREFIX, UPLOADS_PREFIX},
};
use crate::services::storage_service::{BlobStore, StorageError};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default artifact lifetime.
pub const DEFAULT_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("object `{key}` expired at {expired_at}")]
    Expired {
        key: String,
        expired_at: DateTime<Utc>,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Counts returned by a sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub deleted: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn BlobStore>,
    ttl: Duration,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn BlobStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn stamp(&self, now: DateTime<Utc>) -> ExpiryStamp {
        ExpiryStamp {
            created_at: now,
            expires_at: now + self.ttl,
        }
    }

    /// Write `created-at` / `expires-at` into `metadata`.
    pub fn tag_expiry(&self, metadata: &mut Metadata, now: DateTime<Utc>) -> ExpiryStamp {
        let stamp = self.stamp(now);
        metadata.insert(CREATED_AT.into(), format_stamp(stamp.created_at));
        metadata.insert(EXPIRES_AT.into(), format_stamp(stamp.expires_at));
        stamp
    }

    /// Recorded expiry, else recorded creation + TTL, else upload time + TTL.
    pub fn expiry_of(&self, info: &ObjectInfo) -> DateTime<Utc> {
        if let Some(expires_at) = parse_stamp(&info.metadata, EXPIRES_AT) {
            return expires_at;
        }
        parse_stamp(&info.metadata, CREATED_AT).unwrap_or(info.uploaded_at) + self.ttl
    }

    pub fn is_expired(&self, info: &ObjectInfo, now: DateTime<Utc>) -> bool {
        now > self.expiry_of(info)
    }

    /// Read an object, deleting it and reporting `Expired` if its lifetime
    /// has passed.
    pub async fn fetch_live(&self, key: &str) -> Result<StoredObject, LifecycleError> {
        self.fetch_live_at(key, Utc::now()).await
    }

    pub async fn fetch_live_at(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<StoredObject, LifecycleError> {
        let object = self.store.get(key).await?;
        if !self.is_expired(&object.info, now) {
            return Ok(object);
        }

        let expired_at = self.expiry_of(&object.info);
        match self.store.delete(key).await {
            Ok(()) | Err(StorageError::ObjectNotFound(_)) => {
                info!(key, %expired_at, "evicted expired object on access");
            }
            Err(err) => warn!(key, error = %err, "failed to evict expired object"),
        }
        Err(LifecycleError::Expired {
            key: key.to_string(),
            expired_at,
        })
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Delete every expired object under the upload and document namespaces.
    /// Individual failures are counted and logged; the sweep keeps going.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        for prefix in [UPLOADS_PREFIX, DOCUMENTS_PREFIX] {
            let objects = match self.store.list(prefix).await {
                Ok(objects) => objects,
                Err(err) => {
                    error!(prefix, error = %err, "sweep could not list namespace");
                    report.failed += 1;
                    continue;
                }
            };

            for object in objects {
                report.checked += 1;
                if !self.is_expired(&object, now) {
                    continue;
                }
                match self.store.delete(&object.key).await {
                    Ok(()) => {
                        debug!(key = %object.key, "swept expired object");
                        report.deleted += 1;
                    }
                    // Already gone: someone else evicted it first.
                    Err(StorageError::ObjectNotFound(_)) => report.deleted += 1,
                    Err(err) => {
                        warn!(key = %object.key, error = %err, "failed to delete expired object");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            checked = report.checked,
            deleted = report.deleted,
            failed = report.failed,
            "sweep finished"
        );
        report
    }

    /// Run [`sweep`](Self::sweep) on a fixed interval until the runtime shuts down.
    pub fn spawn_sweeper(self, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

fn format_stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_stamp(metadata: &Metadata, name: &str) -> Option<DateTime<Utc>> {
    let raw = metadata.get(name)?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(at) => Some(at.with_timezone(&Utc)),
        Err(err) => {
            debug!(name, raw = %raw, error = %err, "ignoring unparsable stamp");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::MemoryBlobStore;
    use bytes::Bytes;

    fn manager() -> (Arc<MemoryBlobStore>, LifecycleManager) {
        let store = Arc::new(MemoryBlobStore::new());
        let lifecycle = LifecycleManager::new(store.clone(), Duration::hours(DEFAULT_TTL_HOURS));
        (store, lifecycle)
    }

    async fn put_with(store: &MemoryBlobStore, key: &str, metadata: Metadata) {
        store
            .put(key, Bytes::from_static(b"data"), "application/pdf", metadata)
            .await
            .unwrap();
    }

    #[test]
    fn tag_expiry_writes_both_stamps() {
        let (_, lifecycle) = manager();
        let now = Utc::now();
        let mut metadata = Metadata::new();
        let stamp = lifecycle.tag_expiry(&mut metadata, now);
        assert_eq!(stamp.expires_at - stamp.created_at, Duration::hours(24));
        assert!(metadata.contains_key(CREATED_AT));
        assert!(metadata.contains_key(EXPIRES_AT));
    }

    #[tokio::test]
    async fn expired_artifact_is_gone_after_access() {
        let (store, lifecycle) = manager();
        let now = Utc::now();
        let mut metadata = Metadata::new();
        metadata.insert(EXPIRES_AT.into(), format_stamp(now - Duration::seconds(1)));
        put_with(&store, "pdfs/old.pdf", metadata).await;

        let err = lifecycle.fetch_live_at("pdfs/old.pdf", now).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Expired { .. }), "{err:?}");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn live_artifact_is_returned() {
        let (store, lifecycle) = manager();
        let now = Utc::now();
        let mut metadata = Metadata::new();
        lifecycle.tag_expiry(&mut metadata, now);
        put_with(&store, "pdfs/new.pdf", metadata).await;

        let obj = lifecycle
            .fetch_live_at("pdfs/new.pdf", now + Duration::hours(23))
            .await
            .unwrap();
        assert_eq!(&obj.body[..], b"data");
    }

    #[tokio::test]
    async fn sweep_uses_stamps_then_age_fallback() {
        let (store, lifecycle) = manager();
        let now = Utc::now();

        let mut fresh = Metadata::new();
        lifecycle.tag_expiry(&mut fresh, now);
        put_with(&store, "pdfs/fresh.pdf", fresh).await;

        let mut stale = Metadata::new();
        lifecycle.tag_expiry(&mut stale, now - Duration::hours(25));
        put_with(&store, "pdfs/stale.pdf", stale).await;

        // legacy chunk part without stamps: judged by upload time
        put_with(&store, "uploads/1-a-b.zip.chunk.0", Metadata::new()).await;
        // outside both namespaces: never touched
        put_with(&store, "other/keep", Metadata::new()).await;

        let report = lifecycle.sweep_at(now + Duration::hours(2)).await;
        assert_eq!(report, SweepReport { checked: 3, deleted: 1, failed: 0 });
        assert!(store.head("pdfs/stale.pdf").await.is_err());

        let report = lifecycle.sweep_at(now + Duration::hours(25)).await;
        assert_eq!(report, SweepReport { checked: 2, deleted: 2, failed: 0 });
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unparsable_expiry_falls_back_to_creation() {
        let (store, lifecycle) = manager();
        let now = Utc::now();
        let mut metadata = Metadata::new();
        metadata.insert(EXPIRES_AT.into(), "tomorrow-ish".into());
        metadata.insert(CREATED_AT.into(), format_stamp(now - Duration::hours(30)));
        put_with(&store, "pdfs/legacy.pdf", metadata).await;

        let info = store.head("pdfs/legacy.pdf").await.unwrap();
        assert!(lifecycle.is_expired(&info, now));
    }
}
