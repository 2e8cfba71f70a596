//! In-process [`BlobStore`] used by tests and ephemeral deployments.

use crate::models::{
    metadata::Metadata,
    object::{ObjectInfo, StoredObject, filename_of},
};
use crate::services::storage_service::{BlobStore, StorageError, StorageResult, validate_key};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: Metadata,
    ) -> StorageResult<ObjectInfo> {
        validate_key(key)?;
        let info = ObjectInfo {
            key: key.to_string(),
            filename: filename_of(key).to_string(),
            content_type: content_type.to_string(),
            size_bytes: body.len() as i64,
            etag: format!("{:x}", md5::compute(&body)),
            uploaded_at: Utc::now(),
            metadata,
        };
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                info: info.clone(),
                body,
            },
        );
        Ok(info)
    }

    async fn get(&self, key: &str) -> StorageResult<StoredObject> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectInfo> {
        self.get(key).await.map(|obj| obj.info)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, obj)| obj.info.clone())
            .collect())
    }
}
