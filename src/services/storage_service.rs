//! src/services/storage_service.rs
//!
//! Blob storage behind the conversion pipeline. The [`BlobStore`] trait is the
//! only surface the pipeline touches: put/get/head/delete plus list-by-prefix,
//! with a string metadata map per object. [`SqliteBlobStore`] keeps object and
//! metadata rows in SQLite and payloads on disk sharded beneath
//! `base_path/{shard}/{shard}/{md5(key)}-{write id}`.
//!
//! Every write lands in a fresh payload file and the row is switched to it in
//! the same transaction as the metadata, so a failed overwrite leaves the
//! previous object fully intact. The superseded file is removed after commit.

use crate::models::{
    metadata::{Metadata, ObjectMetadataRow},
    object::{ObjectInfo, ObjectRow, StoredObject, filename_of},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of a single readiness probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub name: &'static str,
    pub ok: bool,
    pub error: Option<String>,
}

/// Flat-namespace object store with per-object custom metadata.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store `body` under `key`, replacing any previous object and its metadata.
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: Metadata,
    ) -> StorageResult<ObjectInfo>;

    async fn get(&self, key: &str) -> StorageResult<StoredObject>;

    async fn head(&self, key: &str) -> StorageResult<ObjectInfo>;

    /// Remove an object. Returns `ObjectNotFound` when nothing was stored.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Every object whose key starts with `prefix`, in key order.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    /// Backend-specific readiness probes.
    async fn readiness(&self) -> Vec<ProbeResult> {
        Vec::new()
    }
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const READ_ATTEMPTS: usize = 3;

/// Schema applied by [`SqliteBlobStore::migrate`].
pub const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or oversized keys, keys that begin with `/` or contain `..`,
/// and keys with control characters or backslashes.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.contains("..")
        || key
            .chars()
            .any(|c| c.is_control() || c == '\\' || c == '\0');
    if invalid {
        return Err(StorageError::InvalidObjectKey(key.to_string()));
    }
    Ok(())
}

/// SQLite metadata + sharded on-disk payloads.
#[derive(Clone)]
pub struct SqliteBlobStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl SqliteBlobStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = INIT_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Fresh payload location for one write of `key`, relative to the base
    /// path: `{aa}/{bb}/{md5 hex}-{write id}`.
    ///
    /// The key itself never becomes a filesystem path, so arbitrary upload
    /// names cannot collide with directories.
    fn new_payload_path(key: &str) -> String {
        let digest = format!("{:x}", md5::compute(key));
        format!(
            "{}/{}/{}-{}",
            &digest[0..2],
            &digest[2..4],
            digest,
            Uuid::new_v4().simple()
        )
    }

    fn absolute(&self, payload_path: &str) -> PathBuf {
        self.base_path.join(payload_path)
    }

    async fn fetch_row(&self, key: &str) -> StorageResult<ObjectRow> {
        sqlx::query_as::<_, ObjectRow>(
            "SELECT key, filename, content_type, size_bytes, etag, uploaded_at, payload_path
             FROM objects WHERE key = ?",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound(key.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_metadata(&self, key: &str) -> StorageResult<Metadata> {
        let rows = sqlx::query_as::<_, ObjectMetadataRow>(
            "SELECT object_key, name, value FROM object_metadata WHERE object_key = ?",
        )
        .bind(key)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(|r| (r.name, r.value)).collect())
    }

    /// Write bytes to a temp file beside a fresh payload path, fsync, then
    /// rename into place so readers never observe a partial payload.
    /// Returns the payload path relative to the base directory.
    async fn write_payload(&self, key: &str, body: &[u8]) -> StorageResult<String> {
        let payload_path = Self::new_payload_path(key);
        let file_path = self.absolute(&payload_path);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        Ok(payload_path)
    }

    /// Remove a payload file and prune its shard directories. A file that is
    /// already gone is not an error.
    async fn remove_payload(&self, payload_path: &str) -> io::Result<()> {
        let file_path = self.absolute(payload_path);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(err),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Recursively remove empty shard directories up to the base path.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: Metadata,
    ) -> StorageResult<ObjectInfo> {
        validate_key(key)?;
        let payload_path = self.write_payload(key, &body).await?;

        let row = ObjectRow {
            key: key.to_string(),
            filename: filename_of(key).to_string(),
            content_type: content_type.to_string(),
            size_bytes: body.len() as i64,
            etag: format!("{:x}", md5::compute(&body)),
            uploaded_at: Utc::now(),
            payload_path,
        };

        let committed: Result<Option<String>, sqlx::Error> = async {
            let mut tx = self.db.begin().await?;
            // write first so the transaction holds the write lock before it
            // reads the payload it is about to supersede
            sqlx::query("DELETE FROM object_metadata WHERE object_key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?;
            let previous = sqlx::query_scalar::<_, String>(
                "SELECT payload_path FROM objects WHERE key = ?",
            )
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO objects (key, filename, content_type, size_bytes, etag, uploaded_at, payload_path)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    filename = excluded.filename,
                    content_type = excluded.content_type,
                    size_bytes = excluded.size_bytes,
                    etag = excluded.etag,
                    uploaded_at = excluded.uploaded_at,
                    payload_path = excluded.payload_path
                "#,
            )
            .bind(&row.key)
            .bind(&row.filename)
            .bind(&row.content_type)
            .bind(row.size_bytes)
            .bind(&row.etag)
            .bind(row.uploaded_at)
            .bind(&row.payload_path)
            .execute(&mut *tx)
            .await?;

            for (name, value) in &metadata {
                sqlx::query("INSERT INTO object_metadata (object_key, name, value) VALUES (?, ?, ?)")
                    .bind(key)
                    .bind(name)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(previous)
        }
        .await;

        match committed {
            Ok(previous) => {
                if let Some(previous) = previous.filter(|p| *p != row.payload_path) {
                    if let Err(err) = self.remove_payload(&previous).await {
                        warn!(key, %err, "failed to remove superseded payload {}", previous);
                    }
                }
                debug!(key, size = row.size_bytes, "stored object");
                Ok(ObjectInfo::from_row(row, metadata))
            }
            Err(err) => {
                if let Err(io_err) = self.remove_payload(&row.payload_path).await {
                    warn!(key, %io_err, "failed to remove orphaned payload {}", row.payload_path);
                }
                Err(StorageError::Sqlx(err))
            }
        }
    }

    async fn get(&self, key: &str) -> StorageResult<StoredObject> {
        validate_key(key)?;
        // an overwrite committed between the row read and the file read
        // retires the payload the row named; read the row again
        for _ in 0..READ_ATTEMPTS {
            let row = self.fetch_row(key).await?;
            let metadata = self.fetch_metadata(key).await?;
            match fs::read(self.absolute(&row.payload_path)).await {
                Ok(body) => {
                    return Ok(StoredObject {
                        info: ObjectInfo::from_row(row, metadata),
                        body: Bytes::from(body),
                    });
                }
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            }
        }
        Err(StorageError::ObjectNotFound(key.to_string()))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectInfo> {
        validate_key(key)?;
        let row = self.fetch_row(key).await?;
        let metadata = self.fetch_metadata(key).await?;
        Ok(ObjectInfo::from_row(row, metadata))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM object_metadata WHERE object_key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query_scalar::<_, String>(
            "DELETE FROM objects WHERE key = ? RETURNING payload_path",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        let payload_path = removed.ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;
        self.remove_payload(&payload_path).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let pattern = like_prefix(prefix);
        let rows = sqlx::query_as::<_, ObjectRow>(
            "SELECT key, filename, content_type, size_bytes, etag, uploaded_at, payload_path
             FROM objects WHERE key LIKE ? ESCAPE '\\' ORDER BY key ASC",
        )
        .bind(&pattern)
        .fetch_all(&*self.db)
        .await?;

        let meta_rows = sqlx::query_as::<_, ObjectMetadataRow>(
            "SELECT object_key, name, value FROM object_metadata
             WHERE object_key LIKE ? ESCAPE '\\'",
        )
        .bind(&pattern)
        .fetch_all(&*self.db)
        .await?;
        let mut metadata: HashMap<String, Metadata> = HashMap::new();
        for row in meta_rows {
            metadata
                .entry(row.object_key)
                .or_default()
                .insert(row.name, row.value);
        }

        // LIKE is ASCII case-insensitive in SQLite; keep only exact prefixes.
        Ok(rows
            .into_iter()
            .filter(|row| row.key.starts_with(prefix))
            .map(|row| {
                let meta = metadata.remove(&row.key).unwrap_or_default();
                ObjectInfo::from_row(row, meta)
            })
            .collect())
    }

    /// 1. Runs a lightweight query against SQLite (`SELECT 1`).
    /// 2. Performs a best-effort write/read/delete against `base_path`.
    async fn readiness(&self) -> Vec<ProbeResult> {
        let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => (true, None),
            Ok(v) => (false, Some(format!("unexpected result: {}", v))),
            Err(e) => (false, Some(format!("error: {}", e))),
        };

        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        let disk = match fs::write(&tmp_path, b"readyz").await {
            Ok(_) => match fs::read(&tmp_path).await {
                Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                    Ok(_) => (true, None),
                    Err(e) => (true, Some(format!("could not remove tmp file: {}", e))),
                },
                Ok(_) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some("file content mismatch".to_string()))
                }
                Err(e) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some(format!("could not read tmp file: {}", e)))
                }
            },
            Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
        };

        vec![
            ProbeResult {
                name: "sqlite",
                ok: sqlite.0,
                error: sqlite.1,
            },
            ProbeResult {
                name: "disk",
                ok: disk.0,
                error: disk.1,
            },
        ]
    }
}

/// Turn a literal prefix into a LIKE pattern, escaping `\`, `%` and `_`.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
