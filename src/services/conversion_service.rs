//! The archive-to-PDF pipeline: fetch, resolve, classify, assemble, store.

use crate::models::{
    artifact::ConversionArtifact,
    metadata::{HAS_BACK_COVER, HAS_FRONT_COVER, Metadata, PAGE_COUNT, SOURCE_KEY},
    upload::{DOCUMENTS_PREFIX, UPLOADS_PREFIX},
};
use crate::services::{
    classifier::{ClassifyError, classify},
    document_assembler::{AssembledDocument, AssemblyError, SkippedPage, assemble},
    lifecycle::{LifecycleError, LifecycleManager},
    password_resolver::{PasswordResolver, ResolveError},
    storage_service::{BlobStore, StorageError},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{info, warn};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
const ARCHIVE_SUFFIXES: [&str; 3] = [".zip", ".uvz", ".cbz"];

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("source `{0}` not found")]
    SourceNotFound(String),
    #[error("source `{key}` expired at {expired_at}")]
    Expired {
        key: String,
        expired_at: DateTime<Utc>,
    },
    #[error("archive is malformed: {0}")]
    ArchiveMalformed(String),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("none of the {} pages could be embedded", .skipped.len())]
    NothingEmbedded { skipped: Vec<SkippedPage> },
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("conversion task failed: {0}")]
    Join(#[from] JoinError),
}

impl From<LifecycleError> for ConvertError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Expired { key, expired_at } => Self::Expired { key, expired_at },
            LifecycleError::Storage(StorageError::ObjectNotFound(key)) => Self::SourceNotFound(key),
            LifecycleError::Storage(err) => Self::Storage(err),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConversionOutcome {
    Converted(ConversionArtifact),
    /// Every password failed; retry with a password from the user.
    NeedsPassword { attempts: usize },
}

/// Result of the CPU-bound stages.
enum Staged {
    Assembled {
        document: AssembledDocument,
        password_used: Option<String>,
        has_front_cover: bool,
        has_back_cover: bool,
    },
    Locked {
        attempts: usize,
    },
}

/// `uploads/x/book.ZIP` becomes `pdfs/x/book.pdf`.
pub fn document_key_for(source_key: &str) -> String {
    let rest = source_key.strip_prefix(UPLOADS_PREFIX).unwrap_or(source_key);
    let lower = rest.to_ascii_lowercase();
    let stem = ARCHIVE_SUFFIXES
        .iter()
        .find(|suffix| lower.ends_with(*suffix))
        .map_or(rest, |suffix| &rest[..rest.len() - suffix.len()]);
    format!("{DOCUMENTS_PREFIX}{stem}.pdf")
}

#[derive(Clone)]
pub struct Converter {
    store: Arc<dyn BlobStore>,
    lifecycle: LifecycleManager,
    resolver: PasswordResolver,
}

impl Converter {
    pub fn new(
        store: Arc<dyn BlobStore>,
        lifecycle: LifecycleManager,
        resolver: PasswordResolver,
    ) -> Self {
        Self {
            store,
            lifecycle,
            resolver,
        }
    }

    /// Convert the upload at `source_key` into a stored PDF.
    ///
    /// Password exhaustion is an outcome, not an error: the caller can
    /// retry with `password` set.
    pub async fn convert(
        &self,
        source_key: &str,
        password: Option<&str>,
    ) -> Result<ConversionOutcome, ConvertError> {
        let started = Instant::now();
        let source = self.lifecycle.fetch_live(source_key).await?;
        info!(
            source_key,
            size = source.info.size_bytes,
            with_password = password.is_some(),
            "converting archive"
        );

        let resolver = self.resolver.clone();
        let password = password.map(str::to_string);
        let staged = tokio::task::spawn_blocking(move || {
            run_stages(&resolver, &source.body, password.as_deref())
        })
        .await??;

        let (document, password_used, has_front_cover, has_back_cover) = match staged {
            Staged::Locked { attempts } => {
                info!(source_key, attempts, "archive needs a manual password");
                return Ok(ConversionOutcome::NeedsPassword { attempts });
            }
            Staged::Assembled {
                document,
                password_used,
                has_front_cover,
                has_back_cover,
            } => (document, password_used, has_front_cover, has_back_cover),
        };

        if document.embedded == 0 {
            warn!(source_key, skipped = document.skipped.len(), "no page could be embedded");
            return Err(ConvertError::NothingEmbedded {
                skipped: document.skipped,
            });
        }

        let key = document_key_for(source_key);
        let mut metadata = Metadata::new();
        let expiry = self.lifecycle.tag_expiry(&mut metadata, Utc::now());
        metadata.insert(PAGE_COUNT.into(), document.embedded.to_string());
        metadata.insert(SOURCE_KEY.into(), source_key.to_string());
        metadata.insert(HAS_FRONT_COVER.into(), has_front_cover.to_string());
        metadata.insert(HAS_BACK_COVER.into(), has_back_cover.to_string());

        let size_bytes = document.bytes.len();
        self.store
            .put(&key, Bytes::from(document.bytes), PDF_CONTENT_TYPE, metadata)
            .await?;

        info!(
            source_key,
            key = %key,
            pages = document.embedded,
            skipped = document.skipped.len(),
            size_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "conversion stored"
        );
        Ok(ConversionOutcome::Converted(ConversionArtifact {
            key,
            source_key: source_key.to_string(),
            page_count: document.embedded,
            skipped_pages: document.skipped.into_iter().map(|s| s.path).collect(),
            password_used,
            has_front_cover,
            has_back_cover,
            size_bytes,
            expiry,
        }))
    }
}

fn run_stages(
    resolver: &PasswordResolver,
    archive: &[u8],
    password: Option<&str>,
) -> Result<Staged, ConvertError> {
    let resolution = match resolver.resolve(archive, password) {
        Ok(resolution) => resolution,
        Err(ResolveError::ArchiveUnreadable { attempts, .. }) => {
            return Ok(Staged::Locked { attempts });
        }
        Err(ResolveError::ArchiveMalformed(reason)) => {
            return Err(ConvertError::ArchiveMalformed(reason));
        }
    };

    let order = classify(resolution.entries)?.into_page_order();
    let has_front_cover = order.has_front_cover();
    let has_back_cover = order.has_back_cover();
    let document = assemble(order)?;
    Ok(Staged::Assembled {
        document,
        password_used: resolution.password_used,
        has_front_cover,
        has_back_cover,
    })
}
