//! Upload endpoints: whole files and chunked parts.

use crate::{
    errors::AppError,
    models::{
        object::filename_of,
        upload::{UPLOADS_PREFIX, new_upload_key},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, State},
};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_FILE_NAME: &str = "upload.zip";

/// Fields accepted by `POST /upload`.
#[derive(Debug, Default)]
struct UploadForm {
    file: Option<Bytes>,
    /// Filename sent with the `file` part itself.
    part_name: Option<String>,
    file_key: Option<String>,
    chunk_index: Option<u32>,
    total_chunks: Option<u32>,
    file_name: Option<String>,
}

impl UploadForm {
    async fn read(multipart: &mut Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    form.part_name = field.file_name().map(str::to_string);
                    form.file = Some(field.bytes().await?);
                }
                "fileKey" => form.file_key = non_empty(field.text().await?),
                "fileName" => form.file_name = non_empty(field.text().await?),
                "chunkIndex" => form.chunk_index = Some(parse_number(&name, &field.text().await?)?),
                "totalChunks" => {
                    form.total_chunks = Some(parse_number(&name, &field.text().await?)?)
                }
                other => debug!(field = other, "ignoring unknown upload field"),
            }
        }
        Ok(form)
    }
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_number(field: &str, raw: &str) -> Result<u32, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid `{field}` value `{raw}`")))
}

/// Caller-supplied keys must name a whole upload, never a chunk part.
pub(crate) fn check_upload_key(key: &str) -> Result<(), AppError> {
    if !key.starts_with(UPLOADS_PREFIX) || key.len() == UPLOADS_PREFIX.len() {
        return Err(AppError::bad_request(format!(
            "upload keys must start with `{UPLOADS_PREFIX}`"
        )));
    }
    let names_chunk = key
        .rsplit_once(".chunk.")
        .is_some_and(|(_, index)| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()));
    if names_chunk {
        return Err(AppError::bad_request("upload keys cannot name a chunk part"));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub key: String,
    pub filename: String,
    /// Merged size once complete, otherwise the size of this part.
    pub size: i64,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<usize>,
}

/// `POST /upload`
///
/// Without chunk fields (or with `totalChunks = 1`) the file is stored
/// directly. Otherwise the part is stored and the upload merged once every
/// part is present; the response says whether that happened.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let form = UploadForm::read(&mut multipart).await?;
    let body = form
        .file
        .ok_or_else(|| AppError::bad_request("missing `file` field"))?;
    let total_chunks = form.total_chunks.unwrap_or(1);
    let chunk_index = form.chunk_index.unwrap_or(0);

    let key = match form.file_key {
        Some(key) => {
            check_upload_key(&key)?;
            key
        }
        None => {
            let name = form
                .file_name
                .or(form.part_name)
                .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
            new_upload_key(&name, Utc::now())
        }
    };

    let part_size = body.len() as i64;
    let receipt = state
        .reassembler
        .receive_chunk(&key, chunk_index, total_chunks, body)
        .await?;

    let chunked = total_chunks > 1;
    Ok(Json(UploadResponse {
        success: true,
        filename: filename_of(&key).to_string(),
        size: receipt.size.unwrap_or(part_size),
        complete: receipt.complete,
        chunk_index: chunked.then_some(chunk_index),
        total_chunks: chunked.then_some(total_chunks),
        received: chunked.then_some(receipt.received),
        key,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitUploadResponse {
    pub key: String,
}

/// `POST /upload/init`
///
/// Reserve a key so every part of a chunked upload, the first one
/// included, can be sent concurrently.
pub async fn init_upload(Json(req): Json<InitUploadRequest>) -> Json<InitUploadResponse> {
    let name = req
        .file_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_FILE_NAME);
    Json(InitUploadResponse {
        key: new_upload_key(name, Utc::now()),
    })
}
