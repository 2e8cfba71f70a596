//! Conversion, download, listing and cleanup endpoints.

use crate::{
    errors::AppError,
    handlers::upload_handlers::check_upload_key,
    models::{
        artifact::ConversionArtifact,
        metadata::PAGE_COUNT,
        object::ObjectInfo,
        upload::DOCUMENTS_PREFIX,
    },
    services::{conversion_service::ConversionOutcome, lifecycle::SweepReport},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    #[serde(alias = "fileKey")]
    pub key: String,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedResponse {
    pub success: bool,
    pub pdf_key: String,
    pub pages: usize,
    pub skipped_pages: Vec<String>,
    pub has_password: bool,
    pub password: Option<String>,
    pub has_cover: bool,
    pub has_back_cover: bool,
    pub size: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<ConversionArtifact> for ConvertedResponse {
    fn from(artifact: ConversionArtifact) -> Self {
        Self {
            success: true,
            pdf_key: artifact.key,
            pages: artifact.page_count,
            skipped_pages: artifact.skipped_pages,
            has_password: artifact.password_used.is_some(),
            password: artifact.password_used,
            has_cover: artifact.has_front_cover,
            has_back_cover: artifact.has_back_cover,
            size: artifact.size_bytes,
            created_at: artifact.expiry.created_at,
            expires_at: artifact.expiry.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NeedsPasswordResponse {
    pub success: bool,
    pub needs_manual_password: bool,
    pub tried: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ConvertResponse {
    Converted(ConvertedResponse),
    NeedsPassword(NeedsPasswordResponse),
}

/// `POST /convert`
///
/// An exhausted password search is answered with 200 and
/// `needsManualPassword`, so the client can prompt and resend with
/// `password` set.
pub async fn convert(
    State(state): State<AppState>,
    Json(req): Json<ConvertRequest>,
) -> Result<Json<ConvertResponse>, AppError> {
    check_upload_key(&req.key)?;

    let password = req.password.as_deref().filter(|p| !p.trim().is_empty());
    let response = match state.converter.convert(&req.key, password).await? {
        ConversionOutcome::Converted(artifact) => ConvertResponse::Converted(artifact.into()),
        ConversionOutcome::NeedsPassword { attempts } => {
            ConvertResponse::NeedsPassword(NeedsPasswordResponse {
                success: false,
                needs_manual_password: true,
                tried: attempts,
                message: "archive is encrypted and no known password opened it".into(),
            })
        }
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub key: String,
}

/// `GET /download?key=pdfs/...`
///
/// Expired documents are deleted and answered with `410 Gone`.
pub async fn download(
    State(state): State<AppState>,
    Query(q): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    if !q.key.starts_with(DOCUMENTS_PREFIX) {
        return Err(AppError::bad_request(format!(
            "downloads must be under `{DOCUMENTS_PREFIX}`"
        )));
    }

    let object = state.lifecycle.fetch_live(&q.key).await?;
    let mut response = Response::new(Body::from(object.body));
    *response.status_mut() = StatusCode::OK;
    set_document_headers(response.headers_mut(), &object.info);
    Ok(response)
}

fn set_document_headers(headers: &mut HeaderMap, info: &ObjectInfo) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&info.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&info.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    let quoted = format!("\"{}\"", info.etag);
    if let Ok(value) = HeaderValue::from_str(&quoted) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&info.uploaded_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    let filename: String = info
        .filename
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && *c != '"' && *c != '\\')
        .collect();
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEntry {
    pub key: String,
    pub filename: String,
    pub size: i64,
    pub uploaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub documents: Vec<DocumentEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// `GET /list?limit=&cursor=`
///
/// Live documents in key order. `cursor` is the opaque `nextCursor` of the
/// previous page.
pub async fn list_documents(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let after = q.cursor.as_deref().map(decode_cursor).transpose()?;
    let now = Utc::now();

    let mut live = state
        .store
        .list(DOCUMENTS_PREFIX)
        .await?
        .into_iter()
        .filter(|info| after.as_deref().is_none_or(|after| info.key.as_str() > after))
        .filter(|info| !state.lifecycle.is_expired(info, now));

    let documents: Vec<DocumentEntry> = live
        .by_ref()
        .take(limit)
        .map(|info| DocumentEntry {
            expires_at: state.lifecycle.expiry_of(&info),
            page_count: info.metadata.get(PAGE_COUNT).and_then(|v| v.parse().ok()),
            key: info.key,
            filename: info.filename,
            size: info.size_bytes,
            uploaded_at: info.uploaded_at,
        })
        .collect();

    let next_cursor = match (live.next(), documents.last()) {
        (Some(_), Some(last)) => Some(encode_cursor(&last.key)),
        _ => None,
    };
    Ok(Json(ListResponse {
        documents,
        next_cursor,
    }))
}

/// `POST /cleanup`: run one sweep now.
pub async fn cleanup(State(state): State<AppState>) -> impl IntoResponse {
    Json::<SweepReport>(state.lifecycle.sweep().await)
}

fn encode_cursor(key: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(key)
}

fn decode_cursor(cursor: &str) -> Result<String, AppError> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AppError::bad_request("invalid cursor"))
}
