//! Defines routes for uploads, conversion and document access.
//!
//! ## Structure
//! - **Probes**
//!   - `GET  /healthz`, `GET /readyz`
//!
//! - **Uploads**
//!   - `POST /upload`      — whole file or one chunk (multipart)
//!   - `POST /upload/init` — reserve an upload key for chunked uploads
//!
//! - **Documents**
//!   - `POST /convert`        — archive → PDF
//!   - `GET  /download?key=`  — fetch a produced document (410 once expired)
//!   - `GET  /list`           — live documents
//!   - `POST /cleanup`        — sweep expired uploads and documents now

use crate::{
    handlers::{
        convert_handlers::{cleanup, convert, download, list_documents},
        health_handlers::{healthz, readyz},
        upload_handlers::{init_upload, upload},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router for every endpoint. The router carries shared state
/// (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // uploads
        .route("/upload", post(upload))
        .route("/upload/init", post(init_upload))
        // documents
        .route("/convert", post(convert))
        .route("/download", get(download))
        .route("/list", get(list_documents))
        .route("/cleanup", post(cleanup))
}

/// The complete application with state and body limit applied.
pub fn app(state: AppState, body_limit: usize) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
