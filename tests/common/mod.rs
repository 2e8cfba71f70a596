#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, header},
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use std::{
    io::{Cursor, Write},
    sync::Arc,
};
use tower::ServiceExt;
use zip::{ZipWriter, unstable::write::FileOptionsExt, write::SimpleFileOptions};
use zip2pdf::{
    routes::routes::app,
    services::{
        archive_codec::ZipCodec,
        password_resolver::{PasswordDictionary, PasswordResolver},
        storage_service::BlobStore,
    },
    state::AppState,
};

pub const BOUNDARY: &str = "zip2pdf-test-boundary";
pub const BODY_LIMIT: usize = 64 * 1024 * 1024;

pub fn state_with(store: Arc<dyn BlobStore>, passwords: &[&str]) -> AppState {
    let dictionary = PasswordDictionary::new(passwords.iter().map(|p| p.to_string()));
    let resolver = PasswordResolver::new(Arc::new(ZipCodec::default()), dictionary);
    AppState::new(store, chrono::Duration::hours(24), resolver)
}

pub fn router(state: AppState) -> Router {
    app(state, BODY_LIMIT)
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([30, 60, 90])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .unwrap();
    buf
}

pub fn zip_archive(entries: &[(&str, Vec<u8>)], password: Option<&str>) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        let options = SimpleFileOptions::default();
        let options = match password {
            Some(pw) => options.with_deprecated_encryption(pw.as_bytes()),
            None => options,
        };
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// `multipart/form-data` request to `uri` with text fields and one file.
pub fn multipart_request(uri: &str, fields: &[(&str, &str)], file: (&str, &[u8])) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        write!(
            body,
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        )
        .unwrap();
    }
    let (file_name, bytes) = file;
    write!(
        body,
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .unwrap();
    body.extend_from_slice(bytes);
    write!(body, "\r\n--{BOUNDARY}--\r\n").unwrap();

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

pub async fn body_bytes(res: Response<Body>) -> Vec<u8> {
    to_bytes(res.into_body(), BODY_LIMIT).await.unwrap().to_vec()
}

pub async fn body_json(res: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(res).await).unwrap()
}

/// Widths of every page's MediaBox, in page order.
pub fn page_widths(pdf: &[u8]) -> Vec<i64> {
    let doc = lopdf::Document::load_mem(pdf).unwrap();
    doc.get_pages()
        .values()
        .map(|id| {
            doc.get_dictionary(*id).unwrap().get(b"MediaBox").unwrap().as_array().unwrap()[2]
                .as_i64()
                .unwrap()
        })
        .collect()
}
