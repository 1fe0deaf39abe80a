//! HTTP handlers serving assembled objects.
//! Streams object bodies from disk and delegates storage concerns to
//! `StorageService`. These routes back the public URLs predicted by
//! `/upload-complete` — an object 404s here until background assembly lands.

use crate::{
    errors::AppError, models::object::StoredObject, services::storage_service::StorageService,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;

/// Download an object `/{*key}` as a streaming response.
pub async fn get_object(
    State(service): State<StorageService>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let (meta, file) = service.get_object_reader(&key).await?;
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);

    Ok(response)
}

/// HEAD `/{*key}` — same headers as GET but no body.
pub async fn head_object(
    State(service): State<StorageService>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let meta = service.get_object_metadata(&key).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);

    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    let length = meta.size_bytes.max(0);
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&length.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    if let Some(etag) = meta.etag.as_ref() {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_str(&meta.last_modified.to_rfc2822())
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
}
