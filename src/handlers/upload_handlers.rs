//! HTTP handlers for the three-phase upload protocol.
//! Part bodies are streamed straight into staging to avoid buffering whole
//! chunks in memory; storage concerns are delegated to `StorageService`.

use crate::{
    errors::AppError,
    models::wire::{
        CompleteRequest, CompleteResponse, PartQuery, PartResponse, StartRequest, StartResponse,
    },
    services::storage_service::StorageService,
};
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
};
use futures::StreamExt;
use std::io;

/// `POST /upload-start` — open a multipart session.
///
/// Returns the opaque upload ID and the confirmed key; the key is
/// authoritative for every later call.
pub async fn start_upload(
    State(service): State<StorageService>,
    Json(req): Json<StartRequest>,
) -> Result<Json<StartResponse>, AppError> {
    let (upload_id, key) = service
        .initiate_multipart(&req.filename, &req.content_type)
        .await?;

    tracing::info!("upload session {} started for {}", upload_id, key);
    Ok(Json(StartResponse { upload_id, key }))
}

/// `POST /upload-part?filename=&uploadId=&partNumber=` — stage one part.
///
/// The chunk is the raw request body (`application/octet-stream`); metadata
/// rides in the query string. Responds with the part's unquoted etag.
pub async fn upload_part(
    State(service): State<StorageService>,
    Query(query): Query<PartQuery>,
    body: Body,
) -> Result<Json<PartResponse>, AppError> {
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));

    let etag = service
        .put_part(&query.upload_id, &query.filename, query.part_number, stream)
        .await?;

    Ok(Json(PartResponse { etag }))
}

/// `POST /upload-complete` — validate the part list and dispatch assembly.
///
/// Answers with the predicted public URL as soon as the list validates;
/// assembly itself runs in the background.
pub async fn complete_upload(
    State(service): State<StorageService>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<CompleteResponse>, AppError> {
    let public_url = service
        .complete_multipart(&req.filename, &req.upload_id, req.parts)
        .await?;

    tracing::info!(
        "upload session {} completing, object will land at {}",
        req.upload_id,
        public_url
    );
    Ok(Json(CompleteResponse { public_url }))
}
