//! Defines routes for the upload protocol and object retrieval.
//!
//! ## Structure
//! - **Upload protocol**
//!   - `POST /upload-start`    — open a multipart session
//!   - `POST /upload-part`     — stage one chunk (raw body, query metadata)
//!   - `POST /upload-complete` — validate parts and dispatch assembly
//!
//! - **Object retrieval**
//!   - `GET  /{*key}` — download an assembled object
//!   - `HEAD /{*key}` — metadata only
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`. The
//! default body limit is raised to cover one full 8 MiB part.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, head_object},
        upload_handlers::{complete_upload, start_upload, upload_part},
    },
    services::storage_service::{MAX_PART_SIZE_BYTES, StorageService},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for all upload and retrieval routes.
///
/// The router carries shared state (`StorageService`) to all handlers.
pub fn routes() -> Router<StorageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // three-phase upload protocol
        .route("/upload-start", post(start_upload))
        .route("/upload-part", post(upload_part))
        .route("/upload-complete", post(complete_upload))
        // assembled objects, served at the predicted public URLs
        .route("/{*key}", get(get_object).head(head_object))
        .layer(DefaultBodyLimit::max(MAX_PART_SIZE_BYTES as usize + 64 * 1024))
}
