//! chunk-relay — a chunked, resumable multipart upload service.
//!
//! The server half exposes the three-phase upload protocol
//! (`/upload-start`, `/upload-part`, `/upload-complete`) backed by SQLite
//! metadata and on-disk payloads, and serves assembled objects back at
//! `GET /{key}`. The client half (`client`) orchestrates an upload against
//! that protocol with per-part retry, exponential backoff, and timeout
//! enforcement.

pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
