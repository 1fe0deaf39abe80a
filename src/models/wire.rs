//! Request/response bodies for the three-phase upload protocol.
//!
//! Shared between the axum handlers and the upload client so both sides of
//! the wire contract stay in lockstep. Field names follow the protocol's
//! camelCase (and the S3-style `PartNumber`/`ETag` casing for parts).

use serde::{Deserialize, Serialize};

/// Body of `POST /upload-start`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StartRequest {
    pub filename: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
}

/// Successful response of `POST /upload-start`.
///
/// `key` is authoritative: the server may normalize the requested filename,
/// and every later call must use this value.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StartResponse {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    pub key: String,
}

/// Query parameters of `POST /upload-part`.
///
/// The chunk itself travels as the raw request body, so everything else is
/// carried in the query string.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PartQuery {
    pub filename: String,
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(rename = "partNumber")]
    pub part_number: i64,
}

/// Successful response of `POST /upload-part`. The etag carries no quotes.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PartResponse {
    pub etag: String,
}

/// One entry of the part list submitted to `/upload-complete`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: i64,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Body of `POST /upload-complete`. `filename` is the server-confirmed key.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CompleteRequest {
    pub filename: String,
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
}

/// Successful response of `POST /upload-complete`.
///
/// Returned optimistically: assembly runs in the background, and the URL
/// becomes readable once it lands.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CompleteResponse {
    #[serde(rename = "publicUrl")]
    pub public_url: String,
}
