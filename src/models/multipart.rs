//! Represents multipart upload sessions and parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A multipart upload session, initiated before uploading a file in parts.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadSession {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Opaque upload ID handed to the client on initiate and quoted back on
    /// every part and complete call.
    pub upload_id: String,

    /// Object key being uploaded.
    pub key: String,

    /// Content type declared at initiate, applied to the assembled object.
    pub content_type: String,

    /// Timestamp when upload was initiated.
    pub initiated_at: DateTime<Utc>,

    /// Whether upload has been completed successfully.
    pub completed: bool,
}

/// Represents a single uploaded part in a multipart upload session.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadPart {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Reference to the parent session's upload ID.
    pub upload_id: String,

    /// Part number (1-based).
    pub part_number: i64,

    /// Size in bytes.
    pub size_bytes: i64,

    /// ETag hash for this part, stored without surrounding quotes.
    pub etag: String,

    /// Timestamp when this part was uploaded.
    pub uploaded_at: DateTime<Utc>,
}
