//! Represents an assembled object stored by the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A fully assembled object, addressed by its key.
///
/// The struct stores metadata only; payload bytes live on disk under the
/// service's sharded storage tree.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Object key (path-like identifier, also the public URL suffix).
    pub key: String,

    /// Original filename of the uploaded file.
    pub filename: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the assembled payload.
    pub etag: Option<String>,

    /// Timestamp when the object was assembled.
    pub last_modified: DateTime<Utc>,
}
