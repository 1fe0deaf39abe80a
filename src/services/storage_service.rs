//! src/services/storage_service.rs
//!
//! StorageService — the multipart storage backend behind the three-phase
//! upload protocol. SQLite holds session, part, and object metadata; payloads
//! live on local disk. Incoming parts are staged beneath
//! `base_path/.multipart/{upload_id}/` and assembled objects are sharded
//! beneath `base_path/objects/{shard}/{shard}/{key}`.

use crate::models::{
    multipart::{UploadPart, UploadSession},
    object::StoredObject,
    wire::CompletedPart,
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("filename and contentType are required")]
    MissingFields,
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("upload session `{0}` not found")]
    SessionNotFound(String),
    #[error("upload session `{0}` is already completed")]
    SessionCompleted(String),
    #[error("invalid part number {0}")]
    InvalidPartNumber(i64),
    #[error("part exceeds the maximum size of {max} bytes")]
    PartTooLarge { max: i64 },
    #[error("invalid part list: {0}")]
    InvalidPartList(String),
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Upper bound on a single part's payload. Matches the client's chunk size.
pub const MAX_PART_SIZE_BYTES: i64 = 8 * 1024 * 1024;

/// StorageService provides the multipart upload operations:
/// - Initiate a session (insert metadata, create the part staging directory)
/// - Put a part (stream bytes to staging, record size + etag)
/// - Complete (validate the part list, assemble in the background, predict
///   the public URL)
/// - Read an assembled object (metadata from SQLite, payload from disk)
///
/// Completion is fire-and-forget: the HTTP handler answers as soon as the
/// part list validates, and a spawned task stitches the parts afterwards.
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where staging and object payloads are stored.
    pub base_path: PathBuf,

    /// Prefix for public object URLs (`{public_base_url}/{key}`).
    pub public_base_url: String,
}

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool, using
    /// `base_path` as the root directory for payloads.
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys that begin with `/` or contain `..`. This is intentionally
    /// simple — you should replace it with a more robust sanitizer if you
    /// accept untrusted keys.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(key) and returns the first two bytes as lowercase hexadecimal
    /// strings (00–ff). Reduces file count per directory.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Construct a fully-qualified object payload path.
    ///
    /// Combines base_path/objects/{shard}/{shard}/{key}.
    /// Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push("objects");
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Staging directory holding the parts of one in-flight session.
    fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.base_path.join(".multipart").join(upload_id)
    }

    /// On-disk path of one staged part.
    fn part_path(&self, upload_id: &str, part_number: i64) -> PathBuf {
        self.staging_dir(upload_id)
            .join(format!("{:05}.part", part_number))
    }

    /// Build the public URL an assembled object will be readable at.
    ///
    /// Deterministic from base URL + key, which is what allows the complete
    /// handler to answer before assembly finishes.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    /// Fetch a session by its opaque upload ID.
    ///
    /// Returns SessionNotFound if missing.
    async fn fetch_session(&self, upload_id: &str) -> StorageResult<UploadSession> {
        sqlx::query_as::<_, UploadSession>(
            "SELECT id, upload_id, key, content_type, initiated_at, completed
             FROM upload_sessions WHERE upload_id = ?",
        )
        .bind(upload_id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::SessionNotFound(upload_id.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Fetch an open (not yet completed) session, verifying the caller's key
    /// matches the one confirmed at initiate.
    async fn fetch_open_session(&self, upload_id: &str, key: &str) -> StorageResult<UploadSession> {
        let session = self.fetch_session(upload_id).await?;
        if session.completed {
            return Err(StorageError::SessionCompleted(upload_id.to_string()));
        }
        if session.key != key {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(session)
    }

    /// Initiate a multipart session.
    ///
    /// Validates the key, inserts the session row, and creates the staging
    /// directory. Returns the opaque upload ID and the confirmed key — the
    /// key is authoritative for every later call.
    pub async fn initiate_multipart(
        &self,
        filename: &str,
        content_type: &str,
    ) -> StorageResult<(String, String)> {
        if filename.is_empty() || content_type.is_empty() {
            return Err(StorageError::MissingFields);
        }
        self.ensure_key_safe(filename)?;

        let upload_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO upload_sessions (id, upload_id, key, content_type, initiated_at, completed)
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(Uuid::new_v4())
        .bind(&upload_id)
        .bind(filename)
        .bind(content_type)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        fs::create_dir_all(self.staging_dir(&upload_id)).await?;

        debug!("initiated multipart session {} for {}", upload_id, filename);
        Ok((upload_id, filename.to_string()))
    }

    /// Stream one part's payload into staging and record its metadata.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming, enforcing the part cap.
    /// - Atomically renames into the staged part location.
    /// - Upserts the part row, so a retried part replaces the earlier copy
    ///   instead of duplicating it.
    ///
    /// Returns the part's etag without surrounding quotes.
    pub async fn put_part<S>(
        &self,
        upload_id: &str,
        key: &str,
        part_number: i64,
        stream: S,
    ) -> StorageResult<String>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        if part_number < 1 {
            return Err(StorageError::InvalidPartNumber(part_number));
        }
        self.fetch_open_session(upload_id, key).await?;

        let staging = self.staging_dir(upload_id);
        fs::create_dir_all(&staging).await?;
        let tmp_path = staging.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            if size_bytes > MAX_PART_SIZE_BYTES {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::PartTooLarge {
                    max: MAX_PART_SIZE_BYTES,
                });
            }
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let part_path = self.part_path(upload_id, part_number);
        if let Err(err) = fs::rename(&tmp_path, &part_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&part_path).await?;
                fs::rename(&tmp_path, &part_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let etag = format!("{:x}", digest.compute());
        sqlx::query(
            "INSERT INTO upload_parts (id, upload_id, part_number, size_bytes, etag, uploaded_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(upload_id, part_number) DO UPDATE SET
                 size_bytes = excluded.size_bytes,
                 etag = excluded.etag,
                 uploaded_at = excluded.uploaded_at",
        )
        .bind(Uuid::new_v4())
        .bind(upload_id)
        .bind(part_number)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        debug!(
            "staged part {} of session {} ({} bytes, etag {})",
            part_number, upload_id, size_bytes, etag
        );
        Ok(etag)
    }

    /// Validate a submitted part list and dispatch background assembly.
    ///
    /// The supplied parts are sorted ascending and their etags stripped of
    /// quotes before being checked against the staged rows: the list must be
    /// contiguous 1..=n, exactly match the staged count, and every etag must
    /// agree. On success the assembly task is spawned fire-and-forget and the
    /// predicted public URL is returned immediately — callers must not assume
    /// the object is readable the instant this returns.
    pub async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<String> {
        let session = self.fetch_open_session(upload_id, key).await?;

        let parts = normalize_part_list(parts);
        let staged = self.fetch_parts(upload_id).await?;

        if parts.is_empty() {
            return Err(StorageError::InvalidPartList("no parts submitted".into()));
        }
        if parts.len() != staged.len() {
            return Err(StorageError::InvalidPartList(format!(
                "{} parts submitted but {} staged",
                parts.len(),
                staged.len()
            )));
        }
        for (idx, (submitted, stored)) in parts.iter().zip(staged.iter()).enumerate() {
            let expected = idx as i64 + 1;
            if submitted.part_number != expected || stored.part_number != expected {
                return Err(StorageError::InvalidPartList(format!(
                    "part numbering is not contiguous at position {}",
                    expected
                )));
            }
            if submitted.etag != stored.etag {
                return Err(StorageError::InvalidPartList(format!(
                    "etag mismatch for part {}",
                    expected
                )));
            }
        }

        // Fire-and-forget: the handler answers now, assembly lands later.
        let service = self.clone();
        tokio::spawn(async move {
            let upload_id = session.upload_id.clone();
            if let Err(err) = service.assemble(session, staged).await {
                tracing::error!("background assembly of session {} failed: {}", upload_id, err);
            }
        });

        Ok(self.public_url(key))
    }

    /// Fetch the staged part rows of a session, ordered by part number.
    async fn fetch_parts(&self, upload_id: &str) -> StorageResult<Vec<UploadPart>> {
        Ok(sqlx::query_as::<_, UploadPart>(
            "SELECT id, upload_id, part_number, size_bytes, etag, uploaded_at
             FROM upload_parts WHERE upload_id = ?
             ORDER BY part_number ASC",
        )
        .bind(upload_id)
        .fetch_all(&*self.db)
        .await?)
    }

    /// Concatenate staged parts into the final object.
    ///
    /// Streams each part file into a temporary file in part-number order,
    /// computing the whole-object MD5 on the way, then fsyncs and atomically
    /// renames into the sharded location, upserts the object row, marks the
    /// session completed, and removes the staging directory.
    async fn assemble(
        &self,
        session: UploadSession,
        parts: Vec<UploadPart>,
    ) -> StorageResult<StoredObject> {
        let file_path = self.object_path(&session.key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut out = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        let mut buf = vec![0u8; 64 * 1024];
        for part in &parts {
            let part_path = self.part_path(&session.upload_id, part.part_number);
            let mut src = match File::open(&part_path).await {
                Ok(file) => file,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            loop {
                let n = match src.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) => {
                        let _ = fs::remove_file(&tmp_path).await;
                        return Err(StorageError::Io(err));
                    }
                };
                size_bytes += n as i64;
                digest.consume(&buf[..n]);
                if let Err(err) = out.write_all(&buf[..n]).await {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            }
        }
        if let Err(err) = out.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = out.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let filename = session
            .key
            .split('/')
            .next_back()
            .unwrap_or(&session.key)
            .to_string();
        let etag = format!("{:x}", digest.compute());

        let object = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (
                id, key, filename, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, key, filename, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&session.key)
        .bind(&filename)
        .bind(Some(session.content_type.clone()))
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        sqlx::query("UPDATE upload_sessions SET completed = 1 WHERE upload_id = ?")
            .bind(&session.upload_id)
            .execute(&*self.db)
            .await?;
        sqlx::query("DELETE FROM upload_parts WHERE upload_id = ?")
            .bind(&session.upload_id)
            .execute(&*self.db)
            .await?;
        if let Err(err) = fs::remove_dir_all(self.staging_dir(&session.upload_id)).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "failed to remove staging for session {}: {}",
                    session.upload_id, err
                );
            }
        }

        debug!(
            "assembled {} ({} bytes, {} parts) for session {}",
            session.key,
            size_bytes,
            parts.len(),
            session.upload_id
        );
        Ok(object)
    }

    /// Fetch an object for reading.
    ///
    /// Returns metadata and an opened File handle ready for streaming out.
    /// Returns ObjectNotFound if metadata exists but physical file is missing.
    pub async fn get_object_reader(&self, key: &str) -> StorageResult<(StoredObject, File)> {
        let object = self.get_object_metadata(key).await?;

        let file_path = self.object_path(key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::ObjectNotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Fetch only object metadata.
    pub async fn get_object_metadata(&self, key: &str) -> StorageResult<StoredObject> {
        self.ensure_key_safe(key)?;
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, key, filename, content_type, size_bytes, etag, last_modified
             FROM objects WHERE key = ?",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound(key.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Delete incomplete sessions older than `max_age` and their staging.
    ///
    /// Completed sessions are kept — their staging is removed at assembly
    /// time. Returns the number of sessions swept.
    pub async fn sweep_stale_sessions(&self, max_age: chrono::Duration) -> StorageResult<u64> {
        let cutoff = Utc::now() - max_age;
        let stale = sqlx::query_as::<_, UploadSession>(
            "SELECT id, upload_id, key, content_type, initiated_at, completed
             FROM upload_sessions WHERE completed = 0 AND initiated_at < ?",
        )
        .bind(cutoff)
        .fetch_all(&*self.db)
        .await?;

        let mut swept = 0u64;
        for session in stale {
            sqlx::query("DELETE FROM upload_parts WHERE upload_id = ?")
                .bind(&session.upload_id)
                .execute(&*self.db)
                .await?;
            sqlx::query("DELETE FROM upload_sessions WHERE upload_id = ?")
                .bind(&session.upload_id)
                .execute(&*self.db)
                .await?;
            if let Err(err) = fs::remove_dir_all(self.staging_dir(&session.upload_id)).await {
                if err.kind() != ErrorKind::NotFound {
                    debug!(
                        "failed to remove staging for stale session {}: {}",
                        session.upload_id, err
                    );
                }
            }
            debug!(
                "swept stale session {} for key {}",
                session.upload_id, session.key
            );
            swept += 1;
        }

        Ok(swept)
    }
}

/// Sort a submitted part list ascending and strip etag quotes.
///
/// The object-store contract requires parts presented in ascending order with
/// unquoted etags; sorting here keeps the contract independent of whatever
/// order a (possibly concurrent) client collected them in.
fn normalize_part_list(mut parts: Vec<CompletedPart>) -> Vec<CompletedPart> {
    parts.sort_by_key(|p| p.part_number);
    for part in &mut parts {
        part.etag = part.etag.replace('"', "");
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn service() -> (StorageService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("meta.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let db = Arc::new(
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect(&url)
                .await
                .unwrap(),
        );
        crate::db::apply_migrations(&db).await.unwrap();
        let svc = StorageService::new(db, dir.path().join("store"), "http://files.test");
        (svc, dir)
    }

    fn one_chunk(data: Vec<u8>) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        futures::stream::iter(vec![Ok(Bytes::from(data))])
    }

    async fn wait_for_object(svc: &StorageService, key: &str) -> StoredObject {
        for _ in 0..500 {
            if let Ok(object) = svc.get_object_metadata(key).await {
                return object;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("object {} never appeared", key);
    }

    #[tokio::test]
    async fn initiate_put_complete_assembles_object() {
        let (svc, _dir) = service().await;
        let (upload_id, key) = svc
            .initiate_multipart("photos/a.bin", "application/octet-stream")
            .await
            .unwrap();
        assert_eq!(key, "photos/a.bin");

        let etag1 = svc
            .put_part(&upload_id, &key, 1, one_chunk(b"hello ".to_vec()))
            .await
            .unwrap();
        let etag2 = svc
            .put_part(&upload_id, &key, 2, one_chunk(b"world".to_vec()))
            .await
            .unwrap();
        assert!(!etag1.contains('"'));

        // Quoted, out-of-order input exercises the normalization path.
        let url = svc
            .complete_multipart(
                &key,
                &upload_id,
                vec![
                    CompletedPart {
                        part_number: 2,
                        etag: format!("\"{}\"", etag2),
                    },
                    CompletedPart {
                        part_number: 1,
                        etag: etag1.clone(),
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(url, "http://files.test/photos/a.bin");

        let object = wait_for_object(&svc, &key).await;
        assert_eq!(object.size_bytes, 11);
        assert_eq!(object.filename, "a.bin");

        let (_, mut file) = svc.get_object_reader(&key).await.unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"hello world");

        let session = svc.fetch_session(&upload_id).await.unwrap();
        assert!(session.completed);
        assert!(svc.fetch_parts(&upload_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_upload_id_is_not_found() {
        let (svc, _dir) = service().await;
        let err = svc
            .put_part("missing", "a.bin", 1, one_chunk(b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn initiate_rejects_bad_input() {
        let (svc, _dir) = service().await;
        assert!(matches!(
            svc.initiate_multipart("", "text/plain").await.unwrap_err(),
            StorageError::MissingFields
        ));
        assert!(matches!(
            svc.initiate_multipart("../etc/passwd", "text/plain")
                .await
                .unwrap_err(),
            StorageError::InvalidObjectKey
        ));
    }

    #[tokio::test]
    async fn complete_rejects_gaps_and_count_mismatch() {
        let (svc, _dir) = service().await;
        let (upload_id, key) = svc.initiate_multipart("b.bin", "text/plain").await.unwrap();
        let etag1 = svc
            .put_part(&upload_id, &key, 1, one_chunk(b"a".to_vec()))
            .await
            .unwrap();
        let etag2 = svc
            .put_part(&upload_id, &key, 2, one_chunk(b"b".to_vec()))
            .await
            .unwrap();

        let err = svc
            .complete_multipart(
                &key,
                &upload_id,
                vec![CompletedPart {
                    part_number: 1,
                    etag: etag1.clone(),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPartList(_)));

        let err = svc
            .complete_multipart(
                &key,
                &upload_id,
                vec![
                    CompletedPart {
                        part_number: 1,
                        etag: etag1,
                    },
                    CompletedPart {
                        part_number: 3,
                        etag: etag2,
                    },
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPartList(_)));
    }

    #[tokio::test]
    async fn complete_rejects_etag_mismatch() {
        let (svc, _dir) = service().await;
        let (upload_id, key) = svc.initiate_multipart("c.bin", "text/plain").await.unwrap();
        svc.put_part(&upload_id, &key, 1, one_chunk(b"a".to_vec()))
            .await
            .unwrap();

        let err = svc
            .complete_multipart(
                &key,
                &upload_id,
                vec![CompletedPart {
                    part_number: 1,
                    etag: "deadbeef".into(),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPartList(_)));
    }

    #[tokio::test]
    async fn reuploaded_part_replaces_earlier_copy() {
        let (svc, _dir) = service().await;
        let (upload_id, key) = svc.initiate_multipart("d.bin", "text/plain").await.unwrap();
        svc.put_part(&upload_id, &key, 1, one_chunk(b"first".to_vec()))
            .await
            .unwrap();
        let second = svc
            .put_part(&upload_id, &key, 1, one_chunk(b"second!".to_vec()))
            .await
            .unwrap();

        let parts = svc.fetch_parts(&upload_id).await.unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].etag, second);
        assert_eq!(parts[0].size_bytes, 7);
    }

    #[tokio::test]
    async fn oversized_part_is_rejected() {
        let (svc, _dir) = service().await;
        let (upload_id, key) = svc.initiate_multipart("e.bin", "text/plain").await.unwrap();
        let err = svc
            .put_part(
                &upload_id,
                &key,
                1,
                one_chunk(vec![0u8; (MAX_PART_SIZE_BYTES + 1) as usize]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PartTooLarge { .. }));
    }

    #[tokio::test]
    async fn sweep_removes_stale_incomplete_sessions() {
        let (svc, _dir) = service().await;
        let (upload_id, key) = svc.initiate_multipart("f.bin", "text/plain").await.unwrap();
        svc.put_part(&upload_id, &key, 1, one_chunk(b"x".to_vec()))
            .await
            .unwrap();

        sqlx::query("UPDATE upload_sessions SET initiated_at = ? WHERE upload_id = ?")
            .bind(Utc::now() - chrono::Duration::hours(48))
            .bind(&upload_id)
            .execute(&*svc.db)
            .await
            .unwrap();

        let swept = svc
            .sweep_stale_sessions(chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(swept, 1);
        assert!(matches!(
            svc.fetch_session(&upload_id).await.unwrap_err(),
            StorageError::SessionNotFound(_)
        ));
        assert!(!svc.staging_dir(&upload_id).exists());
    }

    #[test]
    fn normalize_sorts_and_strips_quotes() {
        let parts = normalize_part_list(vec![
            CompletedPart {
                part_number: 2,
                etag: "\"bbb\"".into(),
            },
            CompletedPart {
                part_number: 1,
                etag: "aaa".into(),
            },
        ]);
        assert_eq!(parts[0].part_number, 1);
        assert_eq!(parts[1].etag, "bbb");
    }
}
