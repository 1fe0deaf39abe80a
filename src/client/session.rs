//! End-to-end upload orchestration: start → parts → complete.
//!
//! Parts run strictly sequentially; that trades throughput for one retry
//! state machine at a time. The completion list is still sorted defensively
//! so a concurrent variant of the part phase would not change this code.

use super::{
    ClientConfig, EventSink, UploadEvent,
    chunk::{chunk_spans, num_chunks},
    diagnostics::{DiagnosticsReporter, UploadDiagnostics},
    error::{UploadError, UploadStage},
    part::{PartUploader, send_with_timers, strip_etag_quotes},
};
use crate::models::wire::{
    CompleteRequest, CompleteResponse, CompletedPart, StartRequest, StartResponse,
};
use bytes::Bytes;
use std::{io::SeekFrom, path::Path, time::Instant};
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt},
    sync::mpsc::UnboundedSender,
};

/// Handle to one initiated multipart session.
///
/// `key` is the server-confirmed object key: the server may normalize the
/// requested filename, and every later call must use this value. One handle
/// is scoped to exactly one session and never reused.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub upload_id: String,
    pub key: String,
}

/// Uploads files through the chunked multipart protocol.
pub struct UploadClient {
    http: reqwest::Client,
    config: ClientConfig,
    diagnostics: DiagnosticsReporter,
}

impl UploadClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            diagnostics: DiagnosticsReporter::disabled(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsReporter) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Upload the file at `path` under `object_key` and return the public
    /// URL the assembled object will be readable at.
    ///
    /// Progress and connection-state events are emitted on `events`; the
    /// terminal outcome is this function's return value. Note the returned
    /// URL is a prediction — assembly finishes asynchronously server-side.
    pub async fn upload_file(
        &self,
        path: &Path,
        object_key: &str,
        content_type: &str,
        events: UnboundedSender<UploadEvent>,
    ) -> Result<String, UploadError> {
        let events = EventSink::new(events);
        let started = Instant::now();

        let metadata = tokio::fs::metadata(path).await.map_err(|err| {
            UploadError::fatal(
                UploadStage::Start,
                "Could not read the file to upload.",
                format!("failed to stat {}: {}", path.display(), err),
            )
        })?;
        let file_size = metadata.len();
        if file_size == 0 {
            return Err(UploadError::fatal(
                UploadStage::Start,
                "Cannot upload an empty file.",
                format!("{} is empty", path.display()),
            ));
        }

        let run = SessionRun {
            http: &self.http,
            config: &self.config,
            diagnostics: &self.diagnostics,
            events: &events,
            object_key,
            content_type,
            file_size,
            total_parts: num_chunks(file_size, self.config.chunk_size),
            started,
        };
        run.execute(path).await
    }
}

/// Context of one upload in flight.
struct SessionRun<'a> {
    http: &'a reqwest::Client,
    config: &'a ClientConfig,
    diagnostics: &'a DiagnosticsReporter,
    events: &'a EventSink,
    object_key: &'a str,
    content_type: &'a str,
    file_size: u64,
    total_parts: u64,
    started: Instant,
}

impl SessionRun<'_> {
    async fn execute(&self, path: &Path) -> Result<String, UploadError> {
        tracing::info!(
            "upload of {} started: {} bytes in {} parts",
            self.object_key,
            self.file_size,
            self.total_parts
        );

        // Phase 1 — initiate. No retries here: if the backend is unreachable
        // before any state exists, the session simply fails.
        let handle = self.start_session().await?;
        self.events.progress(1);

        // Phase 2 — parts, strictly sequential.
        let parts = self.upload_parts(path, &handle).await?;
        self.events.retrying(false);

        // Phase 3 — complete.
        let public_url = self.complete_session(&handle, parts).await?;
        tracing::info!(
            "upload of {} completed in {}ms",
            self.object_key,
            self.started.elapsed().as_millis()
        );
        Ok(public_url)
    }

    async fn start_session(&self) -> Result<SessionHandle, UploadError> {
        let request = self
            .http
            .post(format!("{}/upload-start", self.config.base_url))
            .json(&StartRequest {
                filename: self.object_key.to_string(),
                content_type: self.content_type.to_string(),
            });

        let response =
            match send_with_timers(request, self.config.warning_pending, None, self.events).await {
                Ok(response) => {
                    self.events.retrying(false);
                    response
                }
                Err(err) => {
                    let log = format!("network error during upload-start: {}", err);
                    self.report(UploadStage::Network, &log);
                    return Err(UploadError::transient(
                        UploadStage::Network,
                        "Could not reach the server to begin the upload. \
                         Check your connection.",
                        log,
                    ));
                }
            };

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            let log = format!("server error during upload-start: {} - {}", status, detail);
            self.report(UploadStage::Start, &log);
            return Err(UploadError::transient(
                UploadStage::Start,
                "The server could not prepare storage for the file. \
                 Please try again later.",
                log,
            ));
        }

        let body: StartResponse = response.json().await.map_err(|err| {
            UploadError::transient(
                UploadStage::Start,
                "The server gave an unexpected answer when starting the upload.",
                format!("could not parse upload-start response: {}", err),
            )
        })?;

        Ok(SessionHandle {
            upload_id: body.upload_id,
            key: body.key,
        })
    }

    async fn upload_parts(
        &self,
        path: &Path,
        handle: &SessionHandle,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let uploader = PartUploader {
            http: self.http,
            config: self.config,
            events: self.events,
            diagnostics: self.diagnostics,
            file_name: self.object_key,
            file_size: self.file_size,
            content_type: self.content_type,
            started: self.started,
        };

        let mut file = tokio::fs::File::open(path).await.map_err(|err| {
            UploadError::fatal(
                UploadStage::Part,
                "Could not read the file to upload.",
                format!("failed to open {}: {}", path.display(), err),
            )
        })?;

        let mut parts = Vec::with_capacity(self.total_parts as usize);
        for span in chunk_spans(self.file_size, self.config.chunk_size) {
            let part_number = span.index as i64 + 1;

            let mut buf = vec![0u8; span.len as usize];
            file.seek(SeekFrom::Start(span.offset)).await.map_err(|err| {
                self.chunk_read_error(part_number, err)
            })?;
            file.read_exact(&mut buf)
                .await
                .map_err(|err| self.chunk_read_error(part_number, err))?;

            let part = uploader
                .upload(handle, part_number, self.total_parts, Bytes::from(buf))
                .await?;
            parts.push(part);
            self.events
                .progress(progress_pct(part_number as u64, self.total_parts));
        }

        Ok(parts)
    }

    async fn complete_session(
        &self,
        handle: &SessionHandle,
        parts: Vec<CompletedPart>,
    ) -> Result<String, UploadError> {
        let request = self
            .http
            .post(format!("{}/upload-complete", self.config.base_url))
            .json(&CompleteRequest {
                filename: handle.key.clone(),
                upload_id: handle.upload_id.clone(),
                parts: normalize_parts(parts),
            });

        let response =
            match send_with_timers(request, self.config.warning_pending, None, self.events).await {
                Ok(response) => {
                    self.events.retrying(false);
                    response
                }
                Err(err) => {
                    let log = format!("network error during upload-complete: {}", err);
                    self.report(UploadStage::Network, &log);
                    return Err(UploadError::transient(
                        UploadStage::Network,
                        "All parts were uploaded, but the assembly command could \
                         not be sent. Check your connection.",
                        log,
                    ));
                }
            };

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            let log = format!(
                "server error during upload-complete: {} - {}",
                status, detail
            );
            self.report(UploadStage::Complete, &log);
            return Err(UploadError::transient(
                UploadStage::Complete,
                "The server could not finish assembling the file. \
                 Please try again.",
                log,
            ));
        }

        let body: CompleteResponse = response.json().await.map_err(|err| {
            UploadError::transient(
                UploadStage::Complete,
                "The server gave an unexpected answer when finishing the upload.",
                format!("could not parse upload-complete response: {}", err),
            )
        })?;

        Ok(body.public_url)
    }

    fn chunk_read_error(&self, part_number: i64, err: std::io::Error) -> UploadError {
        UploadError::fatal(
            UploadStage::Part,
            "Could not read the file from disk.",
            format!("failed to read chunk {}: {}", part_number, err),
        )
    }

    fn report(&self, stage: UploadStage, message: &str) {
        self.diagnostics.report(UploadDiagnostics {
            file_name: self.object_key.to_string(),
            file_size: self.file_size,
            file_type: self.content_type.to_string(),
            error_stage: stage,
            error_message: message.to_string(),
            failed_part: None,
            total_parts: None,
            retry_attempts: None,
            time_elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }
}

/// Completed-part progress as a 1–100 percentage.
fn progress_pct(done: u64, total: u64) -> u8 {
    (((done as f64 / total as f64) * 100.0).round() as u8).min(100)
}

/// Sort ascending by part number and strip etag quotes.
///
/// Sequential upload already yields sorted, unquoted parts; this keeps the
/// completion call correct regardless of how the parts were collected.
fn normalize_parts(mut parts: Vec<CompletedPart>) -> Vec<CompletedPart> {
    parts.sort_by_key(|p| p.part_number);
    for part in &mut parts {
        part.etag = strip_etag_quotes(&part.etag);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_rounds_per_completed_part() {
        assert_eq!(progress_pct(1, 3), 33);
        assert_eq!(progress_pct(2, 3), 67);
        assert_eq!(progress_pct(3, 3), 100);
        assert_eq!(progress_pct(1, 1), 100);
        assert_eq!(progress_pct(1, 200), 1);
    }

    #[test]
    fn normalize_sorts_and_strips() {
        let parts = normalize_parts(vec![
            CompletedPart {
                part_number: 3,
                etag: "\"c\"".into(),
            },
            CompletedPart {
                part_number: 1,
                etag: "a".into(),
            },
            CompletedPart {
                part_number: 2,
                etag: "\"b\"".into(),
            },
        ]);
        let numbers: Vec<i64> = parts.iter().map(|p| p.part_number).collect();
        let etags: Vec<&str> = parts.iter().map(|p| p.etag.as_str()).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(etags, vec!["a", "b", "c"]);
    }
}
