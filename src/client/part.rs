//! Single-part delivery: bounded retries, exponential backoff, and two
//! timers per attempt (slow-connection warning and hard abort). Both timers
//! are owned by the attempt and dropped on every exit path, so a settled
//! attempt can never fire a stale callback.

use super::{
    ClientConfig, EventSink,
    diagnostics::{DiagnosticsReporter, UploadDiagnostics},
    error::{UploadError, UploadStage},
    session::SessionHandle,
};
use crate::models::wire::{CompletedPart, PartResponse};
use bytes::Bytes;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;

/// Failure of one wire attempt, before retry classification.
#[derive(Debug, Error)]
pub(crate) enum AttemptError {
    #[error("client timeout")]
    TimedOut,
    #[error(transparent)]
    Transport(reqwest::Error),
}

/// Classified outcome of one part attempt.
enum PartAttempt {
    Done(String),
    Fatal { status: u16, detail: String },
    Transient(String),
}

/// Delivers exactly one chunk and obtains its etag.
pub(crate) struct PartUploader<'a> {
    pub http: &'a reqwest::Client,
    pub config: &'a ClientConfig,
    pub events: &'a EventSink,
    pub diagnostics: &'a DiagnosticsReporter,
    pub file_name: &'a str,
    pub file_size: u64,
    pub content_type: &'a str,
    pub started: Instant,
}

impl PartUploader<'_> {
    /// Upload one chunk, retrying transient failures up to the configured
    /// attempt cap with capped exponential backoff.
    ///
    /// A response with status < 500 is fatal: the request is malformed in a
    /// way retrying cannot fix, and the whole session must stop. 5xx,
    /// network errors, and abort timeouts are transient.
    pub(crate) async fn upload(
        &self,
        handle: &SessionHandle,
        part_number: i64,
        total_parts: u64,
        chunk: Bytes,
    ) -> Result<CompletedPart, UploadError> {
        let url = format!("{}/upload-part", self.config.base_url);
        let part_str = part_number.to_string();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let request = self
                .http
                .post(&url)
                .query(&[
                    ("filename", handle.key.as_str()),
                    ("uploadId", handle.upload_id.as_str()),
                    ("partNumber", part_str.as_str()),
                ])
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(chunk.clone());

            match self.attempt_once(request).await {
                PartAttempt::Done(etag) => {
                    self.events.retrying(false);
                    tracing::debug!(
                        "part {}/{} uploaded (attempt {})",
                        part_number,
                        total_parts,
                        attempt
                    );
                    return Ok(CompletedPart { part_number, etag });
                }
                PartAttempt::Fatal { status, detail } => {
                    let log = format!("part {} failed (status {}): {}", part_number, status, detail);
                    self.report(&log, part_number, total_parts, attempt);
                    return Err(UploadError::fatal(
                        UploadStage::Part,
                        format!(
                            "The server rejected part {} of the file. Upload stopped.",
                            part_number
                        ),
                        log,
                    ));
                }
                PartAttempt::Transient(detail) => {
                    tracing::warn!("part {} attempt {} failed: {}", part_number, attempt, detail);
                    self.events.retrying(true);

                    if attempt >= self.config.max_retries {
                        let log = format!(
                            "part {} failed after {} attempts, last error: {}",
                            part_number, attempt, detail
                        );
                        self.report(&log, part_number, total_parts, attempt);
                        return Err(UploadError::transient(
                            UploadStage::Part,
                            "The upload could not finish because the connection kept \
                             failing. Check that your connection is stable and try again.",
                            log,
                        ));
                    }

                    let delay = backoff_delay(attempt, self.config.backoff_cap);
                    tracing::debug!("retrying part {} in {:?}", part_number, delay);
                    sleep(delay).await;
                }
            }
        }
    }

    /// Run one attempt under both timers and classify the outcome.
    async fn attempt_once(&self, request: reqwest::RequestBuilder) -> PartAttempt {
        let sent = send_with_timers(
            request,
            self.config.warning_pending,
            Some(self.config.chunk_timeout),
            self.events,
        )
        .await;

        match sent {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    match response.json::<PartResponse>().await {
                        Ok(body) => PartAttempt::Done(strip_etag_quotes(&body.etag)),
                        Err(err) => {
                            PartAttempt::Transient(format!("could not read part response: {}", err))
                        }
                    }
                } else if status.as_u16() < 500 {
                    let detail = response.text().await.unwrap_or_default();
                    PartAttempt::Fatal {
                        status: status.as_u16(),
                        detail,
                    }
                } else {
                    PartAttempt::Transient(format!("HTTP {}", status))
                }
            }
            Err(AttemptError::TimedOut) => PartAttempt::Transient(format!(
                "client timeout ({:?} limit)",
                self.config.chunk_timeout
            )),
            Err(AttemptError::Transport(err)) => {
                PartAttempt::Transient(format!("network error: {}", err))
            }
        }
    }

    fn report(&self, message: &str, part_number: i64, total_parts: u64, attempts: u32) {
        self.diagnostics.report(UploadDiagnostics {
            file_name: self.file_name.to_string(),
            file_size: self.file_size,
            file_type: self.content_type.to_string(),
            error_stage: UploadStage::Part,
            error_message: message.to_string(),
            failed_part: Some(part_number),
            total_parts: Some(total_parts),
            retry_attempts: Some(attempts),
            time_elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }
}

/// Drive one request with a slow-connection warning timer and an optional
/// hard abort timer.
///
/// Dropping the in-flight request future on timeout aborts the underlying
/// connection rather than leaving it dangling. Both timers die with this
/// function, so neither can fire after the attempt has settled.
pub(crate) async fn send_with_timers(
    request: reqwest::RequestBuilder,
    warning_after: Duration,
    hard_timeout: Option<Duration>,
    events: &EventSink,
) -> Result<reqwest::Response, AttemptError> {
    let send = request.send();
    tokio::pin!(send);
    let warn = sleep(warning_after);
    tokio::pin!(warn);
    let hard = sleep(hard_timeout.unwrap_or(Duration::ZERO));
    tokio::pin!(hard);
    let mut warned = false;

    loop {
        tokio::select! {
            _ = &mut warn, if !warned => {
                warned = true;
                events.retrying(true);
            }
            _ = &mut hard, if hard_timeout.is_some() => {
                return Err(AttemptError::TimedOut);
            }
            result = &mut send => {
                return result.map_err(AttemptError::Transport);
            }
        }
    }
}

/// Backoff before the attempt after `attempt` failures:
/// `min(2^attempt − 1, cap)` seconds, so roughly 1, 3, 7, 15, 31, 60, 60, …
pub(crate) fn backoff_delay(attempt: u32, cap: Duration) -> Duration {
    let secs = (1u64 << attempt.min(31)) - 1;
    Duration::from_secs(secs).min(cap)
}

/// Object-store etags arrive as quoted-string header values; strip the
/// quotes so the completion call can reuse them verbatim.
pub(crate) fn strip_etag_quotes(etag: &str) -> String {
    etag.replace('"', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_the_documented_sequence() {
        let cap = Duration::from_secs(60);
        let delays: Vec<u64> = (1..=8)
            .map(|attempt| backoff_delay(attempt, cap).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 3, 7, 15, 31, 60, 60, 60]);
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let cap = Duration::from_secs(60);
        let mut previous = Duration::ZERO;
        for attempt in 1..=40 {
            let delay = backoff_delay(attempt, cap);
            assert!(delay >= previous);
            assert!(delay <= cap);
            previous = delay;
        }
    }

    #[test]
    fn etag_quotes_are_stripped() {
        assert_eq!(strip_etag_quotes("\"abc123\""), "abc123");
        assert_eq!(strip_etag_quotes("abc123"), "abc123");
        assert_eq!(strip_etag_quotes("\"\""), "");
    }
}
