//! Client-side upload orchestration.
//!
//! Runs the three-phase protocol (start → N parts → complete) against the
//! relay: `chunk` slices the file, `part` delivers one chunk with bounded
//! retries and timeout enforcement, `session` sequences the phases, and
//! `diagnostics` records failure telemetry best-effort.

pub mod chunk;
pub mod diagnostics;
pub mod error;
pub mod part;
pub mod session;

pub use diagnostics::{DiagnosticsReporter, UploadDiagnostics};
pub use error::{UploadError, UploadStage};
pub use session::{SessionHandle, UploadClient};

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Tuning knobs for one `UploadClient`.
///
/// Defaults match the production profile: 8 MiB chunks, ten attempts per
/// part, a 15s slow-connection warning, and a 60s hard timeout per attempt.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the relay, without a trailing slash.
    pub base_url: String,
    /// Fixed chunk size in bytes.
    pub chunk_size: u64,
    /// Attempt cap per part.
    pub max_retries: u32,
    /// How long an attempt may stay pending before `Retrying(true)` is emitted.
    pub warning_pending: Duration,
    /// Hard per-attempt timeout; the in-flight request is aborted when it fires.
    pub chunk_timeout: Duration,
    /// Ceiling on the exponential backoff between attempts.
    pub backoff_cap: Duration,
}

impl ClientConfig {
    pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;
    pub const DEFAULT_MAX_RETRIES: u32 = 10;

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            warning_pending: Duration::from_secs(15),
            chunk_timeout: Duration::from_secs(60),
            backoff_cap: Duration::from_secs(60),
        }
    }

    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn warning_pending(mut self, warning_pending: Duration) -> Self {
        self.warning_pending = warning_pending;
        self
    }

    pub fn chunk_timeout(mut self, chunk_timeout: Duration) -> Self {
        self.chunk_timeout = chunk_timeout;
        self
    }

    pub fn backoff_cap(mut self, backoff_cap: Duration) -> Self {
        self.backoff_cap = backoff_cap;
        self
    }
}

/// Typed progress events emitted while an upload runs.
///
/// The terminal outcome travels as the upload function's return value, so
/// the stream carries only in-flight state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadEvent {
    /// Percentage of the upload completed, 1–100.
    Progress(u8),
    /// True while the connection looks unstable (slow attempt or retry in
    /// progress), false once the pending call succeeds.
    Retrying(bool),
}

/// Send-and-forget event wrapper; a dropped receiver never fails the upload.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: UnboundedSender<UploadEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: UnboundedSender<UploadEvent>) -> Self {
        Self { tx }
    }

    pub(crate) fn progress(&self, pct: u8) {
        let _ = self.tx.send(UploadEvent::Progress(pct));
    }

    pub(crate) fn retrying(&self, retrying: bool) {
        let _ = self.tx.send(UploadEvent::Retrying(retrying));
    }
}
