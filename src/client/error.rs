//! Upload failure taxonomy.

use serde::Serialize;
use thiserror::Error;

/// Protocol phase in which a failure was detected.
///
/// Serialized values match the diagnostics schema (`upload-start`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadStage {
    #[serde(rename = "upload-start")]
    Start,
    #[serde(rename = "upload-part")]
    Part,
    #[serde(rename = "upload-complete")]
    Complete,
    #[serde(rename = "network")]
    Network,
}

/// A normalized upload failure: a human-facing message plus a technical log
/// line, produced at the point of detection and propagated unchanged.
#[derive(Debug, Error)]
#[error("{log}")]
pub struct UploadError {
    pub stage: UploadStage,
    /// Human-facing message, safe to display as-is.
    pub user: String,
    /// Technical detail for logs.
    pub log: String,
    /// True when the failure is non-retryable (a client error the server
    /// will keep rejecting); transient and retry-exhausted failures are
    /// terminal too, but untagged.
    pub fatal: bool,
}

impl UploadError {
    pub fn fatal(stage: UploadStage, user: impl Into<String>, log: impl Into<String>) -> Self {
        Self {
            stage,
            user: user.into(),
            log: log.into(),
            fatal: true,
        }
    }

    pub fn transient(stage: UploadStage, user: impl Into<String>, log: impl Into<String>) -> Self {
        Self {
            stage,
            user: user.into(),
            log: log.into(),
            fatal: false,
        }
    }
}
