//! Best-effort failure telemetry.
//!
//! Diagnostics are recorded from a spawned task so the upload's own error
//! propagation is never blocked or delayed, and every reporting failure is
//! swallowed — the sink can be down without anyone noticing but the logs.

use super::error::UploadStage;
use chrono::Utc;
use serde::Serialize;

/// Structured context of one upload failure.
#[derive(Debug, Clone, Serialize)]
pub struct UploadDiagnostics {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub error_stage: UploadStage,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_part: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_parts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    pub time_elapsed_ms: u64,
}

/// Posts diagnostics as JSON to an external sink, or just logs them when no
/// sink is configured.
#[derive(Clone, Default)]
pub struct DiagnosticsReporter {
    endpoint: Option<String>,
    http: reqwest::Client,
}

impl DiagnosticsReporter {
    /// Reporter without a sink; failures are logged at debug level only.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            http: reqwest::Client::new(),
        }
    }

    /// Record one failure. Returns immediately; the write happens in the
    /// background and its outcome never reaches the caller.
    pub fn report(&self, diagnostics: UploadDiagnostics) {
        let Some(endpoint) = self.endpoint.clone() else {
            tracing::debug!(
                stage = ?diagnostics.error_stage,
                message = %diagnostics.error_message,
                "upload failure (no diagnostics sink configured)"
            );
            return;
        };

        let http = self.http.clone();
        tokio::spawn(async move {
            let mut payload = match serde_json::to_value(&diagnostics) {
                Ok(value) => value,
                Err(err) => {
                    tracing::debug!(error = %err, "could not serialize diagnostic");
                    return;
                }
            };
            if let serde_json::Value::Object(map) = &mut payload {
                map.insert("created_at".into(), serde_json::json!(Utc::now()));
            }

            match http.post(&endpoint).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!("diagnostic recorded");
                }
                Ok(resp) => {
                    tracing::debug!(status = %resp.status(), "diagnostic write rejected");
                }
                Err(err) => {
                    tracing::debug!(error = %err, "failed to record diagnostic");
                }
            }
        });
    }
}
