//! Append-only audit/telemetry records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One audit/telemetry record. Write-only from the pipeline's perspective.
///
/// Context must stay safe to persist (flags, hashes, counts, latencies),
/// never raw AI content or secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Component that produced the entry (e.g. "worker", "scheduler", "admin").
    pub source: String,
    /// Job correlation, when the entry belongs to a job.
    pub job_id: Option<Uuid>,
    pub message: String,
    pub context: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            source: source.into(),
            job_id: None,
            message: message.into(),
            context: JsonValue::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_context(mut self, context: JsonValue) -> Self {
        self.context = context;
        self
    }
}
