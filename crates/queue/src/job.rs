//! Job identity, payloads, and the persisted job record.

use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use colorforge_core::{AssetFormat, DomainError, ItemId, Locale};

/// Unique identifier of a persisted job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a daily batch: `{YYYY-MM-DD}-{uuid}`.
///
/// The date prefix is what the scheduler queries to decide whether today's
/// batch already exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Fresh batch identifier for the given calendar day.
    pub fn for_date(date: NaiveDate) -> Self {
        Self(format!("{}-{}", date.format("%Y-%m-%d"), Uuid::now_v7()))
    }

    /// The prefix shared by every batch created on `date`.
    pub fn date_prefix(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_for_date(&self, date: NaiveDate) -> bool {
        self.0.starts_with(&Self::date_prefix(date))
    }
}

impl From<String> for BatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job type, used for routing and dedup key prefixes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Generate,
    Publish,
    Sitemap,
    Regenerate,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Generate => "generate",
            JobType::Publish => "publish",
            JobType::Sitemap => "sitemap",
            JobType::Regenerate => "regenerate",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate" => Ok(JobType::Generate),
            "publish" => Ok(JobType::Publish),
            "sitemap" => Ok(JobType::Sitemap),
            "regenerate" => Ok(JobType::Regenerate),
            other => Err(DomainError::validation(format!("unknown job type: {other}"))),
        }
    }
}

/// Typed job payload, tagged by job type.
///
/// Dispatch sites match exhaustively; adding a job type is a compile error
/// everywhere it matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Generate { item_id: ItemId, prompt: String },
    Publish { item_id: ItemId, locale: Locale, format: AssetFormat },
    Sitemap,
    Regenerate { item_id: ItemId },
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::Generate { .. } => JobType::Generate,
            JobPayload::Publish { .. } => JobType::Publish,
            JobPayload::Sitemap => JobType::Sitemap,
            JobPayload::Regenerate { .. } => JobType::Regenerate,
        }
    }

    pub fn item_id(&self) -> Option<ItemId> {
        match self {
            JobPayload::Generate { item_id, .. }
            | JobPayload::Publish { item_id, .. }
            | JobPayload::Regenerate { item_id } => Some(*item_id),
            JobPayload::Sitemap => None,
        }
    }

    /// Deterministic queue dedup key: `{type}-{YYYY-MM-DD}-{natural key}`.
    ///
    /// Same payload on the same UTC day always yields the same key, so
    /// enqueuing the same logical job twice in one day is a guaranteed no-op
    /// at the queue layer.
    pub fn dedup_key(&self, date: NaiveDate) -> String {
        let date = date.format("%Y-%m-%d");
        match self {
            JobPayload::Generate { item_id, .. } => format!("generate-{date}-{item_id}"),
            JobPayload::Publish { item_id, locale, format } => {
                format!("publish-{date}-{item_id}-{locale}-{format}")
            }
            JobPayload::Sitemap => format!("sitemap-{date}"),
            JobPayload::Regenerate { item_id } => format!("regenerate-{date}-{item_id}"),
        }
    }
}

/// Scheduling priority. Lower numeric value is processed first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    High,
    Normal,
    Low,
}

impl JobPriority {
    pub fn as_i32(&self) -> i32 {
        match self {
            JobPriority::High => 1,
            JobPriority::Normal => 100,
            JobPriority::Low => 200,
        }
    }
}

/// Job execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Why a manual retry was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryRejection {
    #[error("Job status is {0}, not failed")]
    NotFailed(JobStatus),
    #[error("Max retries ({0}) exceeded")]
    MaxRetriesExceeded(i32),
}

/// A persisted unit of pipeline work.
///
/// Rows are created by the scheduler (or the admin retry path), mutated only
/// by the worker holding the dequeued job, and never deleted: the jobs table
/// is the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub batch_id: BatchId,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub backoff_seconds: i32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(batch_id: BatchId, payload: JobPayload, priority: JobPriority) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            batch_id,
            payload,
            status: JobStatus::Pending,
            priority: priority.as_i32(),
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            backoff_seconds: 1,
            scheduled_at: now,
            started_at: None,
            completed_at: None,
            created_at: now,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    /// `pending → processing`: stamp the start and consume an attempt.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        self.attempts += 1;
    }

    /// `processing → completed`.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.last_error = None;
    }

    /// `processing → failed`, doubling the stored backoff hint.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.last_error = Some(error.into());
        self.completed_at = Some(now);
        self.backoff_seconds = (self.backoff_seconds.max(1)).saturating_mul(2).min(60);
    }

    /// Explicit manual/scheduled retry: `failed → pending`.
    ///
    /// The only transition out of `failed`; it consumes an attempt and is
    /// refused once the budget is spent.
    pub fn retry(&mut self) -> Result<(), RetryRejection> {
        if self.status != JobStatus::Failed {
            return Err(RetryRejection::NotFailed(self.status));
        }
        if self.attempts >= self.max_attempts {
            return Err(RetryRejection::MaxRetriesExceeded(self.max_attempts));
        }
        self.status = JobStatus::Pending;
        self.attempts += 1;
        self.last_error = None;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn item() -> ItemId {
        ItemId::from_uuid(Uuid::parse_str("0190a0a0-0000-7000-8000-000000000001").unwrap())
    }

    #[test]
    fn dedup_key_is_stable_within_a_day() {
        let payload = JobPayload::Generate { item_id: item(), prompt: "x".to_string() };
        let day = date("2026-08-06");

        let a = payload.dedup_key(day);
        let b = payload.dedup_key(day);
        assert_eq!(a, b);
        assert_eq!(a, format!("generate-2026-08-06-{}", item()));
    }

    #[test]
    fn dedup_key_differs_across_days() {
        let payload = JobPayload::Generate { item_id: item(), prompt: "x".to_string() };
        assert_ne!(
            payload.dedup_key(date("2026-08-06")),
            payload.dedup_key(date("2026-08-07"))
        );
    }

    #[test]
    fn publish_dedup_key_includes_locale_and_format() {
        let payload = JobPayload::Publish {
            item_id: item(),
            locale: Locale::Pl,
            format: AssetFormat::Png,
        };
        let key = payload.dedup_key(date("2026-08-06"));
        assert_eq!(key, format!("publish-2026-08-06-{}-pl-png", item()));
    }

    #[test]
    fn payload_roundtrips_through_json_with_type_tag() {
        let payload = JobPayload::Publish {
            item_id: item(),
            locale: Locale::En,
            format: AssetFormat::Svg,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "publish");
        let back: JobPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn batch_id_carries_date_prefix() {
        let day = date("2026-08-06");
        let batch = BatchId::for_date(day);
        assert!(batch.is_for_date(day));
        assert!(!batch.is_for_date(date("2026-08-07")));
    }

    #[test]
    fn job_lifecycle_transitions() {
        let payload = JobPayload::Generate { item_id: item(), prompt: "x".to_string() };
        let mut job = JobRecord::new(BatchId::for_date(date("2026-08-06")), payload, JobPriority::Normal);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);

        job.begin(Utc::now());
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_some());

        job.complete(Utc::now());
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.last_error.is_none());
    }

    #[test]
    fn failure_records_error_and_grows_backoff() {
        let payload = JobPayload::Sitemap;
        let mut job = JobRecord::new(BatchId::for_date(date("2026-08-06")), payload, JobPriority::Low);

        job.begin(Utc::now());
        job.fail("provider exploded", Utc::now());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("provider exploded"));
        assert_eq!(job.backoff_seconds, 2);

        job.retry().unwrap();
        job.begin(Utc::now());
        job.fail("again", Utc::now());
        assert_eq!(job.backoff_seconds, 4);
    }

    #[test]
    fn retry_is_refused_at_max_attempts() {
        let payload = JobPayload::Generate { item_id: item(), prompt: "x".to_string() };
        let mut job = JobRecord::new(BatchId::for_date(date("2026-08-06")), payload, JobPriority::Normal);
        job.status = JobStatus::Failed;
        job.attempts = 3;
        job.max_attempts = 3;

        let rejection = job.retry().unwrap_err();
        assert_eq!(rejection.to_string(), "Max retries (3) exceeded");
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn retry_requires_failed_status() {
        let payload = JobPayload::Sitemap;
        let mut job = JobRecord::new(BatchId::for_date(date("2026-08-06")), payload, JobPriority::Normal);

        let rejection = job.retry().unwrap_err();
        assert_eq!(rejection.to_string(), "Job status is pending, not failed");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn dedup_keys_collide_only_on_equal_inputs(
                a_days in 0i64..3650,
                b_days in 0i64..3650,
            ) {
                let item_id = item();
                let payload = JobPayload::Regenerate { item_id };
                let epoch = date("2020-01-01");
                let a = payload.dedup_key(epoch + chrono::Days::new(a_days as u64));
                let b = payload.dedup_key(epoch + chrono::Days::new(b_days as u64));
                prop_assert_eq!(a == b, a_days == b_days);
            }
        }
    }
}
