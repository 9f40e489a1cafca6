//! Per-job pipeline checkpoints.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use colorforge_core::DomainError;
use colorforge_queue::{JobId, JobStatus};

/// Pipeline stage names, checkpointed per job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    GenerateImage,
    ProcessImage,
    GenerateText,
    UploadStorage,
    Finalize,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::GenerateImage => "generate_image",
            StepName::ProcessImage => "process_image",
            StepName::GenerateText => "generate_text",
            StepName::UploadStorage => "upload_storage",
            StepName::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate_image" => Ok(StepName::GenerateImage),
            "process_image" => Ok(StepName::ProcessImage),
            "generate_text" => Ok(StepName::GenerateText),
            "upload_storage" => Ok(StepName::UploadStorage),
            "finalize" => Ok(StepName::Finalize),
            other => Err(DomainError::validation(format!("unknown step name: {other}"))),
        }
    }
}

/// One checkpoint row: unique per `(job, step)`, so each step runs at most
/// once to completion per job and a redelivered job resumes where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStepRecord {
    pub id: Uuid,
    pub job_id: JobId,
    pub step: StepName,
    pub status: JobStatus,
    pub checkpoint: JsonValue,
    pub error: Option<String>,
    pub retry_count: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobStepRecord {
    pub fn new(job_id: JobId, step: StepName) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id,
            step,
            status: JobStatus::Pending,
            checkpoint: JsonValue::Null,
            error: None,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn begin(&mut self, now: DateTime<Utc>) {
        if self.status == JobStatus::Failed {
            self.retry_count += 1;
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        self.error = None;
    }

    pub fn complete(&mut self, checkpoint: JsonValue, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.checkpoint = checkpoint;
        self.completed_at = Some(now);
        self.error = None;
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_names_roundtrip() {
        for step in [
            StepName::GenerateImage,
            StepName::ProcessImage,
            StepName::GenerateText,
            StepName::UploadStorage,
            StepName::Finalize,
        ] {
            assert_eq!(step.as_str().parse::<StepName>().unwrap(), step);
        }
    }

    #[test]
    fn retry_count_grows_only_after_failure() {
        let mut step = JobStepRecord::new(JobId::new(), StepName::GenerateText);
        step.begin(Utc::now());
        assert_eq!(step.retry_count, 0);

        step.fail("validation failed", Utc::now());
        step.begin(Utc::now());
        assert_eq!(step.retry_count, 1);
        assert!(step.error.is_none());

        step.complete(serde_json::json!({"variants": 2}), Utc::now());
        assert!(step.is_completed());
    }
}
