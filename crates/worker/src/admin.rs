//! Admin retry operation for failed jobs.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use colorforge_core::{LogEntry, LogLevel};
use colorforge_pipeline::Services;
use colorforge_queue::{JobId, JobQueue, QueueEntry, QueueName};
use colorforge_store::{JobStore, LogStore, StoreError};

/// Per-job result of a retry request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RetryOutcome {
    pub job_id: JobId,
    pub success: bool,
    pub message: String,
}

/// Re-queue failed jobs by ID.
///
/// Each job must exist, be `failed`, and still have attempt budget left;
/// anything else is reported back per job rather than failing the whole
/// request. Successful resets go back to `pending` and are re-enqueued
/// best-effort under today's dedup key.
pub async fn retry_failed_jobs(
    services: &Services,
    queue: &dyn JobQueue,
    job_ids: &[JobId],
) -> Result<Vec<RetryOutcome>, StoreError> {
    let mut outcomes = Vec::with_capacity(job_ids.len());

    for &job_id in job_ids {
        let Some(mut job) = services.store.get_job(job_id).await? else {
            outcomes.push(RetryOutcome {
                job_id,
                success: false,
                message: "Job not found".to_string(),
            });
            continue;
        };

        if let Err(rejection) = job.retry() {
            outcomes.push(RetryOutcome {
                job_id,
                success: false,
                message: rejection.to_string(),
            });
            continue;
        }

        services.store.update_job(&job).await?;

        let dedup_key = job.payload.dedup_key(Utc::now().date_naive());
        let entry = QueueEntry::new(dedup_key, job.id, job.payload.clone(), job.priority);
        if let Err(err) = queue.enqueue(QueueName::Generation, entry).await {
            // Store row is already pending; the worker sweep will pick it up.
            warn!(job_id = %job.id, error = %err, "retry enqueue failed");
        }

        outcomes.push(RetryOutcome {
            job_id,
            success: true,
            message: "Job requeued successfully".to_string(),
        });
    }

    let retried = outcomes.iter().filter(|o| o.success).count();
    info!(retried, requested = job_ids.len(), "manual retry processed");
    services
        .store
        .append_log(
            &LogEntry::new(
                LogLevel::Info,
                "admin",
                format!("Retried {retried}/{} jobs manually", job_ids.len()),
            )
            .with_context(json!({"outcomes": outcomes})),
        )
        .await?;

    Ok(outcomes)
}
