//! Daily batch scheduler.
//!
//! Produces each calendar day's `generate` jobs exactly once, and is safe to
//! re-invoke: a second run on the same day only adds jobs for eligible items
//! the first run missed. Job rows are written to the store first
//! (authoritative), then mirrored into the queue best-effort.

use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, warn};

use colorforge_core::{LogEntry, LogLevel};
use colorforge_pipeline::Services;
use colorforge_queue::{
    BatchId, JobPayload, JobPriority, JobQueue, JobRecord, QueueEntry, QueueName,
};
use colorforge_store::{ItemStore, JobStore, LogStore, StoreError};

/// What one scheduler invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: BatchId,
    /// Jobs created by this invocation.
    pub created: usize,
    /// Eligible items skipped because today's batch already covers them.
    pub skipped: usize,
    /// Jobs successfully mirrored into the queue.
    pub mirrored: usize,
}

/// Run the daily batch for `today` (UTC date).
pub async fn run_daily_batch(
    services: &Services,
    queue: &dyn JobQueue,
    daily_target: usize,
    today: NaiveDate,
) -> Result<BatchReport, StoreError> {
    let prefix = BatchId::date_prefix(today);
    let existing_batch = services.store.batch_for_date(&prefix).await?;

    let batch_id = existing_batch.clone().unwrap_or_else(|| BatchId::for_date(today));
    let already_jobbed = match &existing_batch {
        Some(batch) => services.store.item_ids_in_batch(batch).await?,
        None => Default::default(),
    };

    let eligible = services.store.list_unpublished(daily_target).await?;

    let mut report = BatchReport { batch_id: batch_id.clone(), created: 0, skipped: 0, mirrored: 0 };

    for item in eligible {
        if already_jobbed.contains(&item.id) {
            report.skipped += 1;
            continue;
        }

        let payload = JobPayload::Generate {
            item_id: item.id,
            prompt: item.prompt.clone().unwrap_or_default(),
        };
        let job = JobRecord::new(batch_id.clone(), payload.clone(), JobPriority::Normal);

        // Store first: the row is the source of truth.
        services.store.insert_job(&job).await?;
        report.created += 1;

        // Queue second, best-effort: a dead queue delays pickup (the worker
        // sweep re-admits pending rows), it never loses the job.
        let entry = QueueEntry::new(payload.dedup_key(today), job.id, payload, job.priority);
        match queue.enqueue(QueueName::Generation, entry).await {
            Ok(_) => report.mirrored += 1,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "queue mirror failed, store row remains authoritative");
            }
        }
    }

    info!(
        batch_id = %report.batch_id,
        created = report.created,
        skipped = report.skipped,
        mirrored = report.mirrored,
        "daily batch scheduled"
    );
    services
        .store
        .append_log(
            &LogEntry::new(LogLevel::Info, "scheduler", "daily batch scheduled").with_context(
                json!({
                    "batch_id": report.batch_id,
                    "created": report.created,
                    "skipped": report.skipped,
                    "mirrored": report.mirrored,
                }),
            ),
        )
        .await?;

    Ok(report)
}
