//! The worker pool.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use colorforge_core::{LogEntry, LogLevel};
use colorforge_pipeline::{JobOutcome, Services, StepError, publish, run_generate_job};
use colorforge_queue::{
    Delivery, JobPayload, JobQueue, JobStatus, QueueConfig, QueueEntry, QueueName,
};
use colorforge_store::{JobStore, LogStore};

/// How many empty polls pass between store reconciliation sweeps.
const SWEEP_EVERY: u32 = 12;

/// How many store rows one sweep re-admits at most.
const SWEEP_BATCH: usize = 50;

/// Bounded-concurrency job consumer.
///
/// Jobs run independently and in parallel up to `max_concurrent`; steps
/// within one job stay strictly sequential. Shutdown is a graceful drain:
/// no new reservations, in-flight jobs finish.
pub struct Worker {
    services: Services,
    queue: Arc<dyn JobQueue>,
    config: QueueConfig,
}

impl Worker {
    pub fn new(services: Services, queue: Arc<dyn JobQueue>, config: QueueConfig) -> Self {
        Self { services, queue, config }
    }

    /// Run until `shutdown` flips to true, then drain.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(max_concurrent = self.config.max_concurrent, "worker started");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut idle_polls = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }
            while tasks.try_join_next().is_some() {}

            match self.queue.reserve(QueueName::Generation).await {
                Ok(Some(delivery)) => {
                    idle_polls = 0;
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("semaphore is never closed");
                    let services = self.services.clone();
                    let queue = self.queue.clone();
                    let config = self.config.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        process_delivery(&services, queue.as_ref(), &config, delivery).await;
                    });
                }
                Ok(None) => {
                    idle_polls += 1;
                    if idle_polls.is_multiple_of(SWEEP_EVERY) {
                        self.sweep().await;
                        if let Err(err) = self.queue.cleanup(Utc::now()).await {
                            warn!(error = %err, "queue cleanup failed");
                        }
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to reserve job");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "worker draining in-flight jobs");
        while tasks.join_next().await.is_some() {}
        info!("worker stopped");
    }

    /// Store reconciliation sweep: the store is authoritative and the queue
    /// only an accelerant, so pending rows that never made it into the queue
    /// (enqueue failed, queue restarted) are re-admitted here.
    async fn sweep(&self) {
        let due = match self.services.store.pending_jobs_due(Utc::now(), SWEEP_BATCH).await {
            Ok(due) => due,
            Err(err) => {
                warn!(error = %err, "reconciliation sweep query failed");
                return;
            }
        };

        for job in due {
            let dedup_key = job.payload.dedup_key(job.created_at.date_naive());
            match self.queue.contains(QueueName::Generation, &dedup_key).await {
                Ok(true) => {}
                Ok(false) => {
                    let entry =
                        QueueEntry::new(dedup_key.clone(), job.id, job.payload.clone(), job.priority);
                    match self.queue.enqueue(QueueName::Generation, entry).await {
                        Ok(_) => debug!(job_id = %job.id, "sweep re-admitted job"),
                        Err(err) => warn!(job_id = %job.id, error = %err, "sweep enqueue failed"),
                    }
                }
                Err(err) => warn!(error = %err, "sweep membership check failed"),
            }
        }
    }
}

/// Process one delivery end to end, settling it with the queue.
pub async fn process_delivery(
    services: &Services,
    queue: &dyn JobQueue,
    config: &QueueConfig,
    delivery: Delivery,
) {
    let dedup_key = delivery.entry.dedup_key.clone();
    let record_id = delivery.entry.record_id;

    let mut job = match services.store.get_job(record_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            // Queue entry without a store row: the row is authoritative, so
            // the entry is an orphan.
            warn!(job_id = %record_id, "dropping queue entry with no job row");
            let _ = queue.ack(QueueName::Generation, &dedup_key).await;
            return;
        }
        Err(err) => {
            error!(job_id = %record_id, error = %err, "failed to load job row");
            let _ = queue
                .nack(QueueName::Generation, &dedup_key, config.redelivery_backoff(delivery.attempt))
                .await;
            return;
        }
    };

    if job.status == JobStatus::Completed {
        debug!(job_id = %job.id, "duplicate delivery of completed job");
        let _ = queue.ack(QueueName::Generation, &dedup_key).await;
        return;
    }
    if job.status == JobStatus::Failed && job.attempts >= job.max_attempts {
        warn!(job_id = %job.id, attempts = job.attempts, "failed job is out of attempts");
        let _ = queue.ack(QueueName::Generation, &dedup_key).await;
        return;
    }

    job.begin(Utc::now());
    if let Err(err) = services.store.update_job(&job).await {
        error!(job_id = %job.id, error = %err, "failed to mark job processing");
        let _ = queue
            .nack(QueueName::Generation, &dedup_key, config.redelivery_backoff(delivery.attempt))
            .await;
        return;
    }

    info!(job_id = %job.id, job_type = %job.job_type(), attempt = job.attempts, "job started");

    match dispatch(services, &job).await {
        Ok(JobOutcome::Completed) => {
            job.complete(Utc::now());
            if let Err(err) = services.store.update_job(&job).await {
                error!(job_id = %job.id, error = %err, "failed to mark job completed");
            }
            let _ = queue.ack(QueueName::Generation, &dedup_key).await;
            info!(job_id = %job.id, "job completed");
        }
        Ok(JobOutcome::Halted { reason }) => {
            // A moderation halt is a normal terminal outcome for the job;
            // the item waits for a human, not for a retry.
            job.complete(Utc::now());
            if let Err(err) = services.store.update_job(&job).await {
                error!(job_id = %job.id, error = %err, "failed to mark halted job");
            }
            let _ = services
                .store
                .append_log(
                    &LogEntry::new(LogLevel::Warn, "worker", "job halted pending review")
                        .with_job(*job.id.as_uuid())
                        .with_context(json!({"reason": reason})),
                )
                .await;
            let _ = queue.ack(QueueName::Generation, &dedup_key).await;
            info!(job_id = %job.id, %reason, "job halted");
        }
        Err(err) => {
            let message = err.to_string();
            job.fail(&message, Utc::now());
            if let Err(update_err) = services.store.update_job(&job).await {
                error!(job_id = %job.id, error = %update_err, "failed to record job failure");
            }
            let _ = services
                .store
                .append_log(
                    &LogEntry::new(LogLevel::Error, "worker", "job failed")
                        .with_job(*job.id.as_uuid())
                        .with_context(json!({"error": message, "attempt": job.attempts})),
                )
                .await;

            // Re-throw to the queue: its attempts/backoff policy governs
            // redelivery.
            let backoff = config.redelivery_backoff(delivery.attempt.saturating_sub(1));
            match queue.nack(QueueName::Generation, &dedup_key, backoff).await {
                Ok(colorforge_queue::NackOutcome::Requeued) => {
                    warn!(job_id = %job.id, error = %message, "job failed, will be redelivered");
                }
                Ok(colorforge_queue::NackOutcome::Exhausted) => {
                    warn!(job_id = %job.id, error = %message, "job failed, delivery attempts exhausted");
                }
                Err(nack_err) => {
                    error!(job_id = %job.id, error = %nack_err, "failed to settle job with queue");
                }
            }
        }
    }
}

/// Exhaustive dispatch on the payload union.
async fn dispatch(
    services: &Services,
    job: &colorforge_queue::JobRecord,
) -> Result<JobOutcome, StepError> {
    match &job.payload {
        JobPayload::Generate { .. } | JobPayload::Regenerate { .. } => {
            run_generate_job(services, job).await
        }
        JobPayload::Publish { item_id, locale, format } => {
            publish::publish_item(services, job, *item_id, *locale, *format)
                .await
                .map(|()| JobOutcome::Completed)
        }
        JobPayload::Sitemap => {
            // Sitemap rendering belongs to the web layer; the worker only
            // acknowledges the trigger.
            debug!(job_id = %job.id, "sitemap job acknowledged");
            Ok(JobOutcome::Completed)
        }
    }
}
