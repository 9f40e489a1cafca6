//! Job runner: the step sequence with checkpointing.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use colorforge_core::Locale;
use colorforge_queue::{JobId, JobPayload, JobRecord};
use colorforge_store::{ItemStore, JobStepRecord, JobStepStore, StepName};

use crate::context::{Services, StepContext};
use crate::error::{JobOutcome, StepError};
use crate::moderate::ModerationOutcome;
use crate::{generate_image, generate_text, moderate, process_image, upload_assets};

async fn load_step(
    services: &Services,
    job_id: JobId,
    step: StepName,
) -> Result<JobStepRecord, StepError> {
    Ok(services
        .store
        .get_step(job_id, step)
        .await?
        .unwrap_or_else(|| JobStepRecord::new(job_id, step)))
}

/// Persist a step result into its checkpoint row.
async fn record_outcome(
    services: &Services,
    mut record: JobStepRecord,
    result: &Result<serde_json::Value, StepError>,
) -> Result<(), StepError> {
    let now = Utc::now();
    match result {
        Ok(checkpoint) => record.complete(checkpoint.clone(), now),
        Err(err) => record.fail(err.to_string(), now),
    }
    services.store.upsert_step(&record).await?;
    Ok(())
}

/// Execute a `generate` or `regenerate` job through the full step sequence.
///
/// Safe to re-run after partial completion: durable steps (text, upload,
/// finalize) skip once their checkpoint is completed and their effects are
/// visible in the store; the image steps hold only transient bytes and re-run
/// unless the final assets are already in place.
pub async fn run_generate_job(
    services: &Services,
    job: &JobRecord,
) -> Result<JobOutcome, StepError> {
    let supersede = matches!(job.payload, JobPayload::Regenerate { .. });
    let item_id = job
        .payload
        .item_id()
        .ok_or_else(|| StepError::Validation("generation job carries no item".to_string()))?;
    let item = services
        .store
        .get_item(item_id)
        .await?
        .ok_or(StepError::ItemNotFound(item_id))?;

    // Moderation gates everything. Not checkpointed in job_steps: its
    // idempotency rides on item.moderation_status itself.
    match moderate::run(services, job, &item).await? {
        ModerationOutcome::Halted { reason } => {
            info!(job_id = %job.id, item_id = %item_id, "job halted by moderation");
            return Ok(JobOutcome::Halted { reason });
        }
        ModerationOutcome::Approved => {}
    }

    // The moderation step may have just flipped the status; work from the
    // stored row, not the stale copy.
    let item = services
        .store
        .get_item(item_id)
        .await?
        .ok_or(StepError::ItemNotFound(item_id))?;
    let mut ctx = StepContext::new(services, job, item);

    // Generate text (durable, checkpointed).
    let text_step = load_step(services, job.id, StepName::GenerateText).await?;
    ctx.load_variants().await?;
    let pair_present = Locale::ALL
        .iter()
        .all(|locale| ctx.variants.iter().any(|v| v.locale == *locale));
    if text_step.is_completed() && pair_present {
        debug!(job_id = %job.id, "text step already completed, resuming");
    } else {
        let mut record = text_step;
        record.begin(Utc::now());
        services.store.upsert_step(&record).await?;
        let result = generate_text::run(&mut ctx, supersede).await;
        record_outcome(services, record, &result).await?;
        result?;
    }

    if upload_assets::assets_complete(&ctx) {
        debug!(job_id = %job.id, "assets already uploaded, skipping image path");
    } else {
        // Generate image (transient bytes; re-runs on redelivery).
        let mut record = load_step(services, job.id, StepName::GenerateImage).await?;
        record.begin(Utc::now());
        services.store.upsert_step(&record).await?;
        let result = generate_image::run(&mut ctx).await;
        record_outcome(services, record, &result).await?;
        result?;

        // Process image (transient; validates and measures the payload).
        let mut record = load_step(services, job.id, StepName::ProcessImage).await?;
        record.begin(Utc::now());
        services.store.upsert_step(&record).await?;
        let result = process_image::run(&mut ctx).await;
        record_outcome(services, record, &result).await?;
        result?;

        // Upload assets (durable, idempotent by checksum/storage key).
        let upload_step = load_step(services, job.id, StepName::UploadStorage).await?;
        if !upload_step.is_completed() {
            let mut record = upload_step;
            record.begin(Utc::now());
            services.store.upsert_step(&record).await?;
            let result = upload_assets::run(&mut ctx).await;
            record_outcome(services, record, &result).await?;
            result?;
        }
    }

    // Finalize. Publishing stays a separate explicit job.
    let finalize = load_step(services, job.id, StepName::Finalize).await?;
    if !finalize.is_completed() {
        let mut record = finalize;
        record.begin(Utc::now());
        let result = Ok(json!({"variants": ctx.variants.len()}));
        record_outcome(services, record, &result).await?;
    }

    info!(job_id = %job.id, item_id = %item_id, "generation job completed");
    Ok(JobOutcome::Completed)
}
