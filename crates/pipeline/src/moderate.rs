//! Moderation step.
//!
//! FAIL-CLOSED: a flagged verdict, or any provider failure surviving the
//! retry layer, routes the item to `needs_review` and halts the job before a
//! single generation call is made. Only an explicit non-flagged success sets
//! `approved`. No moderated text is logged, only flags and latency.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use colorforge_ai::AiClient;
use colorforge_core::{Item, LogEntry, LogLevel, ModerationStatus};
use colorforge_queue::JobRecord;
use colorforge_retry::with_retry;
use colorforge_store::{ItemStore, LogStore};

use crate::context::Services;
use crate::error::StepError;

/// Moderation verdict for the running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationOutcome {
    Approved,
    /// The job must stop; the item awaits human review.
    Halted { reason: String },
}

pub async fn run(
    services: &Services,
    job: &JobRecord,
    item: &Item,
) -> Result<ModerationOutcome, StepError> {
    match item.moderation_status {
        // Already cleared in a previous run; nothing to redo.
        ModerationStatus::Approved => return Ok(ModerationOutcome::Approved),
        ModerationStatus::Rejected | ModerationStatus::NeedsReview => {
            return Ok(ModerationOutcome::Halted {
                reason: format!("moderation status is {}", item.moderation_status),
            });
        }
        ModerationStatus::Pending => {}
    }

    let text = item.moderation_text();
    if text.trim().is_empty() {
        // Nothing to moderate; trivially clean.
        services
            .store
            .set_moderation(item.id, ModerationStatus::Approved, None)
            .await?;
        return Ok(ModerationOutcome::Approved);
    }

    let verdict = with_retry(&services.config.retry, "ai.moderate", || {
        services.ai.moderate(&text)
    })
    .await;

    match verdict {
        Ok(response) => {
            info!(
                item_id = %item.id,
                flagged = response.flagged,
                latency_ms = response.metrics.latency_ms,
                "moderation verdict"
            );

            if response.flagged {
                services
                    .store
                    .set_moderation(item.id, ModerationStatus::NeedsReview, Some("Flagged by AI moderation"))
                    .await?;
                halt_log(services, job, item, "content flagged by moderation").await?;
                return Ok(ModerationOutcome::Halted {
                    reason: "content flagged by moderation".to_string(),
                });
            }

            services
                .store
                .set_moderation(item.id, ModerationStatus::Approved, None)
                .await?;
            Ok(ModerationOutcome::Approved)
        }
        Err(err) => {
            // Provider is unreachable or kept failing: never approve on a
            // broken check.
            warn!(item_id = %item.id, error = %err, "moderation check failed, failing closed");
            services
                .store
                .set_moderation(item.id, ModerationStatus::NeedsReview, Some("Moderation check failed"))
                .await?;
            halt_log(services, job, item, "moderation check failed").await?;
            Ok(ModerationOutcome::Halted { reason: format!("moderation check failed: {err}") })
        }
    }
}

async fn halt_log(
    services: &Services,
    job: &JobRecord,
    item: &Item,
    message: &str,
) -> Result<(), StepError> {
    services
        .store
        .append_log(
            &LogEntry::new(LogLevel::Warn, "pipeline.moderate", message)
                .with_job(*job.id.as_uuid())
                .with_context(json!({"item_id": item.id})),
        )
        .await?;
    Ok(())
}
