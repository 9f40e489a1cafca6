//! Publish operation, driven by `publish` jobs.
//!
//! Deliberately decoupled from generation completion: a finished pipeline
//! run leaves the item unpublished until an explicit publish job flips it,
//! so publication business rules can evolve without touching the pipeline.

use chrono::Utc;
use serde_json::json;
use tracing::info;

use colorforge_core::{AssetFormat, ItemId, Locale, LogEntry, LogLevel};
use colorforge_queue::JobRecord;
use colorforge_store::{ItemStore, LogStore, VariantStore};

use crate::context::Services;
use crate::error::StepError;

/// Publish an item's variant. Requires approved moderation (enforced by the
/// domain invariant) and an existing variant for the requested locale/format.
pub async fn publish_item(
    services: &Services,
    job: &JobRecord,
    item_id: ItemId,
    locale: Locale,
    format: AssetFormat,
) -> Result<(), StepError> {
    let mut item = services
        .store
        .get_item(item_id)
        .await?
        .ok_or(StepError::ItemNotFound(item_id))?;

    if item.is_published {
        return Ok(());
    }

    let variants = services.store.variants_for_item(item_id).await?;
    if !variants.iter().any(|v| v.locale == locale && v.format == format) {
        return Err(StepError::MissingVariant);
    }

    let now = Utc::now();
    item.publish(now).map_err(|e| StepError::Validation(e.to_string()))?;
    services.store.set_published(item_id, now).await?;

    info!(item_id = %item_id, locale = %locale, "item published");
    services
        .store
        .append_log(
            &LogEntry::new(LogLevel::Info, "pipeline.publish", "item published")
                .with_job(*job.id.as_uuid())
                .with_context(json!({"item_id": item_id, "locale": locale})),
        )
        .await?;
    Ok(())
}
