//! Image-generation step.
//!
//! Requires an existing variant (ordering dependency on the text step) and
//! approved moderation. Runs its own bounded retry loop with exponential
//! backoff layered over the generic retry utility: a provider that keeps
//! failing transiently gets `image_attempts` full retry rounds before the
//! step gives up.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde_json::json;
use tracing::{info, warn};

use colorforge_ai::{AiClient, ImageRequest};
use colorforge_core::Item;
use colorforge_retry::with_retry;

use crate::context::StepContext;
use crate::error::StepError;

pub async fn run(ctx: &mut StepContext<'_>) -> Result<serde_json::Value, StepError> {
    if !ctx.item.moderation_status.is_approved() {
        return Err(StepError::NotApproved);
    }
    if ctx.variants.is_empty() {
        return Err(StepError::MissingVariant);
    }

    let prompt = build_image_prompt(&ctx.item);
    let attempts = ctx.services.config.image_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        let result = with_retry(&ctx.services.config.retry, "ai.generate_image", || {
            ctx.services.ai.generate_image(ImageRequest::standard(prompt.clone()))
        })
        .await;

        match result {
            Ok(response) => {
                let bytes = BASE64
                    .decode(response.b64_png.as_bytes())
                    .map_err(|e| StepError::InvalidImage(format!("base64 decode: {e}")))?;
                info!(
                    item_id = %ctx.item.id,
                    attempt,
                    size = bytes.len(),
                    latency_ms = response.metrics.latency_ms,
                    "image generated"
                );
                ctx.image_bytes = Some(Bytes::from(bytes));
                return Ok(json!({
                    "attempts": attempt,
                    "size": ctx.image_bytes.as_ref().map(Bytes::len),
                }));
            }
            Err(err) => {
                last_error = err.to_string();
                warn!(item_id = %ctx.item.id, attempt, error = %last_error, "image generation attempt failed");
                if attempt < attempts {
                    let delay = ctx.services.config.image_backoff_base * 2u32.pow(attempt - 1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(StepError::ImageGeneration { attempts, last: last_error })
}

/// Single prompt with explicit style constraints at a fixed resolution, to
/// keep per-image cost flat and output consistent.
fn build_image_prompt(item: &Item) -> String {
    let subject = if item.title_en.is_empty() { &item.title_pl } else { &item.title_en };
    let base = item
        .prompt
        .clone()
        .unwrap_or_else(|| format!("A simple {subject} coloring page"));

    format!(
        "{base}, black and white line art, coloring page, simple outlines, child-friendly, \
         suitable for kids, no text, empty areas to color, clean white background"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use colorforge_ai::{AiError, MockAiClient};
    use colorforge_core::{CategoryId, ItemId, ModerationStatus};
    use colorforge_queue::{BatchId, JobPayload, JobPriority, JobRecord};
    use colorforge_storage::AssetStorage;
    use colorforge_store::{MemoryStore, NewVariant, VariantStore};

    use crate::context::{PipelineConfig, Services};

    fn approved_item() -> Item {
        let now = Utc::now();
        Item {
            id: ItemId::new(),
            slug: "lew".to_string(),
            title_pl: "Lew".to_string(),
            title_en: "Lion".to_string(),
            category_id: CategoryId::new(),
            prompt: Some("a friendly lion".to_string()),
            keywords: vec![],
            age_min: 3,
            age_max: 10,
            difficulty: 1,
            is_published: false,
            published_at: None,
            moderation_status: ModerationStatus::Approved,
            moderation_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn services(ai: Arc<MockAiClient>) -> Services {
        let config = PipelineConfig {
            retry: colorforge_retry::RetryConfig::default()
                .with_max_attempts(1)
                .with_base_delay(Duration::from_millis(1)),
            image_backoff_base: Duration::from_millis(1),
            ..PipelineConfig::default()
        };
        Services::new(
            Arc::new(MemoryStore::new()),
            ai,
            AssetStorage::in_memory("https://cdn.test"),
            config,
        )
    }

    fn job(item_id: ItemId) -> JobRecord {
        JobRecord::new(
            BatchId::for_date(Utc::now().date_naive()),
            JobPayload::Generate { item_id, prompt: "p".to_string() },
            JobPriority::Normal,
        )
    }

    async fn ctx_with_variant<'a>(
        services: &'a Services,
        job: &'a JobRecord,
        item: Item,
    ) -> StepContext<'a> {
        let variants = services
            .store
            .insert_variants(&[NewVariant {
                item_id: item.id,
                locale: colorforge_core::Locale::Pl,
                format: colorforge_core::AssetFormat::Png,
                title: "Lew na sawannie kolorowanka".to_string(),
                description: "d".to_string(),
                canonical_url: "/kolorowanki/lew/pl".to_string(),
                meta_title: None,
                meta_description: None,
                content_hash: "hash".to_string(),
            }])
            .await
            .unwrap();
        let mut ctx = StepContext::new(services, job, item);
        ctx.variants = variants;
        ctx
    }

    #[tokio::test]
    async fn produces_image_bytes() {
        let ai = Arc::new(MockAiClient::new());
        let services = services(ai);
        let item = approved_item();
        let job = job(item.id);
        let mut ctx = ctx_with_variant(&services, &job, item).await;

        run(&mut ctx).await.unwrap();
        let bytes = ctx.image_bytes.unwrap();
        assert_eq!(&bytes[..4], &[0x89, 0x50, 0x4E, 0x47]);
    }

    #[tokio::test]
    async fn requires_a_variant() {
        let ai = Arc::new(MockAiClient::new());
        let services = services(ai.clone());
        let item = approved_item();
        let job = job(item.id);
        let mut ctx = StepContext::new(&services, &job, item);

        let err = run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, StepError::MissingVariant));
        assert_eq!(ai.image_calls(), 0);
    }

    #[tokio::test]
    async fn requires_approval() {
        let ai = Arc::new(MockAiClient::new());
        let services = services(ai.clone());
        let mut item = approved_item();
        item.moderation_status = ModerationStatus::NeedsReview;
        let job = job(item.id);
        let mut ctx = ctx_with_variant(&services, &job, item).await;

        let err = run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, StepError::NotApproved));
        assert_eq!(ai.image_calls(), 0);
    }

    #[tokio::test]
    async fn inner_loop_retries_then_succeeds() {
        let ai = Arc::new(MockAiClient::new());
        ai.push_image(Err(AiError::Status { status: 500, message: "boom".to_string() }));
        ai.push_image(Err(AiError::Status { status: 500, message: "boom".to_string() }));
        let services = services(ai.clone());
        let item = approved_item();
        let job = job(item.id);
        let mut ctx = ctx_with_variant(&services, &job, item).await;

        let checkpoint = run(&mut ctx).await.unwrap();
        assert_eq!(checkpoint["attempts"], 3);
        assert_eq!(ai.image_calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let ai = Arc::new(MockAiClient::new());
        for _ in 0..3 {
            ai.push_image(Err(AiError::Status { status: 503, message: "overloaded".to_string() }));
        }
        let services = services(ai.clone());
        let item = approved_item();
        let job = job(item.id);
        let mut ctx = ctx_with_variant(&services, &job, item).await;

        let err = run(&mut ctx).await.unwrap_err();
        match err {
            StepError::ImageGeneration { attempts: 3, .. } => {}
            other => panic!("expected image generation failure, got {other:?}"),
        }
        assert!(ctx.image_bytes.is_none());
    }
}
