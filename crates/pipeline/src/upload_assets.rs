//! Asset-upload step.
//!
//! Storage keys are deterministic functions of slug/locale/role/format, and
//! both the checksum and the storage key are pre-checked before any write,
//! so re-entry after a crash never duplicates storage objects or asset rows.
//! Oversize payloads are rejected as fatal before touching storage.

use bytes::Bytes;
use serde_json::json;
use tracing::{debug, info};

use colorforge_core::{Asset, AssetRole, storage_key};
use colorforge_retry::with_retry;
use colorforge_store::{AssetStore, NewAsset, VariantStore};

use crate::context::StepContext;
use crate::error::StepError;

/// True when the upload path already ran to completion for this job.
///
/// The social-image URL is the last write of the upload step, per variant,
/// so its presence on every variant proves the assets are in place. Lets the
/// runner skip regenerating a paid image on re-delivery.
pub fn assets_complete(ctx: &StepContext<'_>) -> bool {
    !ctx.variants.is_empty() && ctx.variants.iter().all(|v| v.og_image.is_some())
}

pub async fn run(ctx: &mut StepContext<'_>) -> Result<serde_json::Value, StepError> {
    let bytes = ctx
        .image_bytes
        .clone()
        .ok_or_else(|| StepError::InvalidImage("no image bytes in context".to_string()))?;

    let max = ctx.services.config.max_asset_bytes;
    if bytes.len() > max {
        return Err(StepError::AssetTooLarge { size: bytes.len(), max });
    }

    let checksum = colorforge_core::content_hash(&bytes);
    let mut asset_ids = Vec::new();

    for index in 0..ctx.variants.len() {
        let variant = ctx.variants[index].clone();
        let mut preview_url = None;

        for role in [AssetRole::Preview, AssetRole::Print] {
            let key = storage_key(&ctx.item.slug, variant.locale, role, variant.format);
            let asset =
                upload_one(ctx, &variant, &key, bytes.clone(), &checksum).await?;
            if role == AssetRole::Preview {
                preview_url = Some(asset.storage_url.clone());
            }
            asset_ids.push(asset.id);
        }

        // Social image points at the preview rendition.
        if let Some(url) = preview_url {
            ctx.services.store.set_og_image(variant.id, &url).await?;
            ctx.variants[index].og_image = Some(url);
        }
    }

    asset_ids.dedup();
    info!(item_id = %ctx.item.id, assets = asset_ids.len(), "assets uploaded");
    Ok(json!({"asset_ids": asset_ids, "checksum": checksum}))
}

/// Upload one rendition: checksum dedup wins first, then storage-key reuse,
/// then the actual write.
async fn upload_one(
    ctx: &StepContext<'_>,
    variant: &colorforge_core::Variant,
    key: &str,
    bytes: Bytes,
    checksum: &str,
) -> Result<Asset, StepError> {
    if let Some(existing) = ctx.services.store.find_asset_by_checksum(checksum).await? {
        debug!(key, checksum, "identical bytes already stored, reusing asset row");
        return Ok(existing);
    }
    if let Some(existing) = ctx.services.store.find_asset_by_storage_key(key).await? {
        debug!(key, "storage key already has an asset row, reusing");
        return Ok(existing);
    }

    let mime = variant.format.mime_type();
    let url = with_retry(&ctx.services.config.retry, "storage.put_object", || {
        ctx.services.storage.put_object(key, bytes.clone(), mime)
    })
    .await
    .map_err(|e| StepError::Storage(e.to_string()))?;

    let (width, height) = ctx.image_dims.unzip();
    let asset = ctx
        .services
        .store
        .insert_asset(&NewAsset {
            variant_id: variant.id,
            storage_key: key.to_string(),
            storage_url: url,
            mime_type: mime.to_string(),
            file_size: bytes.len() as i64,
            width: width.map(|w| w as i32),
            height: height.map(|h| h as i32),
            checksum: checksum.to_string(),
        })
        .await?;
    Ok(asset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;

    use colorforge_ai::MockAiClient;
    use colorforge_ai::mock::PLACEHOLDER_PNG;
    use colorforge_core::{CategoryId, Item, ItemId, Locale, ModerationStatus};
    use colorforge_queue::{BatchId, JobPayload, JobPriority, JobRecord};
    use colorforge_storage::AssetStorage;
    use colorforge_store::{AssetStore, MemoryStore, NewVariant, VariantStore};

    use crate::context::{PipelineConfig, Services};

    fn item() -> Item {
        let now = Utc::now();
        Item {
            id: ItemId::new(),
            slug: "lew".to_string(),
            title_pl: "Lew".to_string(),
            title_en: "Lion".to_string(),
            category_id: CategoryId::new(),
            prompt: None,
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

    fn services(store: Arc<MemoryStore>) -> Services {
        Services::new(
            store,
            Arc::new(MockAiClient::new()),
            AssetStorage::in_memory("https://cdn.test"),
            PipelineConfig::default(),
        )
    }

    fn job(item_id: ItemId) -> JobRecord {
        JobRecord::new(
            BatchId::for_date(Utc::now().date_naive()),
            JobPayload::Generate { item_id, prompt: "p".to_string() },
            JobPriority::Normal,
        )
    }

    async fn ctx_with_variants<'a>(
        services: &'a Services,
        job: &'a JobRecord,
        item: Item,
    ) -> StepContext<'a> {
        let variants = services
            .store
            .insert_variants(&[
                NewVariant {
                    item_id: item.id,
                    locale: Locale::Pl,
                    format: colorforge_core::AssetFormat::Png,
                    title: "Lew kolorowanka dla dzieci".to_string(),
                    description: "opis".to_string(),
                    canonical_url: "/kolorowanki/lew/pl".to_string(),
                    meta_title: None,
                    meta_description: None,
                    content_hash: "hash-pl".to_string(),
                },
                NewVariant {
                    item_id: item.id,
                    locale: Locale::En,
                    format: colorforge_core::AssetFormat::Png,
                    title: "Lion coloring page for kids".to_string(),
                    description: "description".to_string(),
                    canonical_url: "/kolorowanki/lew/en".to_string(),
                    meta_title: None,
                    meta_description: None,
                    content_hash: "hash-en".to_string(),
                },
            ])
            .await
            .unwrap();
        let mut ctx = StepContext::new(services, job, item);
        ctx.variants = variants;
        ctx.image_bytes = Some(Bytes::from_static(PLACEHOLDER_PNG));
        ctx.image_dims = Some((1, 1));
        ctx
    }

    #[tokio::test]
    async fn identical_bytes_dedupe_to_one_asset_row() {
        let store = Arc::new(MemoryStore::new());
        let services = services(store.clone());
        let item = item();
        let job = job(item.id);
        let mut ctx = ctx_with_variants(&services, &job, item).await;

        let checkpoint = run(&mut ctx).await.unwrap();

        // Four uploads (2 locales x 2 roles) of identical bytes: one row.
        let asset_ids = checkpoint["asset_ids"].as_array().unwrap();
        assert_eq!(asset_ids.len(), 1);

        let checksum = colorforge_core::content_hash(PLACEHOLDER_PNG);
        let asset = store.find_asset_by_checksum(&checksum).await.unwrap().unwrap();
        assert_eq!(asset.file_size, PLACEHOLDER_PNG.len() as i64);
        assert_eq!(asset.width, Some(1));
    }

    #[tokio::test]
    async fn rerun_returns_existing_assets() {
        let store = Arc::new(MemoryStore::new());
        let services = services(store.clone());
        let item = item();
        let job = job(item.id);
        let mut ctx = ctx_with_variants(&services, &job, item.clone()).await;

        let first = run(&mut ctx).await.unwrap();
        let second = run(&mut ctx).await.unwrap();
        assert_eq!(first["checksum"], second["checksum"]);
        assert_eq!(first["asset_ids"], second["asset_ids"]);
    }

    #[tokio::test]
    async fn sets_social_image_to_preview_url() {
        let store = Arc::new(MemoryStore::new());
        let services = services(store.clone());
        let item = item();
        let item_id = item.id;
        let job = job(item_id);
        let mut ctx = ctx_with_variants(&services, &job, item).await;

        run(&mut ctx).await.unwrap();

        let variants = store.variants_for_item(item_id).await.unwrap();
        for variant in variants {
            let og = variant.og_image.expect("og image set");
            assert!(og.starts_with("https://cdn.test/assets/lew/"));
        }
    }

    #[tokio::test]
    async fn oversize_payload_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let mut services = services(store);
        services.config.max_asset_bytes = 8;
        let item = item();
        let job = job(item.id);
        let mut ctx = ctx_with_variants(&services, &job, item).await;

        let err = run(&mut ctx).await.unwrap_err();
        match err {
            StepError::AssetTooLarge { size, max } => {
                assert_eq!(size, PLACEHOLDER_PNG.len());
                assert_eq!(max, 8);
            }
            other => panic!("expected oversize rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn assets_complete_reflects_uploaded_state() {
        let store = Arc::new(MemoryStore::new());
        let services = services(store);
        let item = item();
        let job = job(item.id);
        let mut ctx = ctx_with_variants(&services, &job, item).await;

        assert!(!assets_complete(&ctx));
        run(&mut ctx).await.unwrap();
        assert!(assets_complete(&ctx));
    }
}
