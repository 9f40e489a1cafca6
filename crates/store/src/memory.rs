//! In-memory store for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use colorforge_core::{
    Asset, AssetId, Item, ItemId, LogEntry, ModerationStatus, Variant, VariantId,
};
use colorforge_queue::{BatchId, JobId, JobRecord, JobStatus};

use crate::step::{JobStepRecord, StepName};
use crate::traits::{
    AssetStore, ItemStore, JobStepStore, JobStore, LogStore, NewAsset, NewVariant, StoreError,
    VariantStore, VariantText,
};

/// In-memory [`crate::traits::Store`] with the same uniqueness semantics as
/// the Postgres schema.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<ItemId, Item>>,
    variants: RwLock<HashMap<VariantId, Variant>>,
    assets: RwLock<HashMap<AssetId, Asset>>,
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    steps: RwLock<HashMap<(JobId, StepName), JobStepRecord>>,
    logs: RwLock<Vec<LogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs captured so far (test helper).
    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.read().unwrap().clone()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert_item(&self, item: &Item) -> Result<(), StoreError> {
        let mut items = self.items.write().unwrap();
        if items.values().any(|i| i.slug == item.slug) {
            return Err(StoreError::Duplicate(format!("items.slug: {}", item.slug)));
        }
        items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.items.read().unwrap().get(&id).cloned())
    }

    async fn list_unpublished(&self, limit: usize) -> Result<Vec<Item>, StoreError> {
        let items = self.items.read().unwrap();
        let mut result: Vec<_> = items.values().filter(|i| !i.is_published).cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.as_uuid().cmp(a.id.as_uuid())));
        result.truncate(limit);
        Ok(result)
    }

    async fn set_moderation(
        &self,
        id: ItemId,
        status: ModerationStatus,
        note: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut items = self.items.write().unwrap();
        let item = items
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("items.id: {id}")))?;
        item.moderation_status = status;
        item.moderation_note = note.map(str::to_string);
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn set_published(&self, id: ItemId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut items = self.items.write().unwrap();
        let item = items
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("items.id: {id}")))?;
        item.is_published = true;
        item.published_at = Some(at);
        item.updated_at = at;
        Ok(())
    }
}

#[async_trait]
impl VariantStore for MemoryStore {
    async fn insert_variants(&self, variants: &[NewVariant]) -> Result<Vec<Variant>, StoreError> {
        let now = Utc::now();
        let rows: Vec<Variant> = variants
            .iter()
            .map(|v| Variant {
                id: VariantId::new(),
                item_id: v.item_id,
                locale: v.locale,
                format: v.format,
                title: v.title.clone(),
                description: v.description.clone(),
                canonical_url: v.canonical_url.clone(),
                meta_title: v.meta_title.clone(),
                meta_description: v.meta_description.clone(),
                og_image: None,
                content_hash: v.content_hash.clone(),
                created_at: now,
            })
            .collect();

        // Single write lock: the whole set lands or none of it does.
        let mut store = self.variants.write().unwrap();
        for row in &rows {
            store.insert(row.id, row.clone());
        }
        Ok(rows)
    }

    async fn variants_for_item(&self, item_id: ItemId) -> Result<Vec<Variant>, StoreError> {
        let variants = self.variants.read().unwrap();
        let mut result: Vec<_> =
            variants.values().filter(|v| v.item_id == item_id).cloned().collect();
        result.sort_by_key(|v| v.created_at);
        Ok(result)
    }

    async fn update_variant_text(
        &self,
        id: VariantId,
        text: &VariantText,
    ) -> Result<(), StoreError> {
        let mut variants = self.variants.write().unwrap();
        let variant = variants
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("variants.id: {id}")))?;
        variant.title = text.title.clone();
        variant.description = text.description.clone();
        variant.meta_title = text.meta_title.clone();
        variant.meta_description = text.meta_description.clone();
        variant.content_hash = text.content_hash.clone();
        Ok(())
    }

    async fn set_og_image(&self, id: VariantId, url: &str) -> Result<(), StoreError> {
        let mut variants = self.variants.write().unwrap();
        let variant = variants
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("variants.id: {id}")))?;
        variant.og_image = Some(url.to_string());
        Ok(())
    }
}

#[async_trait]
impl AssetStore for MemoryStore {
    async fn find_asset_by_checksum(&self, checksum: &str) -> Result<Option<Asset>, StoreError> {
        let assets = self.assets.read().unwrap();
        Ok(assets.values().find(|a| a.checksum == checksum).cloned())
    }

    async fn find_asset_by_storage_key(&self, key: &str) -> Result<Option<Asset>, StoreError> {
        let assets = self.assets.read().unwrap();
        Ok(assets.values().find(|a| a.storage_key == key).cloned())
    }

    async fn insert_asset(&self, asset: &NewAsset) -> Result<Asset, StoreError> {
        let mut assets = self.assets.write().unwrap();
        if assets.values().any(|a| a.checksum == asset.checksum) {
            return Err(StoreError::Duplicate(format!("assets.checksum: {}", asset.checksum)));
        }
        if assets.values().any(|a| a.storage_key == asset.storage_key) {
            return Err(StoreError::Duplicate(format!(
                "assets.storage_key: {}",
                asset.storage_key
            )));
        }
        let row = Asset {
            id: AssetId::new(),
            variant_id: asset.variant_id,
            storage_key: asset.storage_key.clone(),
            storage_url: asset.storage_url.clone(),
            mime_type: asset.mime_type.clone(),
            file_size: asset.file_size,
            width: asset.width,
            height: asset.height,
            checksum: asset.checksum.clone(),
            created_at: Utc::now(),
        };
        assets.insert(row.id, row.clone());
        Ok(row)
    }

    async fn assets_for_variant(&self, variant_id: VariantId) -> Result<Vec<Asset>, StoreError> {
        let assets = self.assets.read().unwrap();
        let mut result: Vec<_> =
            assets.values().filter(|a| a.variant_id == variant_id).cloned().collect();
        result.sort_by_key(|a| a.created_at);
        Ok(result)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(format!("jobs.id: {}", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn update_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if !jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound(format!("jobs.id: {}", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn list_jobs_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        result.sort_by_key(|j| j.created_at);
        result.truncate(limit);
        Ok(result)
    }

    async fn batch_for_date(&self, date_prefix: &str) -> Result<Option<BatchId>, StoreError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .values()
            .map(|j| &j.batch_id)
            .find(|b| b.as_str().starts_with(date_prefix))
            .cloned())
    }

    async fn item_ids_in_batch(&self, batch_id: &BatchId) -> Result<HashSet<ItemId>, StoreError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .values()
            .filter(|j| &j.batch_id == batch_id)
            .filter_map(|j| j.payload.item_id())
            .collect())
    }

    async fn pending_jobs_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.scheduled_at <= now)
            .cloned()
            .collect();
        result.sort_by_key(|j| (j.priority, j.created_at));
        result.truncate(limit);
        Ok(result)
    }
}

#[async_trait]
impl JobStepStore for MemoryStore {
    async fn get_step(
        &self,
        job_id: JobId,
        step: StepName,
    ) -> Result<Option<JobStepRecord>, StoreError> {
        Ok(self.steps.read().unwrap().get(&(job_id, step)).cloned())
    }

    async fn upsert_step(&self, record: &JobStepRecord) -> Result<(), StoreError> {
        let mut steps = self.steps.write().unwrap();
        steps.insert((record.job_id, record.step), record.clone());
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        self.logs.write().unwrap().push(entry.clone());
        Ok(())
    }
}
