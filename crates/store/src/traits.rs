//! Store trait seam.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use colorforge_core::{
    Asset, AssetFormat, Item, ItemId, Locale, LogEntry, ModerationStatus, Variant, VariantId,
};
use colorforge_queue::{BatchId, JobId, JobRecord, JobStatus};

use crate::step::{JobStepRecord, StepName};

/// Store-layer error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("row not found: {0}")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("row decode error: {0}")]
    Decode(String),
}

/// Insert shape for a variant (IDs and timestamps assigned by the store).
#[derive(Debug, Clone, PartialEq)]
pub struct NewVariant {
    pub item_id: ItemId,
    pub locale: Locale,
    pub format: AssetFormat,
    pub title: String,
    pub description: String,
    pub canonical_url: String,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub content_hash: String,
}

/// Replacement text for an existing variant (regeneration supersedes).
#[derive(Debug, Clone, PartialEq)]
pub struct VariantText {
    pub title: String,
    pub description: String,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub content_hash: String,
}

/// Insert shape for an asset.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAsset {
    pub variant_id: VariantId,
    pub storage_key: String,
    pub storage_url: String,
    pub mime_type: String,
    pub file_size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub checksum: String,
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn insert_item(&self, item: &Item) -> Result<(), StoreError>;

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>, StoreError>;

    /// Unpublished items, newest first. The scheduler's eligibility set.
    async fn list_unpublished(&self, limit: usize) -> Result<Vec<Item>, StoreError>;

    async fn set_moderation(
        &self,
        id: ItemId,
        status: ModerationStatus,
        note: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn set_published(&self, id: ItemId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait VariantStore: Send + Sync {
    /// Insert a set of variants atomically: either all rows land or none do.
    async fn insert_variants(&self, variants: &[NewVariant]) -> Result<Vec<Variant>, StoreError>;

    async fn variants_for_item(&self, item_id: ItemId) -> Result<Vec<Variant>, StoreError>;

    /// Supersede a variant's text in place (same row, new content).
    async fn update_variant_text(
        &self,
        id: VariantId,
        text: &VariantText,
    ) -> Result<(), StoreError>;

    async fn set_og_image(&self, id: VariantId, url: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn find_asset_by_checksum(&self, checksum: &str) -> Result<Option<Asset>, StoreError>;

    async fn find_asset_by_storage_key(&self, key: &str) -> Result<Option<Asset>, StoreError>;

    /// Insert an asset row. The checksum and storage key are unique; callers
    /// pre-check rather than relying on conflict errors.
    async fn insert_asset(&self, asset: &NewAsset) -> Result<Asset, StoreError>;

    async fn assets_for_variant(&self, variant_id: VariantId) -> Result<Vec<Asset>, StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &JobRecord) -> Result<(), StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Persist the mutable job fields. The single-writer convention applies:
    /// only the worker holding the dequeued job (or the admin retry path)
    /// calls this.
    async fn update_job(&self, job: &JobRecord) -> Result<(), StoreError>;

    async fn list_jobs_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError>;

    /// Any batch created on the day identified by `date_prefix`.
    async fn batch_for_date(&self, date_prefix: &str) -> Result<Option<BatchId>, StoreError>;

    /// Item IDs that already have a job in the batch.
    async fn item_ids_in_batch(&self, batch_id: &BatchId) -> Result<HashSet<ItemId>, StoreError>;

    /// Pending jobs whose scheduled time has passed, oldest-priority first.
    /// Drives the worker's store reconciliation sweep.
    async fn pending_jobs_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError>;
}

#[async_trait]
pub trait JobStepStore: Send + Sync {
    async fn get_step(
        &self,
        job_id: JobId,
        step: StepName,
    ) -> Result<Option<JobStepRecord>, StoreError>;

    /// Insert or replace the checkpoint for `(job, step)`.
    async fn upsert_step(&self, record: &JobStepRecord) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError>;
}

/// The full store surface the pipeline and worker operate against.
pub trait Store:
    ItemStore + VariantStore + AssetStore + JobStore + JobStepStore + LogStore
{
}

impl<T> Store for T where
    T: ItemStore + VariantStore + AssetStore + JobStore + JobStepStore + LogStore
{
}
