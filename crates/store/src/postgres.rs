//! Postgres-backed store.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Duplicate` | checksum / storage key / slug / (job, step) collision |
//! | Database (other) | Any other | `Database` | Constraint or query failure |
//! | RowNotFound | N/A | `NotFound` | Update target missing |
//! | Other | N/A | `Database` | Network errors, pool closed, etc. |
//!
//! ## Thread Safety
//!
//! `PgStore` is `Send + Sync`; all operations go through the SQLx connection
//! pool.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::instrument;
use uuid::Uuid;

use colorforge_core::{
    Asset, AssetId, Item, ItemId, LogEntry, ModerationStatus, Variant, VariantId,
};
use colorforge_queue::{BatchId, JobId, JobPayload, JobRecord, JobStatus};

use crate::step::{JobStepRecord, StepName};
use crate::traits::{
    AssetStore, ItemStore, JobStepStore, JobStore, LogStore, NewAsset, NewVariant, StoreError,
    VariantStore, VariantText,
};

/// Postgres-backed [`crate::traits::Store`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool and run pending migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migrate: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_sqlx_error(op: &str, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound(op.to_string()),
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            StoreError::Duplicate(format!("{op}: {}", db.message()))
        }
        _ => StoreError::Database(format!("{op}: {err}")),
    }
}

fn decode<T, E: std::fmt::Display>(op: &str, result: Result<T, E>) -> Result<T, StoreError> {
    result.map_err(|e| StoreError::Decode(format!("{op}: {e}")))
}

#[derive(FromRow)]
struct ItemRow {
    id: Uuid,
    slug: String,
    title_pl: String,
    title_en: String,
    category_id: Uuid,
    prompt: Option<String>,
    keywords: Vec<String>,
    age_min: i32,
    age_max: i32,
    difficulty: i32,
    is_published: bool,
    published_at: Option<DateTime<Utc>>,
    moderation_status: String,
    moderation_note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ItemRow> for Item {
    type Error = StoreError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Item {
            id: ItemId::from_uuid(row.id),
            slug: row.slug,
            title_pl: row.title_pl,
            title_en: row.title_en,
            category_id: row.category_id.into(),
            prompt: row.prompt,
            keywords: row.keywords,
            age_min: row.age_min,
            age_max: row.age_max,
            difficulty: row.difficulty,
            is_published: row.is_published,
            published_at: row.published_at,
            moderation_status: decode("items.moderation_status", row.moderation_status.parse())?,
            moderation_note: row.moderation_note,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct VariantRow {
    id: Uuid,
    item_id: Uuid,
    locale: String,
    format: String,
    title: String,
    description: String,
    canonical_url: String,
    meta_title: Option<String>,
    meta_description: Option<String>,
    og_image: Option<String>,
    content_hash: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<VariantRow> for Variant {
    type Error = StoreError;

    fn try_from(row: VariantRow) -> Result<Self, Self::Error> {
        Ok(Variant {
            id: VariantId::from_uuid(row.id),
            item_id: ItemId::from_uuid(row.item_id),
            locale: decode("variants.locale", row.locale.parse())?,
            format: decode("variants.format", row.format.parse())?,
            title: row.title,
            description: row.description,
            canonical_url: row.canonical_url,
            meta_title: row.meta_title,
            meta_description: row.meta_description,
            og_image: row.og_image,
            content_hash: row.content_hash,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct AssetRow {
    id: Uuid,
    variant_id: Uuid,
    storage_key: String,
    storage_url: String,
    mime_type: String,
    file_size: i64,
    width: Option<i32>,
    height: Option<i32>,
    checksum: String,
    created_at: DateTime<Utc>,
}

impl From<AssetRow> for Asset {
    fn from(row: AssetRow) -> Self {
        Asset {
            id: AssetId::from_uuid(row.id),
            variant_id: VariantId::from_uuid(row.variant_id),
            storage_key: row.storage_key,
            storage_url: row.storage_url,
            mime_type: row.mime_type,
            file_size: row.file_size,
            width: row.width,
            height: row.height,
            checksum: row.checksum,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    batch_id: String,
    payload: JsonValue,
    status: String,
    priority: i32,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    backoff_seconds: i32,
    scheduled_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(JobRecord {
            id: JobId::from_uuid(row.id),
            batch_id: BatchId::from(row.batch_id),
            payload: decode("jobs.payload", serde_json::from_value::<JobPayload>(row.payload))?,
            status: decode("jobs.status", row.status.parse())?,
            priority: row.priority,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            last_error: row.last_error,
            backoff_seconds: row.backoff_seconds,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct JobStepRow {
    id: Uuid,
    job_id: Uuid,
    step_name: String,
    status: String,
    checkpoint_data: Option<JsonValue>,
    error_message: Option<String>,
    retry_count: i32,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobStepRow> for JobStepRecord {
    type Error = StoreError;

    fn try_from(row: JobStepRow) -> Result<Self, Self::Error> {
        Ok(JobStepRecord {
            id: row.id,
            job_id: JobId::from_uuid(row.job_id),
            step: decode("job_steps.step_name", row.step_name.parse())?,
            status: decode("job_steps.status", row.status.parse())?,
            checkpoint: row.checkpoint_data.unwrap_or(JsonValue::Null),
            error: row.error_message,
            retry_count: row.retry_count,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        })
    }
}

const ITEM_COLUMNS: &str = "id, slug, title_pl, title_en, category_id, prompt, keywords, \
     age_min, age_max, difficulty, is_published, published_at, moderation_status, \
     moderation_note, created_at, updated_at";

const VARIANT_COLUMNS: &str = "id, item_id, locale, format, title, description, canonical_url, \
     meta_title, meta_description, og_image, content_hash, created_at";

const ASSET_COLUMNS: &str = "id, variant_id, storage_key, storage_url, mime_type, file_size, \
     width, height, checksum, created_at";

const JOB_COLUMNS: &str = "id, batch_id, payload, status, priority, attempts, max_attempts, \
     last_error, backoff_seconds, scheduled_at, started_at, completed_at, created_at";

#[async_trait]
impl ItemStore for PgStore {
    #[instrument(skip(self, item), fields(item_id = %item.id), err)]
    async fn insert_item(&self, item: &Item) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO items
                (id, slug, title_pl, title_en, category_id, prompt, keywords, age_min, age_max,
                 difficulty, is_published, published_at, moderation_status, moderation_note,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(&item.slug)
        .bind(&item.title_pl)
        .bind(&item.title_en)
        .bind(item.category_id.as_uuid())
        .bind(&item.prompt)
        .bind(&item.keywords)
        .bind(item.age_min)
        .bind(item.age_max)
        .bind(item.difficulty)
        .bind(item.is_published)
        .bind(item.published_at)
        .bind(item.moderation_status.as_str())
        .bind(&item.moderation_note)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_item", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_item", e))?;
        row.map(Item::try_from).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_unpublished(&self, limit: usize) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE NOT is_published \
             ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_unpublished", e))?;
        rows.into_iter().map(Item::try_from).collect()
    }

    #[instrument(skip(self, note), fields(status = %status), err)]
    async fn set_moderation(
        &self,
        id: ItemId,
        status: ModerationStatus,
        note: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE items SET moderation_status = $2, moderation_note = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(note)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_moderation", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("items.id: {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn set_published(&self, id: ItemId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE items SET is_published = TRUE, published_at = $2, updated_at = $2 \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_published", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("items.id: {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl VariantStore for PgStore {
    #[instrument(skip(self, variants), fields(count = variants.len()), err)]
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

        // One transaction: the locale pair lands together or not at all.
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("insert_variants", e))?;
        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO variants
                    (id, item_id, locale, format, title, description, canonical_url,
                     meta_title, meta_description, og_image, content_hash, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(row.id.as_uuid())
            .bind(row.item_id.as_uuid())
            .bind(row.locale.as_str())
            .bind(row.format.as_str())
            .bind(&row.title)
            .bind(&row.description)
            .bind(&row.canonical_url)
            .bind(&row.meta_title)
            .bind(&row.meta_description)
            .bind(&row.og_image)
            .bind(&row.content_hash)
            .bind(row.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_variants", e))?;
        }
        tx.commit().await.map_err(|e| map_sqlx_error("insert_variants", e))?;

        Ok(rows)
    }

    #[instrument(skip(self), err)]
    async fn variants_for_item(&self, item_id: ItemId) -> Result<Vec<Variant>, StoreError> {
        let rows = sqlx::query_as::<_, VariantRow>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM variants WHERE item_id = $1 ORDER BY created_at"
        ))
        .bind(item_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("variants_for_item", e))?;
        rows.into_iter().map(Variant::try_from).collect()
    }

    #[instrument(skip(self, text), err)]
    async fn update_variant_text(
        &self,
        id: VariantId,
        text: &VariantText,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE variants SET title = $2, description = $3, meta_title = $4, \
             meta_description = $5, content_hash = $6 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(&text.title)
        .bind(&text.description)
        .bind(&text.meta_title)
        .bind(&text.meta_description)
        .bind(&text.content_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_variant_text", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("variants.id: {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, url), err)]
    async fn set_og_image(&self, id: VariantId, url: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE variants SET og_image = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_og_image", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("variants.id: {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl AssetStore for PgStore {
    #[instrument(skip(self, checksum), err)]
    async fn find_asset_by_checksum(&self, checksum: &str) -> Result<Option<Asset>, StoreError> {
        let row = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE checksum = $1"
        ))
        .bind(checksum)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_asset_by_checksum", e))?;
        Ok(row.map(Asset::from))
    }

    #[instrument(skip(self, key), err)]
    async fn find_asset_by_storage_key(&self, key: &str) -> Result<Option<Asset>, StoreError> {
        let row = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE storage_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_asset_by_storage_key", e))?;
        Ok(row.map(Asset::from))
    }

    #[instrument(skip(self, asset), fields(storage_key = %asset.storage_key), err)]
    async fn insert_asset(&self, asset: &NewAsset) -> Result<Asset, StoreError> {
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
        sqlx::query(
            r#"
            INSERT INTO assets
                (id, variant_id, storage_key, storage_url, mime_type, file_size, width, height,
                 checksum, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(row.id.as_uuid())
        .bind(row.variant_id.as_uuid())
        .bind(&row.storage_key)
        .bind(&row.storage_url)
        .bind(&row.mime_type)
        .bind(row.file_size)
        .bind(row.width)
        .bind(row.height)
        .bind(&row.checksum)
        .bind(row.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_asset", e))?;
        Ok(row)
    }

    #[instrument(skip(self), err)]
    async fn assets_for_variant(&self, variant_id: VariantId) -> Result<Vec<Asset>, StoreError> {
        let rows = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE variant_id = $1 ORDER BY created_at"
        ))
        .bind(variant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("assets_for_variant", e))?;
        Ok(rows.into_iter().map(Asset::from).collect())
    }
}

#[async_trait]
impl JobStore for PgStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type()), err)]
    async fn insert_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_value(&job.payload)
            .map_err(|e| StoreError::Decode(format!("jobs.payload: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, batch_id, job_type, item_id, payload, status, priority, attempts,
                 max_attempts, last_error, backoff_seconds, scheduled_at, started_at,
                 completed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.batch_id.as_str())
        .bind(job.job_type().as_str())
        .bind(job.payload.item_id().map(|id| *id.as_uuid()))
        .bind(payload)
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(&job.last_error)
        .bind(job.backoff_seconds)
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_job", e))?;
        row.map(JobRecord::try_from).transpose()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status), err)]
    async fn update_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = $2, attempts = $3, last_error = $4, backoff_seconds = $5,
                scheduled_at = $6, started_at = $7, completed_at = $8
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.attempts)
        .bind(&job.last_error)
        .bind(job.backoff_seconds)
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_job", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("jobs.id: {}", job.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_jobs_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, JobRow>(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 \
                     ORDER BY created_at LIMIT $2"
                ))
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, JobRow>(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at LIMIT $1"
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("list_jobs_by_status", e))?;
        rows.into_iter().map(JobRecord::try_from).collect()
    }

    #[instrument(skip(self), err)]
    async fn batch_for_date(&self, date_prefix: &str) -> Result<Option<BatchId>, StoreError> {
        let batch: Option<(String,)> =
            sqlx::query_as("SELECT batch_id FROM jobs WHERE batch_id LIKE $1 LIMIT 1")
                .bind(format!("{date_prefix}%"))
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("batch_for_date", e))?;
        Ok(batch.map(|(id,)| BatchId::from(id)))
    }

    #[instrument(skip(self), err)]
    async fn item_ids_in_batch(&self, batch_id: &BatchId) -> Result<HashSet<ItemId>, StoreError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT item_id FROM jobs WHERE batch_id = $1 AND item_id IS NOT NULL",
        )
        .bind(batch_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("item_ids_in_batch", e))?;
        Ok(rows.into_iter().map(|(id,)| ItemId::from_uuid(id)).collect())
    }

    #[instrument(skip(self), err)]
    async fn pending_jobs_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' AND scheduled_at <= $1 \
             ORDER BY priority, created_at LIMIT $2"
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending_jobs_due", e))?;
        rows.into_iter().map(JobRecord::try_from).collect()
    }
}

#[async_trait]
impl JobStepStore for PgStore {
    #[instrument(skip(self), fields(step = %step), err)]
    async fn get_step(
        &self,
        job_id: JobId,
        step: StepName,
    ) -> Result<Option<JobStepRecord>, StoreError> {
        let row = sqlx::query_as::<_, JobStepRow>(
            "SELECT id, job_id, step_name, status, checkpoint_data, error_message, retry_count, \
             started_at, completed_at, created_at \
             FROM job_steps WHERE job_id = $1 AND step_name = $2",
        )
        .bind(job_id.as_uuid())
        .bind(step.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_step", e))?;
        row.map(JobStepRecord::try_from).transpose()
    }

    #[instrument(skip(self, record), fields(job_id = %record.job_id, step = %record.step), err)]
    async fn upsert_step(&self, record: &JobStepRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_steps
                (id, job_id, step_name, status, checkpoint_data, error_message, retry_count,
                 started_at, completed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (job_id, step_name) DO UPDATE SET
                status = EXCLUDED.status,
                checkpoint_data = EXCLUDED.checkpoint_data,
                error_message = EXCLUDED.error_message,
                retry_count = EXCLUDED.retry_count,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(record.id)
        .bind(record.job_id.as_uuid())
        .bind(record.step.as_str())
        .bind(record.status.as_str())
        .bind(&record.checkpoint)
        .bind(&record.error)
        .bind(record.retry_count)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_step", e))?;
        Ok(())
    }
}

#[async_trait]
impl LogStore for PgStore {
    #[instrument(skip(self, entry), fields(source = %entry.source), err)]
    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO logs (level, source, job_id, message, context, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.level.as_str())
        .bind(&entry.source)
        .bind(entry.job_id)
        .bind(&entry.message)
        .bind(&entry.context)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_log", e))?;
        Ok(())
    }
}
