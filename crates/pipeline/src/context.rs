//! Shared services bundle and the per-job execution context.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use colorforge_ai::AiClient;
use colorforge_core::{Item, Variant};
use colorforge_queue::JobRecord;
use colorforge_retry::RetryConfig;
use colorforge_storage::AssetStorage;
use colorforge_store::{Store, VariantStore};

use crate::error::StepError;

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Retry policy for provider/storage calls.
    pub retry: RetryConfig,
    /// Hard cap on a single asset. Oversize is fatal, not retryable.
    pub max_asset_bytes: usize,
    /// Inner retry budget for image generation, layered over the generic
    /// retry utility.
    pub image_attempts: u32,
    /// Base delay of the inner image retry loop.
    pub image_backoff_base: Duration,
    /// Extra generation attempts allowed when the content hash collides with
    /// an existing variant.
    pub text_regen_attempts: u32,
    /// Token budget for one text generation call.
    pub max_text_tokens: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_asset_bytes: 10 * 1024 * 1024,
            image_attempts: 3,
            image_backoff_base: Duration::from_secs(1),
            text_regen_attempts: 2,
            max_text_tokens: 1500,
        }
    }
}

/// Everything a step may talk to, owned by the process and passed by
/// reference. No ambient globals.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub ai: Arc<dyn AiClient>,
    pub storage: AssetStorage,
    pub config: PipelineConfig,
}

impl Services {
    pub fn new(
        store: Arc<dyn Store>,
        ai: Arc<dyn AiClient>,
        storage: AssetStorage,
        config: PipelineConfig,
    ) -> Self {
        Self { store, ai, storage, config }
    }
}

/// Per-job execution state threaded through the step sequence.
///
/// The item is loaded once at the start of the run; variants and image bytes
/// accumulate as steps complete. Image bytes are transient (never persisted
/// in a checkpoint), which is why the image steps re-run on redelivery
/// unless the final assets already exist.
pub struct StepContext<'a> {
    pub services: &'a Services,
    pub job: &'a JobRecord,
    pub item: Item,
    pub variants: Vec<Variant>,
    pub image_bytes: Option<Bytes>,
    pub image_dims: Option<(u32, u32)>,
}

impl<'a> StepContext<'a> {
    pub fn new(services: &'a Services, job: &'a JobRecord, item: Item) -> Self {
        Self {
            services,
            job,
            item,
            variants: Vec::new(),
            image_bytes: None,
            image_dims: None,
        }
    }

    /// (Re)load the item's variants from the store into the context.
    pub async fn load_variants(&mut self) -> Result<(), StepError> {
        self.variants = self.services.store.variants_for_item(self.item.id).await?;
        Ok(())
    }
}
