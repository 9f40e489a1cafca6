//! Step failure taxonomy.

use thiserror::Error;

use colorforge_core::ItemId;
use colorforge_store::StoreError;

/// How a job run ended.
///
/// `Halted` is the moderation fail-closed path: a normal outcome, not a
/// failure. The item sits in `needs_review` until a human acts, so the queue
/// must not auto-retry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Halted { reason: String },
}

/// A step failure. Terminates the current job attempt; the worker records it
/// as `last_error` and lets the queue's backoff govern redelivery.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("item {0} not found")]
    ItemNotFound(ItemId),

    #[error("item is not approved for generation")]
    NotApproved,

    #[error("no variant exists for the item yet")]
    MissingVariant,

    /// Provider failure after the retry layer gave up (exhausted or fatal).
    #[error("ai provider error: {0}")]
    Ai(String),

    #[error("image generation failed after {attempts} attempts: {last}")]
    ImageGeneration { attempts: u32, last: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Malformed or policy-violating generated content. Fatal for the
    /// attempt; never retried within the step.
    #[error("content validation failed: {0}")]
    Validation(String),

    #[error("duplicate content persisted after {0} regeneration attempts")]
    DuplicateContent(u32),

    #[error("invalid image payload: {0}")]
    InvalidImage(String),

    /// Oversize payloads are rejected outright, not retried.
    #[error("asset too large: {size} bytes (max: {max})")]
    AssetTooLarge { size: usize, max: usize },
}
