//! `colorforge-store` — the relational store, single source of truth.
//!
//! Trait seam per entity with two implementations: Postgres (production) and
//! in-memory (tests/dev). Idempotency constraints live here: asset checksum
//! and storage key are unique, `(job, step)` checkpoints are unique, and the
//! variant pair for a generation run is inserted in one transaction.

pub mod memory;
pub mod postgres;
pub mod step;
pub mod traits;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use step::{JobStepRecord, StepName};
pub use traits::{
    AssetStore, ItemStore, JobStepStore, JobStore, LogStore, NewAsset, NewVariant, Store,
    StoreError, VariantStore, VariantText,
};
