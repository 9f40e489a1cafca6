//! `colorforge-queue` — job identity, payloads, and the queue contract.
//!
//! Defines the tagged job payload union, deterministic per-day dedup keys
//! (the sole mechanism preventing double generation when the scheduler and a
//! manual retry race), the persisted job record state machine, queue tuning
//! knobs, and the [`JobQueue`] trait with an in-memory implementation plus an
//! optional Redis-backed one (`redis` feature).

pub mod config;
pub mod job;
pub mod queue;

#[cfg(feature = "redis")]
pub mod redis_queue;

pub use config::QueueConfig;
pub use job::{
    BatchId, JobId, JobPayload, JobPriority, JobRecord, JobStatus, JobType, RetryRejection,
};
pub use queue::{
    CleanupReport, Delivery, EnqueueOutcome, InMemoryQueue, JobQueue, NackOutcome, QueueEntry,
    QueueError, QueueName,
};

#[cfg(feature = "redis")]
pub use redis_queue::RedisQueue;
