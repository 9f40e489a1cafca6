//! The queue contract and the in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::job::{JobId, JobPayload};

/// Named queues consumed by workers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Generation,
    Publishing,
    Sitemap,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Generation => "generation",
            QueueName::Publishing => "publishing",
            QueueName::Sitemap => "sitemap",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queue admission: the dedup key, the authoritative store row it mirrors,
/// and the payload workers execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Deterministic fingerprint; the queue admits each fingerprint at most
    /// once while a previous admission is non-terminal.
    pub dedup_key: String,
    /// The job row in the relational store. The store is authoritative; the
    /// queue is an accelerant.
    pub record_id: JobId,
    pub payload: JobPayload,
    /// Lower is processed first.
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(dedup_key: String, record_id: JobId, payload: JobPayload, priority: i32) -> Self {
        Self {
            dedup_key,
            record_id,
            payload,
            priority,
            enqueued_at: Utc::now(),
        }
    }
}

/// A reserved entry handed to a worker.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub entry: QueueEntry,
    /// 1-indexed delivery attempt (stalled redeliveries included).
    pub attempt: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A non-terminal entry with the same dedup key already exists.
    Duplicate,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// Rescheduled for redelivery after the given backoff.
    Requeued,
    /// Delivery attempts exhausted; the entry is parked as failed.
    Exhausted,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_completed: usize,
    pub removed_failed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("entry is not reserved: {0}")]
    NotReserved(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Queue abstraction.
///
/// Contract: exactly-once *admission* per dedup key (while non-terminal),
/// at-least-once *delivery*. Every reservation must be settled with `ack` or
/// `nack`; unsettled reservations reappear after the lock expires and count
/// toward the stall limit.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        queue: QueueName,
        entry: QueueEntry,
    ) -> Result<EnqueueOutcome, QueueError>;

    /// Claim the next ready entry, if any.
    async fn reserve(&self, queue: QueueName) -> Result<Option<Delivery>, QueueError>;

    /// Settle a reservation as successfully processed.
    async fn ack(&self, queue: QueueName, dedup_key: &str) -> Result<(), QueueError>;

    /// Settle a reservation as failed; the queue applies its own
    /// attempts/backoff policy to decide between redelivery and parking.
    async fn nack(
        &self,
        queue: QueueName,
        dedup_key: &str,
        backoff: Duration,
    ) -> Result<NackOutcome, QueueError>;

    /// Whether a non-terminal entry with this dedup key exists. Used by the
    /// store reconciliation sweep.
    async fn contains(&self, queue: QueueName, dedup_key: &str) -> Result<bool, QueueError>;

    /// Apply retention windows to parked entries.
    async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport, QueueError>;
}

#[derive(Debug, Clone)]
struct PendingEntry {
    entry: QueueEntry,
    not_before: DateTime<Utc>,
    attempts: u32,
    stalls: u32,
}

#[derive(Debug, Clone)]
struct ReservedEntry {
    entry: QueueEntry,
    deadline: DateTime<Utc>,
    attempts: u32,
    stalls: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParkedStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct ParkedEntry {
    status: ParkedStatus,
    parked_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<PendingEntry>,
    reserved: HashMap<String, ReservedEntry>,
    parked: HashMap<String, ParkedEntry>,
}

/// In-memory queue for tests/dev and for single-process deployments where
/// the store reconciliation sweep is the durability story.
#[derive(Debug)]
pub struct InMemoryQueue {
    config: QueueConfig,
    queues: Mutex<HashMap<QueueName, QueueState>>,
}

impl InMemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Expire reserved entries whose lock has run out.
    ///
    /// A stalled entry goes back to pending unless it has stalled more than
    /// `max_stalled_count` times, in which case it is forced to failed.
    fn reclaim_stalled(&self, state: &mut QueueState, now: DateTime<Utc>) {
        let expired: Vec<String> = state
            .reserved
            .iter()
            .filter(|(_, r)| r.deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();

        for key in expired {
            let reserved = state.reserved.remove(&key).expect("key collected above");
            let stalls = reserved.stalls + 1;
            if stalls > self.config.max_stalled_count {
                warn!(dedup_key = %key, stalls, "job stalled too often, forcing failed");
                state.parked.insert(
                    key,
                    ParkedEntry { status: ParkedStatus::Failed, parked_at: now },
                );
            } else {
                warn!(dedup_key = %key, stalls, "reclaiming stalled job");
                state.pending.push(PendingEntry {
                    entry: reserved.entry,
                    not_before: now,
                    attempts: reserved.attempts,
                    stalls,
                });
            }
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        entry: QueueEntry,
    ) -> Result<EnqueueOutcome, QueueError> {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue).or_default();

        let key = entry.dedup_key.clone();
        let live = state.pending.iter().any(|p| p.entry.dedup_key == key)
            || state.reserved.contains_key(&key);
        if live {
            debug!(queue = %queue, dedup_key = %key, "duplicate enqueue suppressed");
            return Ok(EnqueueOutcome::Duplicate);
        }

        // A parked (terminal) entry no longer blocks admission.
        state.parked.remove(&key);

        state.pending.push(PendingEntry {
            entry,
            not_before: Utc::now(),
            attempts: 0,
            stalls: 0,
        });
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn reserve(&self, queue: QueueName) -> Result<Option<Delivery>, QueueError> {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue).or_default();
        let now = Utc::now();

        self.reclaim_stalled(state, now);

        let ready_index = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.not_before <= now)
            .min_by_key(|(_, p)| (p.entry.priority, p.entry.enqueued_at))
            .map(|(i, _)| i);

        let Some(index) = ready_index else {
            return Ok(None);
        };

        let pending = state.pending.swap_remove(index);
        let attempts = pending.attempts + 1;
        let delivery = Delivery { entry: pending.entry.clone(), attempt: attempts };

        state.reserved.insert(
            pending.entry.dedup_key.clone(),
            ReservedEntry {
                entry: pending.entry,
                deadline: now
                    + chrono::Duration::from_std(self.config.lock_duration).unwrap_or_default(),
                attempts,
                stalls: pending.stalls,
            },
        );

        Ok(Some(delivery))
    }

    async fn ack(&self, queue: QueueName, dedup_key: &str) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue).or_default();

        state
            .reserved
            .remove(dedup_key)
            .ok_or_else(|| QueueError::NotReserved(dedup_key.to_string()))?;
        state.parked.insert(
            dedup_key.to_string(),
            ParkedEntry { status: ParkedStatus::Completed, parked_at: Utc::now() },
        );
        Ok(())
    }

    async fn nack(
        &self,
        queue: QueueName,
        dedup_key: &str,
        backoff: Duration,
    ) -> Result<NackOutcome, QueueError> {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue).or_default();
        let now = Utc::now();

        let reserved = state
            .reserved
            .remove(dedup_key)
            .ok_or_else(|| QueueError::NotReserved(dedup_key.to_string()))?;

        if reserved.attempts >= self.config.max_attempts {
            state.parked.insert(
                dedup_key.to_string(),
                ParkedEntry { status: ParkedStatus::Failed, parked_at: now },
            );
            return Ok(NackOutcome::Exhausted);
        }

        state.pending.push(PendingEntry {
            entry: reserved.entry,
            not_before: now + chrono::Duration::from_std(backoff).unwrap_or_default(),
            attempts: reserved.attempts,
            stalls: reserved.stalls,
        });
        Ok(NackOutcome::Requeued)
    }

    async fn contains(&self, queue: QueueName, dedup_key: &str) -> Result<bool, QueueError> {
        let queues = self.queues.lock().unwrap();
        Ok(queues.get(&queue).is_some_and(|state| {
            state.pending.iter().any(|p| p.entry.dedup_key == dedup_key)
                || state.reserved.contains_key(dedup_key)
        }))
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport, QueueError> {
        let completed_cutoff =
            now - chrono::Duration::from_std(self.config.remove_completed_after).unwrap_or_default();
        let failed_cutoff =
            now - chrono::Duration::from_std(self.config.remove_failed_after).unwrap_or_default();

        let mut report = CleanupReport::default();
        let mut queues = self.queues.lock().unwrap();
        for state in queues.values_mut() {
            state.parked.retain(|_, parked| match parked.status {
                ParkedStatus::Completed => {
                    let keep = parked.parked_at > completed_cutoff;
                    if !keep {
                        report.removed_completed += 1;
                    }
                    keep
                }
                ParkedStatus::Failed => {
                    let keep = parked.parked_at > failed_cutoff;
                    if !keep {
                        report.removed_failed += 1;
                    }
                    keep
                }
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobPayload, JobPriority};
    use colorforge_core::ItemId;

    fn entry(key: &str, priority: i32) -> QueueEntry {
        QueueEntry::new(
            key.to_string(),
            JobId::new(),
            JobPayload::Generate { item_id: ItemId::new(), prompt: "x".to_string() },
            priority,
        )
    }

    fn queue() -> InMemoryQueue {
        InMemoryQueue::new(QueueConfig::default())
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_a_no_op() {
        let q = queue();
        let outcome = q.enqueue(QueueName::Generation, entry("generate-2026-08-06-abc", 100)).await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Enqueued);

        let outcome = q.enqueue(QueueName::Generation, entry("generate-2026-08-06-abc", 100)).await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Duplicate);

        // Exactly one delivery comes out.
        assert!(q.reserve(QueueName::Generation).await.unwrap().is_some());
        assert!(q.reserve(QueueName::Generation).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lower_priority_value_is_reserved_first() {
        let q = queue();
        q.enqueue(QueueName::Generation, entry("low", JobPriority::Low.as_i32())).await.unwrap();
        q.enqueue(QueueName::Generation, entry("high", JobPriority::High.as_i32())).await.unwrap();
        q.enqueue(QueueName::Generation, entry("normal", JobPriority::Normal.as_i32())).await.unwrap();

        let first = q.reserve(QueueName::Generation).await.unwrap().unwrap();
        assert_eq!(first.entry.dedup_key, "high");
        let second = q.reserve(QueueName::Generation).await.unwrap().unwrap();
        assert_eq!(second.entry.dedup_key, "normal");
    }

    #[tokio::test]
    async fn ack_parks_entry_and_allows_readmission() {
        let q = queue();
        q.enqueue(QueueName::Generation, entry("job", 100)).await.unwrap();
        q.reserve(QueueName::Generation).await.unwrap().unwrap();
        q.ack(QueueName::Generation, "job").await.unwrap();

        assert!(!q.contains(QueueName::Generation, "job").await.unwrap());
        // Terminal entries no longer block the fingerprint.
        let outcome = q.enqueue(QueueName::Generation, entry("job", 100)).await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Enqueued);
    }

    #[tokio::test]
    async fn nack_requeues_with_backoff_until_attempts_run_out() {
        let q = queue();
        q.enqueue(QueueName::Generation, entry("flaky", 100)).await.unwrap();

        for _ in 0..2 {
            q.reserve(QueueName::Generation).await.unwrap().unwrap();
            let outcome = q
                .nack(QueueName::Generation, "flaky", Duration::ZERO)
                .await
                .unwrap();
            assert_eq!(outcome, NackOutcome::Requeued);
        }

        let delivery = q.reserve(QueueName::Generation).await.unwrap().unwrap();
        assert_eq!(delivery.attempt, 3);
        let outcome = q
            .nack(QueueName::Generation, "flaky", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(outcome, NackOutcome::Exhausted);
        assert!(q.reserve(QueueName::Generation).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn backoff_delays_redelivery() {
        let q = queue();
        q.enqueue(QueueName::Generation, entry("delayed", 100)).await.unwrap();
        q.reserve(QueueName::Generation).await.unwrap().unwrap();
        q.nack(QueueName::Generation, "delayed", Duration::from_secs(3600))
            .await
            .unwrap();

        // Not ready until the backoff elapses.
        assert!(q.reserve(QueueName::Generation).await.unwrap().is_none());
        assert!(q.contains(QueueName::Generation, "delayed").await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_makes_entry_stalled_and_redelivered() {
        let config = QueueConfig::default().with_lock_duration(Duration::ZERO);
        let q = InMemoryQueue::new(config);
        q.enqueue(QueueName::Generation, entry("stall", 100)).await.unwrap();

        let first = q.reserve(QueueName::Generation).await.unwrap().unwrap();
        assert_eq!(first.attempt, 1);
        // Lock expired immediately; the next reserve reclaims and redelivers.
        let second = q.reserve(QueueName::Generation).await.unwrap().unwrap();
        assert_eq!(second.entry.dedup_key, "stall");
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn repeatedly_stalled_entry_is_forced_to_failed() {
        let config = QueueConfig::default()
            .with_lock_duration(Duration::ZERO)
            .with_max_stalled_count(2);
        let q = InMemoryQueue::new(config);
        q.enqueue(QueueName::Generation, entry("zombie", 100)).await.unwrap();

        // Each reserve abandons the lock; after max_stalled_count stalls the
        // entry is parked as failed instead of redelivered.
        let mut deliveries = 0;
        while q.reserve(QueueName::Generation).await.unwrap().is_some() {
            deliveries += 1;
            assert!(deliveries <= 10, "stalled entry was never forced to failed");
        }
        assert_eq!(deliveries, 3);
        assert!(!q.contains(QueueName::Generation, "zombie").await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_applies_retention_windows() {
        let q = queue();
        q.enqueue(QueueName::Generation, entry("old-done", 100)).await.unwrap();
        q.reserve(QueueName::Generation).await.unwrap().unwrap();
        q.ack(QueueName::Generation, "old-done").await.unwrap();

        // Within retention: kept.
        let report = q.cleanup(Utc::now()).await.unwrap();
        assert_eq!(report.removed_completed, 0);

        // Past the completed retention window: dropped.
        let later = Utc::now() + chrono::Duration::hours(25);
        let report = q.cleanup(later).await.unwrap();
        assert_eq!(report.removed_completed, 1);
    }
}
