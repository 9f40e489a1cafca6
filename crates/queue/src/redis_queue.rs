//! Redis-backed queue (best-effort accelerant).
//!
//! Key layout, per queue name under the `colorforge:` prefix:
//!
//! - `…:{queue}:data`       HASH  dedup_key → serialized entry + counters
//! - `…:{queue}:ready`      ZSET  dedup_key scored by priority
//! - `…:{queue}:delayed`    ZSET  dedup_key scored by ready-at (ms)
//! - `…:{queue}:processing` ZSET  dedup_key scored by lock deadline (ms)
//! - `…:{queue}:parked`     HASH  dedup_key → terminal status + timestamp
//!
//! Dedup admission rides on `HSETNX` against the data hash, so concurrent
//! producers cannot double-admit a fingerprint. Individual operations span
//! several commands without a transaction; that is acceptable here because
//! the relational store stays authoritative and the worker's reconciliation
//! sweep re-admits anything the queue loses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::QueueConfig;
use crate::queue::{
    CleanupReport, Delivery, EnqueueOutcome, JobQueue, NackOutcome, QueueEntry, QueueError,
    QueueName,
};

const KEY_PREFIX: &str = "colorforge";

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    entry: QueueEntry,
    attempts: u32,
    stalls: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ParkedEntry {
    completed: bool,
    parked_at_ms: i64,
}

/// Redis-backed [`JobQueue`].
#[derive(Debug, Clone)]
pub struct RedisQueue {
    client: Arc<redis::Client>,
    config: QueueConfig,
}

impl RedisQueue {
    /// Connect to Redis at `redis_url` (e.g. `redis://localhost:6379`).
    pub fn new(redis_url: impl AsRef<str>, config: QueueConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(Self { client: Arc::new(client), config })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))
    }

    fn key(queue: QueueName, part: &str) -> String {
        format!("{KEY_PREFIX}:{queue}:{part}")
    }

    async fn load_entry(
        conn: &mut redis::aio::MultiplexedConnection,
        queue: QueueName,
        dedup_key: &str,
    ) -> Result<Option<StoredEntry>, QueueError> {
        let raw: Option<String> = redis::cmd("HGET")
            .arg(Self::key(queue, "data"))
            .arg(dedup_key)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        raw.map(|r| serde_json::from_str(&r).map_err(|e| QueueError::Serialization(e.to_string())))
            .transpose()
    }

    async fn save_entry(
        conn: &mut redis::aio::MultiplexedConnection,
        queue: QueueName,
        dedup_key: &str,
        stored: &StoredEntry,
    ) -> Result<(), QueueError> {
        let raw =
            serde_json::to_string(stored).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let _: i64 = redis::cmd("HSET")
            .arg(Self::key(queue, "data"))
            .arg(dedup_key)
            .arg(raw)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        Ok(())
    }

    async fn park(
        conn: &mut redis::aio::MultiplexedConnection,
        queue: QueueName,
        dedup_key: &str,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let parked = ParkedEntry { completed, parked_at_ms: now.timestamp_millis() };
        let raw =
            serde_json::to_string(&parked).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let _: i64 = redis::cmd("HDEL")
            .arg(Self::key(queue, "data"))
            .arg(dedup_key)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        let _: i64 = redis::cmd("HSET")
            .arg(Self::key(queue, "parked"))
            .arg(dedup_key)
            .arg(raw)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        Ok(())
    }

    /// Move due delayed entries to ready and reclaim expired locks.
    async fn promote(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let now_ms = now.timestamp_millis();

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(Self::key(queue, "delayed"))
            .arg("-inf")
            .arg(now_ms)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        for dedup_key in due {
            let _: i64 = redis::cmd("ZREM")
                .arg(Self::key(queue, "delayed"))
                .arg(&dedup_key)
                .query_async(conn)
                .await
                .map_err(|e| QueueError::Command(e.to_string()))?;
            if let Some(stored) = Self::load_entry(conn, queue, &dedup_key).await? {
                let _: i64 = redis::cmd("ZADD")
                    .arg(Self::key(queue, "ready"))
                    .arg(stored.entry.priority)
                    .arg(&dedup_key)
                    .query_async(conn)
                    .await
                    .map_err(|e| QueueError::Command(e.to_string()))?;
            }
        }

        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(Self::key(queue, "processing"))
            .arg("-inf")
            .arg(now_ms)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        for dedup_key in expired {
            let _: i64 = redis::cmd("ZREM")
                .arg(Self::key(queue, "processing"))
                .arg(&dedup_key)
                .query_async(conn)
                .await
                .map_err(|e| QueueError::Command(e.to_string()))?;
            let Some(mut stored) = Self::load_entry(conn, queue, &dedup_key).await? else {
                continue;
            };
            stored.stalls += 1;
            if stored.stalls > self.config.max_stalled_count {
                warn!(dedup_key = %dedup_key, stalls = stored.stalls, "job stalled too often, forcing failed");
                Self::park(conn, queue, &dedup_key, false, now).await?;
            } else {
                warn!(dedup_key = %dedup_key, stalls = stored.stalls, "reclaiming stalled job");
                Self::save_entry(conn, queue, &dedup_key, &stored).await?;
                let _: i64 = redis::cmd("ZADD")
                    .arg(Self::key(queue, "ready"))
                    .arg(stored.entry.priority)
                    .arg(&dedup_key)
                    .query_async(conn)
                    .await
                    .map_err(|e| QueueError::Command(e.to_string()))?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        entry: QueueEntry,
    ) -> Result<EnqueueOutcome, QueueError> {
        let mut conn = self.conn().await?;
        let dedup_key = entry.dedup_key.clone();
        let priority = entry.priority;
        let stored = StoredEntry { entry, attempts: 0, stalls: 0 };
        let raw =
            serde_json::to_string(&stored).map_err(|e| QueueError::Serialization(e.to_string()))?;

        let admitted: i64 = redis::cmd("HSETNX")
            .arg(Self::key(queue, "data"))
            .arg(&dedup_key)
            .arg(raw)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        if admitted == 0 {
            return Ok(EnqueueOutcome::Duplicate);
        }

        let _: i64 = redis::cmd("HDEL")
            .arg(Self::key(queue, "parked"))
            .arg(&dedup_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        let _: i64 = redis::cmd("ZADD")
            .arg(Self::key(queue, "ready"))
            .arg(priority)
            .arg(&dedup_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        Ok(EnqueueOutcome::Enqueued)
    }

    async fn reserve(&self, queue: QueueName) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        self.promote(&mut conn, queue, now).await?;

        let popped: Vec<(String, f64)> = redis::cmd("ZPOPMIN")
            .arg(Self::key(queue, "ready"))
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        let Some((dedup_key, _)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let Some(mut stored) = Self::load_entry(&mut conn, queue, &dedup_key).await? else {
            return Ok(None);
        };
        stored.attempts += 1;
        Self::save_entry(&mut conn, queue, &dedup_key, &stored).await?;

        let deadline =
            now + chrono::Duration::from_std(self.config.lock_duration).unwrap_or_default();
        let _: i64 = redis::cmd("ZADD")
            .arg(Self::key(queue, "processing"))
            .arg(deadline.timestamp_millis())
            .arg(&dedup_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;

        Ok(Some(Delivery { entry: stored.entry, attempt: stored.attempts }))
    }

    async fn ack(&self, queue: QueueName, dedup_key: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let removed: i64 = redis::cmd("ZREM")
            .arg(Self::key(queue, "processing"))
            .arg(dedup_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        if removed == 0 {
            return Err(QueueError::NotReserved(dedup_key.to_string()));
        }
        Self::park(&mut conn, queue, dedup_key, true, Utc::now()).await
    }

    async fn nack(
        &self,
        queue: QueueName,
        dedup_key: &str,
        backoff: Duration,
    ) -> Result<NackOutcome, QueueError> {
        let mut conn = self.conn().await?;
        let now = Utc::now();

        let removed: i64 = redis::cmd("ZREM")
            .arg(Self::key(queue, "processing"))
            .arg(dedup_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        if removed == 0 {
            return Err(QueueError::NotReserved(dedup_key.to_string()));
        }

        let Some(stored) = Self::load_entry(&mut conn, queue, dedup_key).await? else {
            return Err(QueueError::NotReserved(dedup_key.to_string()));
        };

        if stored.attempts >= self.config.max_attempts {
            Self::park(&mut conn, queue, dedup_key, false, now).await?;
            return Ok(NackOutcome::Exhausted);
        }

        let ready_at = now + chrono::Duration::from_std(backoff).unwrap_or_default();
        let _: i64 = redis::cmd("ZADD")
            .arg(Self::key(queue, "delayed"))
            .arg(ready_at.timestamp_millis())
            .arg(dedup_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        Ok(NackOutcome::Requeued)
    }

    async fn contains(&self, queue: QueueName, dedup_key: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn().await?;
        let exists: i64 = redis::cmd("HEXISTS")
            .arg(Self::key(queue, "data"))
            .arg(dedup_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(e.to_string()))?;
        Ok(exists == 1)
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport, QueueError> {
        let mut conn = self.conn().await?;
        let mut report = CleanupReport::default();

        for queue in [QueueName::Generation, QueueName::Publishing, QueueName::Sitemap] {
            let parked: HashMap<String, String> = redis::cmd("HGETALL")
                .arg(Self::key(queue, "parked"))
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::Command(e.to_string()))?;

            for (dedup_key, raw) in parked {
                let Ok(entry) = serde_json::from_str::<ParkedEntry>(&raw) else {
                    continue;
                };
                let parked_at = Utc
                    .timestamp_millis_opt(entry.parked_at_ms)
                    .single()
                    .unwrap_or(now);
                let retention = if entry.completed {
                    self.config.remove_completed_after
                } else {
                    self.config.remove_failed_after
                };
                let cutoff = now - chrono::Duration::from_std(retention).unwrap_or_default();
                if parked_at <= cutoff {
                    let _: i64 = redis::cmd("HDEL")
                        .arg(Self::key(queue, "parked"))
                        .arg(&dedup_key)
                        .query_async(&mut conn)
                        .await
                        .map_err(|e| QueueError::Command(e.to_string()))?;
                    if entry.completed {
                        report.removed_completed += 1;
                    } else {
                        report.removed_failed += 1;
                    }
                }
            }
        }

        Ok(report)
    }
}
