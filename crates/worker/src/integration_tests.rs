//! End-to-end tests over the in-memory stack: store + queue + mock AI +
//! in-memory object storage, driven exactly the way the binary wires things.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use colorforge_ai::{AiError, MockAiClient};
use colorforge_core::{CategoryId, Item, ItemId, ModerationStatus};
use colorforge_pipeline::{PipelineConfig, Services};
use colorforge_queue::{
    EnqueueOutcome, InMemoryQueue, JobPayload, JobPriority, JobQueue, JobRecord, JobStatus,
    QueueConfig, QueueEntry, QueueName,
};
use colorforge_storage::AssetStorage;
use colorforge_store::{ItemStore, JobStore, MemoryStore, VariantStore};

use crate::admin::retry_failed_jobs;
use crate::scheduler::run_daily_batch;
use crate::worker::{Worker, process_delivery};

fn seed_item(n: u32) -> Item {
    let now = Utc::now();
    Item {
        id: ItemId::new(),
        slug: format!("item-{n}"),
        title_pl: format!("Kolorowanka numer {n}"),
        title_en: format!("Coloring page number {n}"),
        category_id: CategoryId::new(),
        prompt: Some("a friendly animal".to_string()),
        keywords: vec!["animals".to_string()],
        age_min: 3,
        age_max: 10,
        difficulty: 1,
        is_published: false,
        published_at: None,
        moderation_status: ModerationStatus::Pending,
        moderation_note: None,
        created_at: now,
        updated_at: now,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    ai: Arc<MockAiClient>,
    queue: Arc<InMemoryQueue>,
    services: Services,
    queue_config: QueueConfig,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let ai = Arc::new(MockAiClient::new());
    let queue_config = QueueConfig::default().with_poll_interval(Duration::from_millis(10));
    let queue = Arc::new(InMemoryQueue::new(queue_config.clone()));
    let pipeline_config = PipelineConfig {
        retry: colorforge_retry::RetryConfig::default()
            .with_max_attempts(1)
            .with_base_delay(Duration::from_millis(1)),
        image_backoff_base: Duration::from_millis(1),
        ..PipelineConfig::default()
    };
    let services = Services::new(
        store.clone(),
        ai.clone(),
        AssetStorage::in_memory("https://cdn.test"),
        pipeline_config,
    );
    Harness { store, ai, queue, services, queue_config }
}

async fn drain_one(h: &Harness) {
    let delivery = h
        .queue
        .reserve(QueueName::Generation)
        .await
        .unwrap()
        .expect("expected a queued delivery");
    process_delivery(&h.services, h.queue.as_ref(), &h.queue_config, delivery).await;
}

#[tokio::test]
async fn daily_batch_then_worker_completes_the_pipeline() {
    let h = harness();
    let item = seed_item(1);
    h.store.insert_item(&item).await.unwrap();

    let today = Utc::now().date_naive();
    let report = run_daily_batch(&h.services, h.queue.as_ref(), 20, today).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.mirrored, 1);

    drain_one(&h).await;

    let jobs = h.store.list_jobs_by_status(Some(JobStatus::Completed), 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].started_at.is_some());
    assert!(jobs[0].completed_at.is_some());
    assert!(jobs[0].last_error.is_none());

    let stored = h.store.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.moderation_status, ModerationStatus::Approved);
    let variants = h.store.variants_for_item(item.id).await.unwrap();
    assert_eq!(variants.len(), 2);
    assert!(variants.iter().all(|v| v.og_image.is_some()));

    // Queue entry settled: nothing left to reserve.
    assert!(h.queue.reserve(QueueName::Generation).await.unwrap().is_none());
}

#[tokio::test]
async fn scheduler_is_idempotent_within_a_day() {
    let h = harness();
    for n in 0..3 {
        h.store.insert_item(&seed_item(n)).await.unwrap();
    }
    let today = Utc::now().date_naive();

    let first = run_daily_batch(&h.services, h.queue.as_ref(), 20, today).await.unwrap();
    assert_eq!(first.created, 3);

    // Same eligible set, same day: no new jobs.
    let second = run_daily_batch(&h.services, h.queue.as_ref(), 20, today).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.batch_id, first.batch_id);

    // Two new eligible items: exactly two more jobs, same batch.
    h.store.insert_item(&seed_item(10)).await.unwrap();
    h.store.insert_item(&seed_item(11)).await.unwrap();
    let third = run_daily_batch(&h.services, h.queue.as_ref(), 20, today).await.unwrap();
    assert_eq!(third.created, 2);
    assert_eq!(third.batch_id, first.batch_id);

    let all_jobs = h.store.list_jobs_by_status(None, 50).await.unwrap();
    assert_eq!(all_jobs.len(), 5);
}

#[tokio::test]
async fn same_payload_enqueued_twice_yields_one_entry() {
    let h = harness();
    let item_id = ItemId::new();
    let payload = JobPayload::Generate { item_id, prompt: "x".to_string() };
    let today = Utc::now().date_naive();
    let key = payload.dedup_key(today);
    assert_eq!(key, format!("generate-{}-{}", today.format("%Y-%m-%d"), item_id));

    let job = JobRecord::new(
        colorforge_queue::BatchId::for_date(today),
        payload.clone(),
        JobPriority::Normal,
    );
    let first = h
        .queue
        .enqueue(
            QueueName::Generation,
            QueueEntry::new(key.clone(), job.id, payload.clone(), job.priority),
        )
        .await
        .unwrap();
    let second = h
        .queue
        .enqueue(
            QueueName::Generation,
            QueueEntry::new(key.clone(), job.id, payload, job.priority),
        )
        .await
        .unwrap();

    assert_eq!(first, EnqueueOutcome::Enqueued);
    assert_eq!(second, EnqueueOutcome::Duplicate);

    assert!(h.queue.reserve(QueueName::Generation).await.unwrap().is_some());
    assert!(h.queue.reserve(QueueName::Generation).await.unwrap().is_none());
}

#[tokio::test]
async fn exhausted_job_is_rejected_by_manual_retry() {
    let h = harness();
    let item = seed_item(1);
    h.store.insert_item(&item).await.unwrap();

    let mut job = JobRecord::new(
        colorforge_queue::BatchId::for_date(Utc::now().date_naive()),
        JobPayload::Generate { item_id: item.id, prompt: "x".to_string() },
        JobPriority::Normal,
    );
    job.status = JobStatus::Failed;
    job.attempts = 3;
    job.max_attempts = 3;
    h.store.insert_job(&job).await.unwrap();

    let outcomes = retry_failed_jobs(&h.services, h.queue.as_ref(), &[job.id]).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].success);
    assert_eq!(outcomes[0].message, "Max retries (3) exceeded");

    // Still failed, still not re-queued.
    let stored = h.store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(h.queue.reserve(QueueName::Generation).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_job_can_be_retried_and_then_succeeds() {
    let h = harness();
    let item = seed_item(1);
    h.store.insert_item(&item).await.unwrap();

    // Image generation fails hard on the first delivery (3 inner attempts).
    for _ in 0..3 {
        h.ai.push_image(Err(AiError::Status { status: 400, message: "policy".to_string() }));
    }

    let today = Utc::now().date_naive();
    run_daily_batch(&h.services, h.queue.as_ref(), 20, today).await.unwrap();
    drain_one(&h).await;

    let failed = h.store.list_jobs_by_status(Some(JobStatus::Failed), 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    let job_id = failed[0].id;
    assert!(failed[0].last_error.as_deref().unwrap().contains("image generation failed"));

    // The queue holds a delayed redelivery; the admin path resets the row
    // and re-admission dedupes against it.
    let outcomes = retry_failed_jobs(&h.services, h.queue.as_ref(), &[job_id]).await.unwrap();
    assert!(outcomes[0].success);
    let pending = h.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(pending.status, JobStatus::Pending);

    // Wait out the queue backoff, then process the redelivery.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    drain_one(&h).await;

    let stored = h.store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
}

#[tokio::test]
async fn moderation_halt_completes_the_job_without_retry() {
    let h = harness();
    let item = seed_item(1);
    h.store.insert_item(&item).await.unwrap();
    h.ai.push_moderation(Ok(true));

    let today = Utc::now().date_naive();
    run_daily_batch(&h.services, h.queue.as_ref(), 20, today).await.unwrap();
    drain_one(&h).await;

    // Halted jobs are settled, not failed: nothing to redeliver.
    let jobs = h.store.list_jobs_by_status(Some(JobStatus::Completed), 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(h.queue.reserve(QueueName::Generation).await.unwrap().is_none());

    let stored = h.store.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.moderation_status, ModerationStatus::NeedsReview);
    assert_eq!(h.ai.chat_calls(), 0);

    // The halt left an audit trail.
    let logs = h.store.logs();
    assert!(logs.iter().any(|l| l.source == "worker" && l.message.contains("halted")));
}

#[tokio::test]
async fn worker_pool_processes_jobs_and_drains_on_shutdown() {
    let h = harness();
    for n in 0..4 {
        h.store.insert_item(&seed_item(n)).await.unwrap();
        // Distinct image bytes per job: concurrent jobs each get their own
        // checksum, as they would with a real provider.
        let mut png = colorforge_ai::mock::PLACEHOLDER_PNG.to_vec();
        png.push(n as u8);
        h.ai.push_image(Ok(png));
    }
    let today = Utc::now().date_naive();
    run_daily_batch(&h.services, h.queue.as_ref(), 20, today).await.unwrap();

    let worker = Worker::new(h.services.clone(), h.queue.clone(), h.queue_config.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    // Wait for all four jobs to finish.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let done = h.store.list_jobs_by_status(Some(JobStatus::Completed), 10).await.unwrap();
        if done.len() == 4 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not complete in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn sweep_readmits_store_rows_the_queue_never_saw() {
    let h = harness();
    let item = seed_item(1);
    h.store.insert_item(&item).await.unwrap();

    // Simulate a failed queue mirror: the row exists, the queue is empty.
    let job = JobRecord::new(
        colorforge_queue::BatchId::for_date(Utc::now().date_naive()),
        JobPayload::Generate { item_id: item.id, prompt: "x".to_string() },
        JobPriority::Normal,
    );
    h.store.insert_job(&job).await.unwrap();
    assert!(h.queue.reserve(QueueName::Generation).await.unwrap().is_none());

    let worker = Worker::new(h.services.clone(), h.queue.clone(), h.queue_config.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    // The sweep fires after a stretch of idle polls and re-admits the row.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stored = h.store.get_job(job.id).await.unwrap().unwrap();
        if stored.status == JobStatus::Completed {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "sweep never picked up the job");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
