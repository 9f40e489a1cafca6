use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use colorforge_ai::{OpenAiClient, OpenAiConfig};
use colorforge_pipeline::{PipelineConfig, Services};
use colorforge_queue::{InMemoryQueue, JobQueue};
use colorforge_storage::AssetStorage;
use colorforge_store::PgStore;
use colorforge_worker::{Worker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    colorforge_observability::init();

    let config = WorkerConfig::from_env()?;

    if !config.generation_enabled {
        warn!("generation is disabled via GENERATION_ENABLED; exiting");
        return Ok(());
    }

    let store = PgStore::connect(&config.database_url, config.max_db_connections).await?;
    info!("database connected, migrations applied");

    let storage = AssetStorage::s3_compatible(config.storage.clone())?;

    let mut ai_config = OpenAiConfig::new(&config.openai_api_key);
    if let Some(base_url) = &config.openai_base_url {
        ai_config = ai_config.with_base_url(base_url);
    }
    let ai = OpenAiClient::new(ai_config)?;

    let queue: Arc<dyn JobQueue> = build_queue(&config)?;

    let services =
        Services::new(Arc::new(store), Arc::new(ai), storage, PipelineConfig::default());
    let worker = Worker::new(services, queue, config.queue.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("termination signal received, draining");
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;
    Ok(())
}

#[cfg(feature = "redis")]
fn build_queue(config: &WorkerConfig) -> anyhow::Result<Arc<dyn JobQueue>> {
    match &config.redis_url {
        Some(url) => {
            info!("using redis queue");
            Ok(Arc::new(colorforge_queue::RedisQueue::new(url, config.queue.clone())?))
        }
        None => {
            warn!("REDIS_URL not set; using in-process queue with store sweep");
            Ok(Arc::new(InMemoryQueue::new(config.queue.clone())))
        }
    }
}

#[cfg(not(feature = "redis"))]
fn build_queue(config: &WorkerConfig) -> anyhow::Result<Arc<dyn JobQueue>> {
    if config.redis_url.is_some() {
        warn!("REDIS_URL set but the redis feature is disabled; using in-process queue");
    }
    Ok(Arc::new(InMemoryQueue::new(config.queue.clone())))
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
