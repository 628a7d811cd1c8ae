//! Orchestration daemon: wires the production backends together and runs the
//! worker loop, reconciler sweep, and scheduler poll until shutdown.
//!
//! Workflow handlers and reference-data sources belong to the embedding
//! application; the daemon starts with an empty registry and serves whatever
//! gets loaded into it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use orchestra_core::config::ConfigManager;
use orchestra_core::events::StatusEventPublisher;
use orchestra_core::logging::init_structured_logging;
use orchestra_core::orchestration::{Orchestrator, Reconciler, RedisDelivery, WorkflowRegistry};
use orchestra_core::queue::RedisQueue;
use orchestra_core::scheduler::Scheduler;
use orchestra_core::store::PostgresStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let config_dir = std::env::var("ORCHESTRA_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));
    let manager = if config_dir.join("orchestra.yaml").exists() {
        ConfigManager::load(&config_dir)
            .with_context(|| format!("loading configuration from {}", config_dir.display()))?
    } else {
        info!(dir = %config_dir.display(), "No configuration file found, using defaults");
        ConfigManager::default_config()
    };
    let config = manager.config().clone();
    info!(environment = manager.environment(), "Starting orchestrad");

    let store = Arc::new(
        PostgresStore::connect(&config.database.url, config.database.pool)
            .await
            .context("connecting to PostgreSQL")?,
    );
    let queue = Arc::new(
        RedisQueue::new(&config.redis.url, config.redis.queue_key.clone())
            .context("connecting to Redis")?,
    );
    let outcome_ttl = Duration::from_secs(
        config.orchestration.default_timeout_secs + config.orchestration.sync_watchdog_margin_secs,
    );
    let delivery = Arc::new(RedisDelivery::new(
        &config.redis.url,
        "orchestra:outcome",
        outcome_ttl,
    )?);
    let events = StatusEventPublisher::default();
    let registry = Arc::new(WorkflowRegistry::new());

    let orchestrator = Arc::new(
        Orchestrator::new(
            store.clone(),
            queue,
            registry.clone(),
            delivery,
            config.orchestration.clone(),
        )
        .with_events(events.clone()),
    );
    let reconciler = Arc::new(
        Reconciler::new(store.clone(), config.reconciler.clone()).with_events(events.clone()),
    );
    let scheduler = Arc::new(Scheduler::new(
        store,
        registry,
        orchestrator.clone(),
        config.scheduler.clone(),
    ));

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(
        orchestrator.clone().run_worker(shutdown.clone()),
    ));
    tasks.push(tokio::spawn(reconciler.run(shutdown.clone())));
    tasks.push(tokio::spawn(scheduler.run(shutdown.clone())));

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received, stopping");
    shutdown.cancel();
    let _ = futures::future::join_all(tasks).await;
    info!("orchestrad stopped");
    Ok(())
}
