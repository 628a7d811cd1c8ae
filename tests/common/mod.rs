//! Shared harness for integration tests: an orchestrator wired entirely to
//! in-memory backends, plus a handful of canned workflow handlers.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use orchestra_core::config::OrchestrationConfig;
use orchestra_core::orchestration::{
    JobContext, JobError, JobOutput, MemoryDelivery, Orchestrator, WorkflowHandler,
    WorkflowMetadata, WorkflowRegistry,
};
use orchestra_core::queue::MemoryQueue;
use orchestra_core::store::MemoryStore;

pub fn test_config() -> OrchestrationConfig {
    OrchestrationConfig {
        max_concurrency: 4,
        default_timeout_secs: 5,
        sync_watchdog_margin_secs: 2,
        inline_result_limit_bytes: 256 * 1024,
        cancel_poll_interval_ms: 50,
        dequeue_wait_ms: 50,
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub registry: Arc<WorkflowRegistry>,
    pub delivery: Arc<MemoryDelivery>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OrchestrationConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let registry = Arc::new(WorkflowRegistry::new());
        let delivery = Arc::new(MemoryDelivery::new());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            queue.clone(),
            registry.clone(),
            delivery.clone(),
            config,
        ));
        Self {
            store,
            queue,
            registry,
            delivery,
            orchestrator,
        }
    }

    /// Register a handler with a generous timeout.
    pub fn register(&self, name: &str, handler: Arc<dyn WorkflowHandler>) {
        self.registry
            .register(WorkflowMetadata::new(name, Duration::from_secs(5)), handler);
    }
}

/// Succeeds immediately, echoing its parameters back as the result.
pub struct EchoHandler;

#[async_trait]
impl WorkflowHandler for EchoHandler {
    async fn run(&self, ctx: JobContext) -> Result<JobOutput, JobError> {
        Ok(JobOutput::Success(json!({ "echo": ctx.parameters })))
    }
}

/// Fails with a fixed job error.
pub struct FailingHandler {
    pub error_type: String,
    pub message: String,
}

impl FailingHandler {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error_type: error_type.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl WorkflowHandler for FailingHandler {
    async fn run(&self, _ctx: JobContext) -> Result<JobOutput, JobError> {
        Err(JobError::new(
            self.error_type.clone(),
            self.message.clone(),
        ))
    }
}

/// Sleeps without ever checking the cancellation token, standing in for a
/// job that ignores cooperative signals.
pub struct SleepingHandler {
    pub duration: Duration,
}

#[async_trait]
impl WorkflowHandler for SleepingHandler {
    async fn run(&self, _ctx: JobContext) -> Result<JobOutput, JobError> {
        tokio::time::sleep(self.duration).await;
        Ok(JobOutput::Success(json!({ "slept_ms": self.duration.as_millis() as u64 })))
    }
}

/// Produces a result alongside item-level errors.
pub struct PartialHandler;

#[async_trait]
impl WorkflowHandler for PartialHandler {
    async fn run(&self, _ctx: JobContext) -> Result<JobOutput, JobError> {
        Ok(JobOutput::CompletedWithErrors {
            result: json!({ "processed": 8 }),
            errors: vec!["row 3: missing email".to_string(), "row 7: bad date".to_string()],
        })
    }
}
