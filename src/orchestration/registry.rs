//! # Workflow Registry
//!
//! Explicit workflow registration: handlers register (name, callable,
//! timeout, optional CRON, metadata) at startup, and reload is an
//! administrative replace-all operation rather than an implicit side effect
//! of lookup.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Context handed to a running job.
///
/// The cancellation token is the cooperative signal; handlers check it at
/// defined points. A handler that ignores it is still hard-terminated at the
/// timeout or cancel boundary by the orchestrator.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub execution_id: Uuid,
    pub organization: Option<String>,
    pub parameters: Value,
    pub cancel: CancellationToken,
}

/// Error raised by a job itself; the type tag is propagated verbatim onto
/// the execution record.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error_type}: {message}")]
pub struct JobError {
    pub error_type: String,
    pub message: String,
}

impl JobError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

/// What a job hands back on completion.
#[derive(Debug, Clone)]
pub enum JobOutput {
    Success(Value),
    /// The job produced a usable result but reported errors alongside it.
    CompletedWithErrors { result: Value, errors: Vec<String> },
}

#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> Result<JobOutput, JobError>;
}

/// Static metadata registered alongside a handler.
#[derive(Debug, Clone)]
pub struct WorkflowMetadata {
    pub name: String,
    pub timeout: Duration,
    /// CRON expression for scheduled workflows; `None` = on-demand only.
    pub cron: Option<String>,
    pub description: Option<String>,
}

impl WorkflowMetadata {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
            cron: None,
            description: None,
        }
    }

    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = Some(cron.into());
        self
    }
}

/// Handler factories cover registrations whose construction can fail
/// (e.g. loading a plugin or compiling an inline script); a plain handler
/// registration never fails to resolve.
type HandlerFactory =
    Arc<dyn Fn() -> std::result::Result<Arc<dyn WorkflowHandler>, String> + Send + Sync>;

enum HandlerSource {
    Ready(Arc<dyn WorkflowHandler>),
    Factory(HandlerFactory),
}

struct Registration {
    metadata: WorkflowMetadata,
    source: HandlerSource,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("workflow not found: {0}")]
    NotFound(String),
    #[error("workflow {0} failed to load: {1}")]
    LoadFailed(String, String),
}

/// Thread-safe workflow registry.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<String, Registration>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready handler under its metadata name. Re-registering a
    /// name replaces the previous entry.
    pub fn register(&self, metadata: WorkflowMetadata, handler: Arc<dyn WorkflowHandler>) {
        info!(workflow = %metadata.name, "Registering workflow handler");
        self.workflows.write().insert(
            metadata.name.clone(),
            Registration {
                metadata,
                source: HandlerSource::Ready(handler),
            },
        );
    }

    /// Register a handler factory invoked on every resolve; a factory error
    /// surfaces as `WorkflowLoadError` on the execution.
    pub fn register_factory(&self, metadata: WorkflowMetadata, factory: HandlerFactory) {
        info!(workflow = %metadata.name, "Registering workflow handler factory");
        self.workflows.write().insert(
            metadata.name.clone(),
            Registration {
                metadata,
                source: HandlerSource::Factory(factory),
            },
        );
    }

    /// Resolve a workflow by name.
    pub fn resolve(
        &self,
        name: &str,
    ) -> Result<(Arc<dyn WorkflowHandler>, WorkflowMetadata), RegistryError> {
        let workflows = self.workflows.read();
        let registration = workflows
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let handler = match &registration.source {
            HandlerSource::Ready(handler) => handler.clone(),
            HandlerSource::Factory(factory) => factory()
                .map_err(|e| RegistryError::LoadFailed(name.to_string(), e))?,
        };
        Ok((handler, registration.metadata.clone()))
    }

    /// All registered workflow metadata.
    pub fn list(&self) -> Vec<WorkflowMetadata> {
        self.workflows
            .read()
            .values()
            .map(|r| r.metadata.clone())
            .collect()
    }

    /// Administrative reload: replace the whole registration set at once.
    pub fn reload(&self, registrations: Vec<(WorkflowMetadata, Arc<dyn WorkflowHandler>)>) {
        let mut workflows = self.workflows.write();
        workflows.clear();
        for (metadata, handler) in registrations {
            workflows.insert(
                metadata.name.clone(),
                Registration {
                    metadata,
                    source: HandlerSource::Ready(handler),
                },
            );
        }
        info!(count = workflows.len(), "Workflow registry reloaded");
    }
}
