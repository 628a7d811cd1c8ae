//! # Execution Orchestrator
//!
//! Consumes queued execution requests, enforces the concurrency ceiling,
//! runs each job under a hard timeout with guaranteed termination, drives
//! the status state machine, and delivers terminal outcomes to synchronous
//! callers.
//!
//! Every exit path funnels through [`Orchestrator::finish`]: the persisted
//! transition, the status-index maintenance, the status event, the audit
//! record and the single synchronous delivery push all happen there, so no
//! path can forget one of them.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink, TracingAuditSink};
use crate::cache::CacheWarmer;
use crate::config::OrchestrationConfig;
use crate::error::{OrchestraError, Result};
use crate::events::StatusEventPublisher;
use crate::models::{Execution, ExecutionErrorKind, ExecutionRequest, ExecutionStatus};
use crate::queue::ExecutionQueue;
use crate::store::{BlobStore, ExecutionStore, TransitionUpdate};

use super::delivery::{ExecutionOutcome, ResultDelivery};
use super::registry::{JobContext, JobOutput, RegistryError, WorkflowRegistry};

use async_trait::async_trait;

/// Enqueue seam consumed by the scheduler, so it does not depend on the
/// whole orchestrator surface.
#[async_trait]
pub trait ExecutionEnqueuer: Send + Sync {
    async fn enqueue_execution(&self, request: ExecutionRequest) -> Result<Uuid>;
}

/// Terminal disposition of one execution, carried into `finish`.
struct Finish {
    status: ExecutionStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
    error_kind: Option<ExecutionErrorKind>,
    zero_duration: bool,
}

impl Finish {
    fn success(result: serde_json::Value) -> Self {
        Self {
            status: ExecutionStatus::Success,
            result: Some(result),
            error: None,
            error_kind: None,
            zero_duration: false,
        }
    }

    fn completed_with_errors(result: serde_json::Value, errors: Vec<String>) -> Self {
        Self {
            status: ExecutionStatus::CompletedWithErrors,
            result: Some(result),
            error: Some(errors.join("; ")),
            error_kind: None,
            zero_duration: false,
        }
    }

    fn failed(message: String, kind: ExecutionErrorKind) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            result: None,
            error: Some(message),
            error_kind: Some(kind),
            zero_duration: false,
        }
    }

    fn timed_out(timeout: Duration) -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            result: None,
            error: Some(format!(
                "execution exceeded its timeout of {}s and was terminated",
                timeout.as_secs()
            )),
            error_kind: Some(ExecutionErrorKind::ExecutionTimeout),
            zero_duration: false,
        }
    }

    fn cancelled(before_start: bool) -> Self {
        Self {
            status: ExecutionStatus::Cancelled,
            result: None,
            error: Some("execution cancelled".to_string()),
            error_kind: Some(ExecutionErrorKind::ExecutionCancelled),
            zero_duration: before_start,
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn ExecutionStore>,
    queue: Arc<dyn ExecutionQueue>,
    registry: Arc<WorkflowRegistry>,
    delivery: Arc<dyn ResultDelivery>,
    events: StatusEventPublisher,
    audit: Arc<dyn AuditSink>,
    warmer: Option<Arc<CacheWarmer>>,
    blobs: Option<Arc<dyn BlobStore>>,
    semaphore: Arc<Semaphore>,
    cancel_tokens: DashMap<Uuid, CancellationToken>,
    config: OrchestrationConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        queue: Arc<dyn ExecutionQueue>,
        registry: Arc<WorkflowRegistry>,
        delivery: Arc<dyn ResultDelivery>,
        config: OrchestrationConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            store,
            queue,
            registry,
            delivery,
            events: StatusEventPublisher::default(),
            audit: Arc::new(TracingAuditSink),
            warmer: None,
            blobs: None,
            semaphore,
            cancel_tokens: DashMap::new(),
            config,
        }
    }

    pub fn with_events(mut self, events: StatusEventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_cache_warmer(mut self, warmer: Arc<CacheWarmer>) -> Self {
        self.warmer = Some(warmer);
        self
    }

    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn events(&self) -> &StatusEventPublisher {
        &self.events
    }

    /// Create the Pending record and enqueue the request.
    pub async fn enqueue(&self, request: ExecutionRequest) -> Result<Uuid> {
        let execution = Execution::from_request(&request);
        self.store.insert(&execution).await?;
        self.queue.enqueue(&request).await?;
        self.events
            .publish(execution.id, ExecutionStatus::Pending, None);
        debug!(execution_id = %execution.id, workflow = %execution.workflow, "Execution enqueued");
        Ok(execution.id)
    }

    /// Enqueue a synchronous execution and block until its terminal outcome
    /// arrives, bounded by a watchdog slightly longer than the job timeout.
    ///
    /// When the watchdog fires first the caller still receives a terminal
    /// answer: the current record state plus an unconfirmed-completion error.
    pub async fn enqueue_sync(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        let request = ExecutionRequest {
            synchronous: true,
            ..request
        };
        let job_timeout = self
            .registry
            .resolve(&request.workflow)
            .map(|(_, metadata)| metadata.timeout)
            .unwrap_or_else(|_| self.config.default_timeout());
        let watchdog = job_timeout + self.config.sync_watchdog_margin();

        let id = self.enqueue(request).await?;
        match self.delivery.wait(id, watchdog).await? {
            Some(outcome) => Ok(outcome),
            None => {
                warn!(execution_id = %id, "Synchronous caller watchdog fired without a delivery");
                let record = self.store.get(id).await?;
                Ok(ExecutionOutcome {
                    execution_id: id,
                    status: record
                        .as_ref()
                        .map(|r| r.status)
                        .unwrap_or(ExecutionStatus::Timeout),
                    result: None,
                    error: Some(
                        "the system could not confirm completion within the watchdog window"
                            .to_string(),
                    ),
                    error_kind: Some(ExecutionErrorKind::ExecutionTimeout),
                    duration_ms: record.and_then(|r| r.duration_ms),
                })
            }
        }
    }

    /// Request cancellation of a Pending or Running execution.
    ///
    /// Flips the record to Cancelling and signals the in-process token when
    /// this worker holds the job; a job on another worker observes the
    /// Cancelling status at its next poll.
    pub async fn request_cancel(&self, id: Uuid) -> Result<bool> {
        let applied = self
            .store
            .transition(
                id,
                &[ExecutionStatus::Pending, ExecutionStatus::Running],
                TransitionUpdate::to(ExecutionStatus::Cancelling),
            )
            .await?;
        if applied {
            self.events.publish(id, ExecutionStatus::Cancelling, None);
            if let Some(token) = self.cancel_tokens.get(&id) {
                token.cancel();
            }
            info!(execution_id = %id, "Cancellation requested");
        }
        Ok(applied)
    }

    /// Worker loop: blocking dequeue, one spawned task per request.
    ///
    /// A concurrency slot is taken before the dequeue, so a worker never
    /// pops more messages than it can run: the backlog stays in the queue,
    /// and a worker crash loses at most the in-flight jobs.
    pub async fn run_worker(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            max_concurrency = self.config.max_concurrency,
            "Orchestrator worker started"
        );
        loop {
            let permit = tokio::select! {
                () = shutdown.cancelled() => break,
                acquired = self.semaphore.clone().acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            tokio::select! {
                () = shutdown.cancelled() => break,
                dequeued = self.queue.dequeue(self.config.dequeue_wait()) => match dequeued {
                    Ok(Some(request)) => {
                        let orchestrator = self.clone();
                        tokio::spawn(async move {
                            if let Err(err) = orchestrator.run(request, permit).await {
                                error!(error = %err, "Execution processing failed");
                            }
                        });
                    }
                    Ok(None) => {}
                    Err(err) => {
                        error!(error = %err, "Queue dequeue failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }
        info!("Orchestrator worker stopped");
    }

    /// Run one execution through its full lifecycle, waiting for a
    /// concurrency slot first. The worker loop takes its slot before the
    /// dequeue and calls [`Orchestrator::run`] directly.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<()> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| OrchestraError::InvalidState("worker pool closed".to_string()))?;
        self.run(request, permit).await
    }

    /// Lifecycle of one execution under an already-held concurrency slot.
    /// The slot is released early on paths that never start the job: a
    /// cancel that landed while the request was queued, and a workflow
    /// lookup miss.
    async fn run(&self, request: ExecutionRequest, permit: OwnedSemaphorePermit) -> Result<()> {
        let execution = match self.store.get(request.execution_id).await? {
            Some(execution) => execution,
            None => {
                // The queue outlived the record (e.g. an enqueue that failed
                // between insert and push elsewhere). Re-create so the
                // lifecycle stays tracked.
                warn!(execution_id = %request.execution_id, "Dequeued request without a record");
                let execution = Execution::from_request(&request);
                self.store.insert(&execution).await?;
                execution
            }
        };

        // Cancelled while still queued: skip straight to Cancelled with zero
        // duration, before any work starts.
        if execution.status == ExecutionStatus::Cancelling {
            drop(permit);
            return self.finish(&execution, Finish::cancelled(true)).await;
        }

        // A workflow lookup miss must not consume worker capacity.
        let (handler, metadata) = match self.registry.resolve(&execution.workflow) {
            Ok(resolved) => resolved,
            Err(RegistryError::NotFound(name)) => {
                drop(permit);
                return self
                    .finish(
                        &execution,
                        Finish::failed(
                            format!("workflow not found: {name}"),
                            ExecutionErrorKind::WorkflowNotFound,
                        ),
                    )
                    .await;
            }
            Err(RegistryError::LoadFailed(name, cause)) => {
                drop(permit);
                return self
                    .finish(
                        &execution,
                        Finish::failed(
                            format!("workflow {name} failed to load: {cause}"),
                            ExecutionErrorKind::WorkflowLoadError,
                        ),
                    )
                    .await;
            }
        };

        if let Some(warmer) = &self.warmer {
            warmer.prewarm(execution.organization.as_deref()).await;
        }

        let started_at = Utc::now();
        let marked = self
            .store
            .transition(
                execution.id,
                &[ExecutionStatus::Pending],
                TransitionUpdate::to(ExecutionStatus::Running).started_at(started_at),
            )
            .await?;
        if !marked {
            // Someone moved the record between dequeue and start: a cancel
            // request or a reconciler sweep. The record is authoritative.
            let Some(current) = self.store.get(execution.id).await? else {
                return Err(OrchestraError::InvalidState(format!(
                    "execution {} disappeared",
                    execution.id
                )));
            };
            if current.status == ExecutionStatus::Cancelling {
                return self.finish(&current, Finish::cancelled(true)).await;
            }
            // Already terminal; make sure a synchronous caller is unblocked.
            if current.synchronous {
                self.delivery
                    .push(ExecutionOutcome::from_execution(&current))
                    .await?;
            }
            return Ok(());
        }
        self.events
            .publish(execution.id, ExecutionStatus::Running, None);

        let token = CancellationToken::new();
        self.cancel_tokens.insert(execution.id, token.clone());

        let ctx = JobContext {
            execution_id: execution.id,
            organization: execution.organization.clone(),
            parameters: execution.parameters.clone(),
            cancel: token.clone(),
        };
        let mut handle = tokio::spawn(async move { handler.run(ctx).await });

        let timeout = if metadata.timeout.is_zero() {
            self.config.default_timeout()
        } else {
            metadata.timeout
        };
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut cancel_poll = tokio::time::interval(self.config.cancel_poll_interval());
        cancel_poll.tick().await; // the first tick is immediate

        let finish = loop {
            tokio::select! {
                joined = &mut handle => break match joined {
                    Ok(Ok(JobOutput::Success(result))) => Finish::success(result),
                    Ok(Ok(JobOutput::CompletedWithErrors { result, errors })) => {
                        Finish::completed_with_errors(result, errors)
                    }
                    Ok(Err(job_error)) => Finish::failed(
                        job_error.message.clone(),
                        ExecutionErrorKind::JobError(job_error.error_type),
                    ),
                    Err(join_error) if join_error.is_cancelled() => Finish::cancelled(false),
                    Err(join_error) => Finish::failed(
                        format!("job panicked: {join_error}"),
                        ExecutionErrorKind::JobError("panic".to_string()),
                    ),
                },
                () = &mut deadline => {
                    // Hard termination: the job must not out-live its
                    // timeout, cooperative signal or not.
                    token.cancel();
                    handle.abort();
                    let _ = (&mut handle).await;
                    break Finish::timed_out(timeout);
                }
                () = token.cancelled() => {
                    handle.abort();
                    let _ = (&mut handle).await;
                    break Finish::cancelled(false);
                }
                _ = cancel_poll.tick() => {
                    // A cancel issued on another worker only reaches us
                    // through the persisted Cancelling status.
                    if let Ok(Some(current)) = self.store.get(execution.id).await {
                        if current.status == ExecutionStatus::Cancelling {
                            token.cancel();
                        }
                    }
                }
            }
        };

        self.cancel_tokens.remove(&execution.id);

        let mut running = execution;
        running.status = ExecutionStatus::Running;
        running.started_at = Some(started_at);
        self.finish(&running, finish).await
    }

    /// Single terminal path: persisted transition, index maintenance, status
    /// event, audit record, and the one synchronous delivery push.
    async fn finish(&self, execution: &Execution, finish: Finish) -> Result<()> {
        let completed_at = Utc::now();
        let duration_ms = if finish.zero_duration {
            0
        } else {
            let reference = execution.started_at.unwrap_or(execution.created_at);
            (completed_at - reference).num_milliseconds().max(0)
        };

        let mut update = TransitionUpdate::to(finish.status)
            .completed_at(completed_at)
            .duration_ms(duration_ms);

        let result_bytes = finish
            .result
            .as_ref()
            .map(|r| r.to_string().len())
            .unwrap_or(0);
        let mut inline_result = finish.result.clone();
        if let Some(result) = &finish.result {
            if result_bytes > self.config.inline_result_limit_bytes {
                if let Some(blobs) = &self.blobs {
                    match blobs.put(execution.id, result).await {
                        Ok(blob_ref) => {
                            update = update.result_blob_ref(blob_ref);
                            inline_result = None;
                        }
                        Err(err) => {
                            // Better an oversized inline result than a lost one.
                            warn!(execution_id = %execution.id, error = %err,
                                "Blob externalization failed, storing result inline");
                        }
                    }
                }
            }
        }
        if let Some(result) = &inline_result {
            update = update.result(result.clone());
        }
        if let Some(error) = &finish.error {
            update.error = Some(error.clone());
            update.error_kind = finish.error_kind.clone();
        }

        let applied = self
            .store
            .transition(
                execution.id,
                &[
                    ExecutionStatus::Pending,
                    ExecutionStatus::Running,
                    ExecutionStatus::Cancelling,
                ],
                update,
            )
            .await?;

        // The record is authoritative for what we publish and deliver: if
        // another writer (reconciler, cancel) won the race, report its state.
        let outcome = if applied {
            ExecutionOutcome {
                execution_id: execution.id,
                status: finish.status,
                result: inline_result,
                error: finish.error.clone(),
                error_kind: finish.error_kind.clone(),
                duration_ms: Some(duration_ms),
            }
        } else {
            warn!(execution_id = %execution.id, status = %finish.status,
                "Terminal transition lost a race, delivering the stored state");
            let current = self
                .store
                .get(execution.id)
                .await?
                .ok_or_else(|| OrchestraError::InvalidState(format!(
                    "execution {} disappeared",
                    execution.id
                )))?;
            ExecutionOutcome::from_execution(&current)
        };

        self.events.publish(
            execution.id,
            outcome.status,
            outcome.error.clone().or_else(|| Some("ok".to_string())),
        );
        self.audit
            .record(AuditRecord {
                execution_id: execution.id,
                workflow: execution.workflow.clone(),
                organization: execution.organization.clone(),
                status: outcome.status,
                duration_ms: outcome.duration_ms,
                result_bytes,
            })
            .await;

        if execution.synchronous {
            self.delivery.push(outcome).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionEnqueuer for Orchestrator {
    async fn enqueue_execution(&self, request: ExecutionRequest) -> Result<Uuid> {
        self.enqueue(request).await
    }
}
