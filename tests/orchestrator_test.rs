//! Execution lifecycle integration tests over the in-memory backends.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{EchoHandler, FailingHandler, Harness, PartialHandler, SleepingHandler};
use orchestra_core::models::{ExecutionErrorKind, ExecutionRequest, ExecutionStatus};
use orchestra_core::orchestration::WorkflowMetadata;
use orchestra_core::store::ExecutionStore;

#[tokio::test]
async fn successful_execution_reaches_success_with_result() {
    let h = Harness::new();
    h.register("echo", Arc::new(EchoHandler));

    let request = ExecutionRequest::new("echo", json!({ "n": 7 }));
    let id = h.orchestrator.enqueue(request.clone()).await.unwrap();
    h.orchestrator.execute(request).await.unwrap();

    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(record.result, Some(json!({ "echo": { "n": 7 } })));
    assert!(record.error.is_none());
    assert!(record.started_at.is_some());
    assert!(record.completed_at.is_some());
    assert!(record.duration_ms.unwrap() >= 0);
}

#[tokio::test]
async fn job_error_reaches_failed_with_error_kind() {
    let h = Harness::new();
    h.register(
        "validator",
        Arc::new(FailingHandler::new("validation", "amount must be positive")),
    );

    let request = ExecutionRequest::new("validator", json!({ "amount": -3 }));
    let id = h.orchestrator.enqueue(request.clone()).await.unwrap();
    h.orchestrator.execute(request).await.unwrap();

    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("amount must be positive"));
    assert_eq!(
        record.error_kind,
        Some(ExecutionErrorKind::JobError("validation".to_string()))
    );
}

#[tokio::test]
async fn partial_results_reach_completed_with_errors() {
    let h = Harness::new();
    h.register("import", Arc::new(PartialHandler));

    let request = ExecutionRequest::new("import", json!({}));
    let id = h.orchestrator.enqueue(request.clone()).await.unwrap();
    h.orchestrator.execute(request).await.unwrap();

    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::CompletedWithErrors);
    assert_eq!(record.result, Some(json!({ "processed": 8 })));
    assert!(record.error.as_deref().unwrap().contains("row 3"));
}

#[tokio::test]
async fn unknown_workflow_fails_without_running() {
    let h = Harness::new();

    let request = ExecutionRequest::new("no_such_workflow", json!({}));
    let id = h.orchestrator.enqueue(request.clone()).await.unwrap();
    h.orchestrator.execute(request).await.unwrap();

    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.error_kind, Some(ExecutionErrorKind::WorkflowNotFound));
    // Never started: the failure happened before the Running transition.
    assert!(record.started_at.is_none());
}

#[tokio::test]
async fn timeout_hard_terminates_an_uncooperative_job() {
    let h = Harness::new();
    h.registry.register(
        WorkflowMetadata::new("slow", Duration::from_millis(200)),
        Arc::new(SleepingHandler {
            duration: Duration::from_secs(30),
        }),
    );

    let request = ExecutionRequest::new("slow", json!({}));
    let id = h.orchestrator.enqueue(request.clone()).await.unwrap();
    let started = tokio::time::Instant::now();
    h.orchestrator.execute(request).await.unwrap();
    // Hard kill: execute returns at the timeout boundary, not after 30s.
    assert!(started.elapsed() < Duration::from_secs(5));

    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Timeout);
    assert_eq!(record.error_kind, Some(ExecutionErrorKind::ExecutionTimeout));
}

#[tokio::test]
async fn cancel_before_start_skips_the_job_entirely() {
    let h = Harness::new();
    h.register("echo", Arc::new(EchoHandler));

    let request = ExecutionRequest::new("echo", json!({}));
    let id = h.orchestrator.enqueue(request.clone()).await.unwrap();
    assert!(h.orchestrator.request_cancel(id).await.unwrap());
    h.orchestrator.execute(request).await.unwrap();

    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert_eq!(record.duration_ms, Some(0));
    assert!(record.result.is_none());
}

#[tokio::test]
async fn cancel_mid_run_terminates_the_job() {
    let h = Harness::new();
    h.register(
        "slow",
        Arc::new(SleepingHandler {
            duration: Duration::from_secs(30),
        }),
    );

    let request = ExecutionRequest::new("slow", json!({}));
    let id = h.orchestrator.enqueue(request.clone()).await.unwrap();
    let orchestrator = h.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.execute(request).await });

    // Let the job reach Running before cancelling.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(h.orchestrator.request_cancel(id).await.unwrap());
    task.await.unwrap().unwrap();

    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert_eq!(record.error_kind, Some(ExecutionErrorKind::ExecutionCancelled));
}

#[tokio::test]
async fn cancel_after_terminal_is_rejected() {
    let h = Harness::new();
    h.register("echo", Arc::new(EchoHandler));

    let request = ExecutionRequest::new("echo", json!({}));
    let id = h.orchestrator.enqueue(request.clone()).await.unwrap();
    h.orchestrator.execute(request).await.unwrap();

    assert!(!h.orchestrator.request_cancel(id).await.unwrap());
    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn status_index_tracks_only_active_executions() {
    let h = Harness::new();
    h.register("echo", Arc::new(EchoHandler));

    let request = ExecutionRequest::new("echo", json!({}));
    let id = h.orchestrator.enqueue(request.clone()).await.unwrap();
    let entry = h.store.index_entry(id).await.unwrap().unwrap();
    assert_eq!(entry.status, ExecutionStatus::Pending);

    h.orchestrator.execute(request).await.unwrap();
    assert!(h.store.index_entry(id).await.unwrap().is_none());
}

#[tokio::test]
async fn synchronous_caller_receives_the_success_outcome() {
    let h = Harness::new();
    h.register("echo", Arc::new(EchoHandler));

    let shutdown = tokio_util::sync::CancellationToken::new();
    let worker = tokio::spawn(h.orchestrator.clone().run_worker(shutdown.clone()));

    let request = ExecutionRequest::new("echo", json!({ "k": "v" })).synchronous();
    let outcome = h.orchestrator.enqueue_sync(request).await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.result, Some(json!({ "echo": { "k": "v" } })));
    assert!(outcome.duration_ms.is_some());

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn synchronous_caller_receives_a_terminal_answer_on_timeout() {
    let h = Harness::new();
    h.registry.register(
        WorkflowMetadata::new("slow", Duration::from_millis(200)),
        Arc::new(SleepingHandler {
            duration: Duration::from_secs(30),
        }),
    );

    let shutdown = tokio_util::sync::CancellationToken::new();
    let worker = tokio::spawn(h.orchestrator.clone().run_worker(shutdown.clone()));

    let request = ExecutionRequest::new("slow", json!({})).synchronous();
    let outcome = h.orchestrator.enqueue_sync(request).await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Timeout);
    assert_eq!(outcome.error_kind, Some(ExecutionErrorKind::ExecutionTimeout));

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn worker_leaves_the_backlog_queued_while_at_capacity() {
    use orchestra_core::queue::ExecutionQueue;

    let mut config = common::test_config();
    config.max_concurrency = 1;
    let h = Harness::with_config(config);
    h.register(
        "slow",
        Arc::new(SleepingHandler {
            duration: Duration::from_secs(30),
        }),
    );

    let mut ids = Vec::new();
    for _ in 0..5 {
        let request = ExecutionRequest::new("slow", json!({}));
        ids.push(h.orchestrator.enqueue(request).await.unwrap());
    }

    let shutdown = tokio_util::sync::CancellationToken::new();
    let worker = tokio::spawn(h.orchestrator.clone().run_worker(shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(300)).await;

    // One slot, so exactly one job reached Running; the rest stay queued.
    let mut running = 0;
    for id in &ids {
        let record = h.store.get(*id).await.unwrap().unwrap();
        if record.status == ExecutionStatus::Running {
            running += 1;
        } else {
            assert_eq!(record.status, ExecutionStatus::Pending);
        }
    }
    assert_eq!(running, 1);

    // The worker must not have popped messages it has no slot for: a crash
    // would lose them. The backlog is still dequeueable.
    let next = h.queue.dequeue(Duration::from_millis(50)).await.unwrap();
    assert!(next.is_some());

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn synchronous_caller_receives_the_failure_outcome() {
    let h = Harness::new();
    h.register(
        "validator",
        Arc::new(FailingHandler::new("validation", "amount must be positive")),
    );

    let shutdown = tokio_util::sync::CancellationToken::new();
    let worker = tokio::spawn(h.orchestrator.clone().run_worker(shutdown.clone()));

    let request = ExecutionRequest::new("validator", json!({ "amount": -3 })).synchronous();
    let outcome = h.orchestrator.enqueue_sync(request).await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("amount must be positive"));
    assert_eq!(
        outcome.error_kind,
        Some(ExecutionErrorKind::JobError("validation".to_string()))
    );

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn synchronous_caller_learns_of_an_unknown_workflow() {
    let h = Harness::new();

    let shutdown = tokio_util::sync::CancellationToken::new();
    let worker = tokio::spawn(h.orchestrator.clone().run_worker(shutdown.clone()));

    let request = ExecutionRequest::new("no_such_workflow", json!({})).synchronous();
    let outcome = h.orchestrator.enqueue_sync(request).await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert_eq!(outcome.error_kind, Some(ExecutionErrorKind::WorkflowNotFound));

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn synchronous_caller_receives_the_cancelled_outcome() {
    let h = Harness::new();
    h.register(
        "slow",
        Arc::new(SleepingHandler {
            duration: Duration::from_secs(30),
        }),
    );

    let shutdown = tokio_util::sync::CancellationToken::new();
    let worker = tokio::spawn(h.orchestrator.clone().run_worker(shutdown.clone()));

    let request = ExecutionRequest::new("slow", json!({})).synchronous();
    let id = request.execution_id;
    let orchestrator = h.orchestrator.clone();
    let caller = tokio::spawn(async move { orchestrator.enqueue_sync(request).await });

    // Let the job reach Running before cancelling.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.orchestrator.request_cancel(id).await.unwrap());

    let outcome = caller.await.unwrap().unwrap();
    assert_eq!(outcome.execution_id, id);
    assert_eq!(outcome.status, ExecutionStatus::Cancelled);
    assert_eq!(
        outcome.error_kind,
        Some(ExecutionErrorKind::ExecutionCancelled)
    );

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn oversized_results_are_externalized_to_the_blob_store() {
    use async_trait::async_trait;
    use dashmap::DashMap;
    use orchestra_core::orchestration::Orchestrator;
    use orchestra_core::store::{BlobStore, StoreError};
    use uuid::Uuid;

    #[derive(Default)]
    struct MemoryBlobs {
        blobs: DashMap<Uuid, serde_json::Value>,
    }

    #[async_trait]
    impl BlobStore for MemoryBlobs {
        async fn put(
            &self,
            execution_id: Uuid,
            payload: &serde_json::Value,
        ) -> Result<String, StoreError> {
            self.blobs.insert(execution_id, payload.clone());
            Ok(format!("blob://executions/{execution_id}"))
        }
    }

    let mut config = common::test_config();
    config.inline_result_limit_bytes = 16;
    let h = Harness::with_config(config.clone());
    let blobs = Arc::new(MemoryBlobs::default());
    let orchestrator = Arc::new(
        Orchestrator::new(
            h.store.clone(),
            h.queue.clone(),
            h.registry.clone(),
            h.delivery.clone(),
            config,
        )
        .with_blob_store(blobs.clone()),
    );
    h.register("echo", Arc::new(EchoHandler));

    let request = ExecutionRequest::new(
        "echo",
        json!({ "text": "well over sixteen bytes of payload" }),
    );
    let id = orchestrator.enqueue(request.clone()).await.unwrap();
    orchestrator.execute(request).await.unwrap();

    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Success);
    assert!(record.result.is_none());
    assert!(record.result_in_blob);
    assert_eq!(
        record.result_blob_ref.as_deref(),
        Some(format!("blob://executions/{id}").as_str())
    );
    assert!(blobs.blobs.contains_key(&id));
}

#[tokio::test]
async fn status_events_follow_the_lifecycle() {
    let h = Harness::new();
    h.register("echo", Arc::new(EchoHandler));
    let mut events = h.orchestrator.events().subscribe();

    let request = ExecutionRequest::new("echo", json!({}));
    let id = h.orchestrator.enqueue(request.clone()).await.unwrap();
    h.orchestrator.execute(request).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.execution_id == id {
            seen.push(event.status);
        }
    }
    assert_eq!(
        seen,
        vec![
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Success
        ]
    );
}
