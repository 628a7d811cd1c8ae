//! Scheduler integration tests: due evaluation, trigger bookkeeping, and
//! malformed-expression handling.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use common::{EchoHandler, Harness};
use orchestra_core::config::SchedulerConfig;
use orchestra_core::models::{ExecutionStatus, ScheduleState};
use orchestra_core::orchestration::WorkflowMetadata;
use orchestra_core::scheduler::{ScheduleHealth, Scheduler};
use orchestra_core::store::ExecutionStore;

fn at(rfc3339: &str) -> DateTime<Utc> {
    rfc3339.parse().unwrap()
}

fn scheduler_for(h: &Harness) -> Scheduler {
    Scheduler::new(
        h.store.clone(),
        h.registry.clone(),
        h.orchestrator.clone(),
        SchedulerConfig::default(),
    )
}

fn register_daily_report(h: &Harness) {
    h.registry.register(
        WorkflowMetadata::new("send_report", Duration::from_secs(5)).with_cron("0 9 * * *"),
        Arc::new(EchoHandler),
    );
}

#[tokio::test]
async fn schedule_is_due_once_its_next_run_passes() {
    let h = Harness::new();
    register_daily_report(&h);
    let scheduler = scheduler_for(&h);

    let mut state = ScheduleState::new("send_report");
    state.next_run = Some(at("2024-01-01T09:00:00Z"));
    h.store.put_schedule_state(&state).await.unwrap();

    let reports = scheduler.evaluate(at("2024-01-01T08:30:00Z")).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].due);

    let due = scheduler
        .due_schedules(at("2024-01-01T09:05:00Z"))
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].workflow, "send_report");
}

#[tokio::test]
async fn triggering_advances_schedule_state_and_enqueues() {
    let h = Harness::new();
    register_daily_report(&h);
    let scheduler = scheduler_for(&h);

    let mut state = ScheduleState::new("send_report");
    state.next_run = Some(at("2024-01-01T09:00:00Z"));
    h.store.put_schedule_state(&state).await.unwrap();

    let now = at("2024-01-01T09:05:00Z");
    let triggered = scheduler.trigger_due(now).await.unwrap();
    assert_eq!(triggered.len(), 1);

    let state = h.store.schedule_state("send_report").await.unwrap().unwrap();
    assert_eq!(state.next_run, Some(at("2024-01-02T09:00:00Z")));
    assert_eq!(state.last_run, Some(now));
    assert_eq!(state.last_execution_id, Some(triggered[0]));
    assert_eq!(state.run_count, 1);

    let record = h.store.get(triggered[0]).await.unwrap().unwrap();
    assert_eq!(record.workflow, "send_report");
    assert_eq!(record.status, ExecutionStatus::Pending);
    assert!(!record.synchronous);

    // The same tick cannot fire twice: next-run has moved past now.
    assert!(scheduler.trigger_due(now).await.unwrap().is_empty());
}

#[tokio::test]
async fn unseen_schedules_get_lazy_state_and_are_not_due() {
    let h = Harness::new();
    register_daily_report(&h);
    let scheduler = scheduler_for(&h);

    let now = at("2024-01-01T10:00:00Z");
    let reports = scheduler.evaluate(now).await.unwrap();
    assert_eq!(reports[0].next_run, Some(at("2024-01-02T09:00:00Z")));
    assert!(!reports[0].due);

    // The computed next-run was persisted on first sight.
    let state = h.store.schedule_state("send_report").await.unwrap().unwrap();
    assert_eq!(state.next_run, Some(at("2024-01-02T09:00:00Z")));
    assert_eq!(state.run_count, 0);
}

#[tokio::test]
async fn malformed_expressions_are_flagged_and_never_fire() {
    let h = Harness::new();
    h.registry.register(
        WorkflowMetadata::new("broken", Duration::from_secs(5)).with_cron("not a cron"),
        Arc::new(EchoHandler),
    );
    let scheduler = scheduler_for(&h);

    let reports = scheduler.evaluate(at("2024-01-01T09:00:00Z")).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(matches!(reports[0].health, ScheduleHealth::Error(_)));
    assert!(reports[0].next_run.is_none());
    assert!(!reports[0].due);

    assert!(scheduler
        .due_schedules(at("2024-01-01T09:00:00Z"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn manual_trigger_runs_the_same_update_sequence() {
    let h = Harness::new();
    register_daily_report(&h);
    let scheduler = scheduler_for(&h);

    let id = scheduler.trigger_manual("send_report").await.unwrap();

    let state = h.store.schedule_state("send_report").await.unwrap().unwrap();
    assert_eq!(state.last_execution_id, Some(id));
    assert_eq!(state.run_count, 1);
    assert!(state.last_run.is_some());
    assert!(state.next_run.is_some());

    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.workflow, "send_report");
    assert_eq!(record.parameters, json!({}));
}

#[tokio::test]
async fn manual_trigger_of_unknown_workflow_is_an_error() {
    let h = Harness::new();
    let scheduler = scheduler_for(&h);
    assert!(scheduler.trigger_manual("missing").await.is_err());
}

#[tokio::test]
async fn overdue_flag_requires_the_grace_buffer_to_pass() {
    let h = Harness::new();
    register_daily_report(&h);
    let scheduler = scheduler_for(&h);

    let mut state = ScheduleState::new("send_report");
    state.next_run = Some(at("2024-01-01T09:00:00Z"));
    h.store.put_schedule_state(&state).await.unwrap();

    // One minute late: due but within the default two-minute grace buffer.
    let reports = scheduler.evaluate(at("2024-01-01T09:01:00Z")).await.unwrap();
    assert!(reports[0].due);
    assert!(!reports[0].overdue);

    let reports = scheduler.evaluate(at("2024-01-01T09:10:00Z")).await.unwrap();
    assert!(reports[0].due);
    assert!(reports[0].overdue);
}

#[tokio::test]
async fn short_natural_intervals_get_a_warning() {
    let h = Harness::new();
    h.registry.register(
        WorkflowMetadata::new("hot_loop", Duration::from_secs(5)).with_cron("* * * * *"),
        Arc::new(EchoHandler),
    );
    let scheduler = scheduler_for(&h);

    let reports = scheduler.evaluate(Utc::now()).await.unwrap();
    assert!(matches!(reports[0].health, ScheduleHealth::Warning(_)));

    let description = scheduler.describe("* * * * *", 3);
    assert!(description.valid);
    assert_eq!(description.next_runs.len(), 3);
    assert!(description.warning.is_some());
}

#[tokio::test]
async fn describe_rejects_malformed_expressions() {
    let h = Harness::new();
    let scheduler = scheduler_for(&h);

    let description = scheduler.describe("99 99 * * *", 5);
    assert!(!description.valid);
    assert!(description.next_runs.is_empty());

    let description = scheduler.describe("0 9 * * *", 2);
    assert!(description.valid);
    assert_eq!(description.next_runs.len(), 2);
    assert!(description.warning.is_none());
}
