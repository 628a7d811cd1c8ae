//! Admin surface tests: permission gating and operation plumbing.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{EchoHandler, Harness};
use orchestra_core::config::{ReconcilerConfig, SchedulerConfig};
use orchestra_core::error::OrchestraError;
use orchestra_core::orchestration::{AdminService, AuthContext, Reconciler, WorkflowMetadata};
use orchestra_core::scheduler::Scheduler;
use orchestra_core::store::ExecutionStore;

fn admin_service_for(h: &Harness) -> AdminService {
    let reconciler = Arc::new(Reconciler::new(h.store.clone(), ReconcilerConfig::default()));
    let scheduler = Arc::new(Scheduler::new(
        h.store.clone(),
        h.registry.clone(),
        h.orchestrator.clone(),
        SchedulerConfig::default(),
    ));
    AdminService::new(reconciler, scheduler)
}

#[tokio::test]
async fn non_admin_callers_are_rejected_everywhere() {
    let h = Harness::new();
    let admin = admin_service_for(&h);
    let ctx = AuthContext::user("alice");

    assert!(matches!(
        admin.list_stuck(&ctx).await,
        Err(OrchestraError::PermissionDenied(_))
    ));
    assert!(matches!(
        admin.trigger_cleanup(&ctx).await,
        Err(OrchestraError::PermissionDenied(_))
    ));
    assert!(matches!(
        admin.validate_cron(&ctx, "0 9 * * *", 3).await,
        Err(OrchestraError::PermissionDenied(_))
    ));
    assert!(matches!(
        admin.trigger_schedule(&ctx, "send_report").await,
        Err(OrchestraError::PermissionDenied(_))
    ));
}

#[tokio::test]
async fn admin_can_validate_cron_and_trigger_schedules() {
    let h = Harness::new();
    h.registry.register(
        WorkflowMetadata::new("send_report", Duration::from_secs(5)).with_cron("0 9 * * *"),
        Arc::new(EchoHandler),
    );
    let admin = admin_service_for(&h);
    let ctx = AuthContext::admin("ops");

    let description = admin.validate_cron(&ctx, "0 9 * * *", 3).await.unwrap();
    assert!(description.valid);
    assert_eq!(description.next_runs.len(), 3);

    let description = admin.validate_cron(&ctx, "banana", 3).await.unwrap();
    assert!(!description.valid);

    let id = admin.trigger_schedule(&ctx, "send_report").await.unwrap();
    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.workflow, "send_report");

    assert!(admin.list_stuck(&ctx).await.unwrap().is_empty());
    assert_eq!(admin.trigger_cleanup(&ctx).await.unwrap(), 0);
}
