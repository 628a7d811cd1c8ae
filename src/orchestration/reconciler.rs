//! # Stuck-Execution Reconciler
//!
//! Periodic sweep, independent of the orchestrator, that detects executions
//! stuck in Pending or Running past a threshold (crashed worker, lost queue
//! message) and force-transitions them to Timeout.
//!
//! The sweep scans only the status index, and repairs it through the same
//! conditional store write the orchestrator uses: the transition applies
//! only while the record is still Pending/Running, so a worker finishing at
//! the same instant wins and the reconciler's write is a no-op. That makes
//! `reconcile` idempotent.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ReconcilerConfig;
use crate::error::Result;
use crate::events::StatusEventPublisher;
use crate::models::{ExecutionErrorKind, ExecutionStatus, StatusIndexEntry};
use crate::store::{ExecutionStore, TransitionUpdate};

/// A stuck execution found by the sweep.
#[derive(Debug, Clone)]
pub struct StuckExecution {
    pub execution_id: uuid::Uuid,
    pub status: ExecutionStatus,
    pub stuck_since: DateTime<Utc>,
}

impl From<StatusIndexEntry> for StuckExecution {
    fn from(entry: StatusIndexEntry) -> Self {
        Self {
            execution_id: entry.execution_id,
            status: entry.status,
            stuck_since: entry.updated_at,
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn ExecutionStore>,
    events: StatusEventPublisher,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ExecutionStore>, config: ReconcilerConfig) -> Self {
        Self {
            store,
            events: StatusEventPublisher::default(),
            config,
        }
    }

    pub fn with_events(mut self, events: StatusEventPublisher) -> Self {
        self.events = events;
        self
    }

    /// Scan the status index for Pending entries older than the pending
    /// threshold and Running entries older than the running threshold.
    /// Running gets the longer grace period; real work takes time.
    pub async fn find_stuck(&self) -> Result<Vec<StuckExecution>> {
        let now = Utc::now();
        let mut stuck: Vec<StuckExecution> = Vec::new();
        for (status, threshold) in [
            (ExecutionStatus::Pending, self.config.pending_threshold()),
            (ExecutionStatus::Running, self.config.running_threshold()),
        ] {
            let entries = self
                .store
                .stale_index_entries(status, now - threshold)
                .await?;
            stuck.extend(entries.into_iter().map(StuckExecution::from));
        }
        Ok(stuck)
    }

    /// Force every stuck execution to Timeout. Returns how many transitions
    /// were actually applied; a second run with no new stuck work applies
    /// zero.
    pub async fn reconcile(&self) -> Result<usize> {
        let stuck = self.find_stuck().await?;
        let mut repaired = 0usize;
        for entry in stuck {
            let minutes = (Utc::now() - entry.stuck_since).num_minutes();
            let update = TransitionUpdate::to(ExecutionStatus::Timeout)
                .completed_at(Utc::now())
                .error(
                    format!(
                        "execution stuck in {} for {minutes} minutes; worker presumed dead",
                        entry.status
                    ),
                    ExecutionErrorKind::ExecutionTimeout,
                );
            let applied = self
                .store
                .transition(
                    entry.execution_id,
                    &[ExecutionStatus::Pending, ExecutionStatus::Running],
                    update,
                )
                .await?;
            if applied {
                repaired += 1;
                self.events.publish(
                    entry.execution_id,
                    ExecutionStatus::Timeout,
                    Some("reconciled stuck execution".to_string()),
                );
                warn!(
                    execution_id = %entry.execution_id,
                    stuck_status = %entry.status,
                    stuck_minutes = minutes,
                    "Reconciled stuck execution to timeout"
                );
            }
        }
        if repaired > 0 {
            info!(repaired, "Stuck-execution sweep repaired executions");
        }
        Ok(repaired)
    }

    /// Periodic sweep loop, shut down via the token.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        interval.tick().await; // the first tick is immediate
        info!(
            interval_secs = self.config.sweep_interval_secs,
            "Stuck-execution reconciler started"
        );
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.reconcile().await {
                        warn!(error = %err, "Stuck-execution sweep failed");
                    }
                }
            }
        }
        info!("Stuck-execution reconciler stopped");
    }
}
