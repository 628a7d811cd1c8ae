//! In-memory execution store backed by `DashMap`.
//!
//! Used by the test suite and by embedded single-process deployments. The
//! conditional-transition semantics are identical to the PostgreSQL store:
//! the status comparison and the index maintenance happen under the record's
//! map entry lock, so concurrent writers observe a consistent order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{Execution, ExecutionStatus, ScheduleState, StatusIndexEntry};

use super::{ExecutionStore, StoreError, TransitionUpdate};

#[derive(Default)]
pub struct MemoryStore {
    executions: DashMap<Uuid, Execution>,
    status_index: DashMap<Uuid, StatusIndexEntry>,
    schedules: DashMap<String, ScheduleState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sync_index(&self, execution: &Execution, now: DateTime<Utc>) {
        if execution.status.is_active() {
            self.status_index.insert(
                execution.id,
                StatusIndexEntry {
                    execution_id: execution.id,
                    status: execution.status,
                    updated_at: now,
                },
            );
        } else {
            self.status_index.remove(&execution.id);
        }
    }

    /// Test hook: backdate an index entry so threshold scans can be
    /// exercised without sleeping.
    pub fn backdate_index_entry(&self, id: Uuid, updated_at: DateTime<Utc>) {
        if let Some(mut entry) = self.status_index.get_mut(&id) {
            entry.updated_at = updated_at;
        }
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn insert(&self, execution: &Execution) -> Result<(), StoreError> {
        self.executions.insert(execution.id, execution.clone());
        self.sync_index(execution, execution.updated_at);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        Ok(self.executions.get(&id).map(|e| e.clone()))
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[ExecutionStatus],
        update: TransitionUpdate,
    ) -> Result<bool, StoreError> {
        let Some(mut entry) = self.executions.get_mut(&id) else {
            return Err(StoreError::NotFound(id));
        };
        if !from.contains(&entry.status) {
            return Ok(false);
        }
        if let Some(to) = update.to {
            if !entry.status.can_transition_to(to) {
                return Ok(false);
            }
        }
        let now = Utc::now();
        update.apply(&mut entry, now);
        let snapshot = entry.clone();
        drop(entry);
        self.sync_index(&snapshot, now);
        Ok(true)
    }

    async fn stale_index_entries(
        &self,
        status: ExecutionStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<StatusIndexEntry>, StoreError> {
        Ok(self
            .status_index
            .iter()
            .filter(|e| e.status == status && e.updated_at < older_than)
            .map(|e| e.clone())
            .collect())
    }

    async fn index_entry(&self, id: Uuid) -> Result<Option<StatusIndexEntry>, StoreError> {
        Ok(self.status_index.get(&id).map(|e| e.clone()))
    }

    async fn schedule_state(&self, workflow: &str) -> Result<Option<ScheduleState>, StoreError> {
        Ok(self.schedules.get(workflow).map(|s| s.clone()))
    }

    async fn put_schedule_state(&self, state: &ScheduleState) -> Result<(), StoreError> {
        self.schedules.insert(state.workflow.clone(), state.clone());
        Ok(())
    }
}
