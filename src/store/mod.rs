//! # Execution Store
//!
//! Persistence seam for execution records, the active-status index and
//! schedule state. The store is the source of truth: status transitions are
//! conditional writes that compare against the current status, so a terminal
//! record can never be re-opened and the reconciler can never clobber a
//! worker that finished first.
//!
//! Two implementations ship with the crate: an in-memory store used by tests
//! and embedded setups, and a PostgreSQL store for production.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Execution, ExecutionErrorKind, ExecutionStatus, ScheduleState, StatusIndexEntry,
};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Store-layer errors. Unlike cache errors these are never swallowed:
/// losing a status transition corrupts the state machine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("execution not found: {0}")]
    NotFound(Uuid),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// A status transition plus the record fields written alongside it.
///
/// The index invariant is enforced here, not by callers: applying an update
/// upserts the status-index entry when the target status is active and
/// removes it otherwise, in the same store operation as the status write.
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    pub to: Option<ExecutionStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: Option<serde_json::Value>,
    pub result_blob_ref: Option<String>,
    pub result_in_blob: bool,
    pub error: Option<String>,
    pub error_kind: Option<ExecutionErrorKind>,
}

impl TransitionUpdate {
    pub fn to(status: ExecutionStatus) -> Self {
        Self {
            to: Some(status),
            ..Self::default()
        }
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn duration_ms(mut self, ms: i64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn result_blob_ref(mut self, blob_ref: String) -> Self {
        self.result_blob_ref = Some(blob_ref);
        self.result_in_blob = true;
        self
    }

    pub fn error(mut self, message: impl Into<String>, kind: ExecutionErrorKind) -> Self {
        self.error = Some(message.into());
        self.error_kind = Some(kind);
        self
    }

    /// Apply this update to a record in place (shared by store backends).
    pub(crate) fn apply(&self, execution: &mut Execution, now: DateTime<Utc>) {
        if let Some(to) = self.to {
            execution.status = to;
        }
        if let Some(at) = self.started_at {
            execution.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            execution.completed_at = Some(at);
        }
        if let Some(ms) = self.duration_ms {
            execution.duration_ms = Some(ms);
        }
        if let Some(result) = &self.result {
            execution.result = Some(result.clone());
        }
        if let Some(blob_ref) = &self.result_blob_ref {
            execution.result_blob_ref = Some(blob_ref.clone());
            execution.result_in_blob = true;
        }
        if let Some(error) = &self.error {
            execution.error = Some(error.clone());
        }
        if let Some(kind) = &self.error_kind {
            execution.error_kind = Some(kind.clone());
        }
        execution.updated_at = now;
    }
}

/// Persistence interface consumed by the orchestrator, scheduler and
/// reconciler.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a freshly created execution record. Writes the status-index
    /// entry when the record is Pending.
    async fn insert(&self, execution: &Execution) -> Result<(), StoreError>;

    /// Fetch an execution by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Execution>, StoreError>;

    /// Conditionally transition an execution.
    ///
    /// The update is applied only when the current status is one of `from`;
    /// returns whether it was applied. Status-index maintenance happens in
    /// the same operation as the status write.
    async fn transition(
        &self,
        id: Uuid,
        from: &[ExecutionStatus],
        update: TransitionUpdate,
    ) -> Result<bool, StoreError>;

    /// Scan the status index for entries in `status` whose last update is
    /// older than `older_than`.
    async fn stale_index_entries(
        &self,
        status: ExecutionStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<StatusIndexEntry>, StoreError>;

    /// Current status-index entry for an execution, if any.
    async fn index_entry(&self, id: Uuid) -> Result<Option<StatusIndexEntry>, StoreError>;

    /// Read the schedule state for a workflow.
    async fn schedule_state(&self, workflow: &str) -> Result<Option<ScheduleState>, StoreError>;

    /// Upsert schedule state; all fields are written together so a trigger's
    /// bookkeeping lands atomically.
    async fn put_schedule_state(&self, state: &ScheduleState) -> Result<(), StoreError>;
}

/// External object store for execution results too large to inline.
///
/// `put` returns the blob reference persisted on the record; fetching blobs
/// back is an API-layer concern, not part of the core.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, execution_id: Uuid, payload: &serde_json::Value)
        -> Result<String, StoreError>;
}
