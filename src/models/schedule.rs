//! Persisted per-workflow schedule state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One record per schedulable workflow name, created lazily on first
/// evaluation and updated atomically with every natural or manual trigger.
///
/// The CRON expression itself lives on the workflow definition; this record
/// only carries the derived run bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub workflow: String,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_execution_id: Option<Uuid>,
    pub run_count: i64,
}

impl ScheduleState {
    pub fn new(workflow: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            next_run: None,
            last_run: None,
            last_execution_id: None,
            run_count: 0,
        }
    }
}
