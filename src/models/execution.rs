//! Execution record and status lifecycle.
//!
//! An [`Execution`] is one invocation of a workflow or data provider, tracked
//! through the status state machine. Records are created in `Pending` at
//! enqueue time and only ever mutated by the orchestrator and the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Execution status lifecycle.
///
/// `Pending → Running → {Success | Failed | Timeout | CompletedWithErrors |
/// Cancelling → Cancelled}`. Terminal statuses never transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created and queued, not yet picked up by a worker
    Pending,
    /// A worker is currently executing the job
    Running,
    /// A cancel was requested while the job was Pending or Running
    Cancelling,
    /// Job completed successfully
    Success,
    /// Job failed or the workflow could not be resolved
    Failed,
    /// Job exceeded its timeout (or was force-timed-out by the reconciler)
    Timeout,
    /// Cancel request was honored
    Cancelled,
    /// Job produced a result but reported errors alongside it
    CompletedWithErrors,
}

impl ExecutionStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::Failed
                | Self::Timeout
                | Self::Cancelled
                | Self::CompletedWithErrors
        )
    }

    /// Active statuses are the ones tracked in the status index.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Whether a transition from `self` into `to` is legal.
    pub fn can_transition_to(&self, to: ExecutionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, to) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending | Self::Running, Self::Cancelling) => true,
            (Self::Pending | Self::Running | Self::Cancelling, Self::Cancelled) => true,
            // Pending can fail directly (workflow lookup miss) or time out
            // directly (reconciler sweep of a lost message).
            (Self::Pending | Self::Running, Self::Failed | Self::Timeout) => true,
            (Self::Running, Self::Success | Self::CompletedWithErrors) => true,
            // A job that finishes while a cancel is in flight still reports
            // its real outcome; the conditional store write arbitrates.
            (
                Self::Cancelling,
                Self::Success | Self::CompletedWithErrors | Self::Failed | Self::Timeout,
            ) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::CompletedWithErrors => "completed_with_errors",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "cancelling" => Ok(Self::Cancelling),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            "cancelled" => Ok(Self::Cancelled),
            "completed_with_errors" => Ok(Self::CompletedWithErrors),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

/// Classification of execution failures, persisted alongside the error
/// message so callers can branch without parsing strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "error_type")]
pub enum ExecutionErrorKind {
    /// No workflow registered under the requested name
    WorkflowNotFound,
    /// The workflow is registered but its handler failed to load
    WorkflowLoadError,
    /// The job exceeded its timeout
    ExecutionTimeout,
    /// The job was cancelled before completing
    ExecutionCancelled,
    /// The job itself raised an error; the tag is propagated verbatim
    JobError(String),
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound => write!(f, "workflow_not_found"),
            Self::WorkflowLoadError => write!(f, "workflow_load_error"),
            Self::ExecutionTimeout => write!(f, "execution_timeout"),
            Self::ExecutionCancelled => write!(f, "execution_cancelled"),
            Self::JobError(tag) => write!(f, "job_error:{tag}"),
        }
    }
}

/// Identity of whoever requested the execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Requester {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

impl Requester {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
        }
    }
}

/// Persisted execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow: String,
    /// Organization scope; `None` means global.
    pub organization: Option<String>,
    pub requester: Requester,
    pub parameters: serde_json::Value,
    pub status: ExecutionStatus,
    /// Inline result payload. Empty when `result_in_blob` is set.
    pub result: Option<serde_json::Value>,
    /// Result exceeded the inline threshold and was externalized to the
    /// blob store; this field holds the blob reference.
    pub result_blob_ref: Option<String>,
    pub result_in_blob: bool,
    pub error: Option<String>,
    pub error_kind: Option<ExecutionErrorKind>,
    /// Caller blocks on the per-execution delivery channel when set.
    pub synchronous: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
}

impl Execution {
    /// Build a new Pending record from an enqueue request.
    pub fn from_request(request: &ExecutionRequest) -> Self {
        let now = Utc::now();
        Self {
            id: request.execution_id,
            workflow: request.workflow.clone(),
            organization: request.organization.clone(),
            requester: request.requester.clone(),
            parameters: request.parameters.clone(),
            status: ExecutionStatus::Pending,
            result: None,
            result_blob_ref: None,
            result_in_blob: false,
            error: None,
            error_kind: None,
            synchronous: request.synchronous,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            duration_ms: None,
        }
    }
}

/// Queue message describing one execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub execution_id: Uuid,
    pub workflow: String,
    /// Organization scope; `None` means global.
    pub organization: Option<String>,
    pub requester: Requester,
    pub parameters: serde_json::Value,
    /// Optional inline script payload carried alongside the request.
    pub script: Option<String>,
    pub synchronous: bool,
}

impl ExecutionRequest {
    pub fn new(workflow: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            workflow: workflow.into(),
            organization: None,
            requester: Requester::default(),
            parameters,
            script: None,
            synchronous: false,
        }
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requester = requester;
        self
    }

    pub fn synchronous(mut self) -> Self {
        self.synchronous = true;
        self
    }
}

/// Secondary index entry present only while an execution is Pending or
/// Running, so the reconciler can scan active work without a full table scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusIndexEntry {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn terminal_statuses_never_transition() {
        for terminal in [
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Timeout,
            ExecutionStatus::Cancelled,
            ExecutionStatus::CompletedWithErrors,
        ] {
            assert!(terminal.is_terminal());
            for target in [
                ExecutionStatus::Pending,
                ExecutionStatus::Running,
                ExecutionStatus::Cancelling,
                ExecutionStatus::Success,
                ExecutionStatus::Timeout,
            ] {
                assert!(
                    !terminal.can_transition_to(target),
                    "{terminal} must not re-open into {target}"
                );
            }
        }
    }

    #[test]
    fn lifecycle_transitions() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelling));
        assert!(Running.can_transition_to(Success));
        assert!(Running.can_transition_to(CompletedWithErrors));
        assert!(Running.can_transition_to(Timeout));
        assert!(Cancelling.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Success));
        assert!(!Cancelling.can_transition_to(Running));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Cancelling,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Timeout,
            ExecutionStatus::Cancelled,
            ExecutionStatus::CompletedWithErrors,
        ] {
            let parsed = ExecutionStatus::from_str(&status.to_string()).unwrap();
            assert_eq!(parsed, status);
        }
        assert!(ExecutionStatus::from_str("bogus").is_err());
    }

    #[test]
    fn only_pending_and_running_are_indexed() {
        assert!(ExecutionStatus::Pending.is_active());
        assert!(ExecutionStatus::Running.is_active());
        assert!(!ExecutionStatus::Cancelling.is_active());
        assert!(!ExecutionStatus::Success.is_active());
    }
}
