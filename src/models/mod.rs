//! Data model for the execution orchestration core.

pub mod execution;
pub mod schedule;

pub use execution::{
    Execution, ExecutionErrorKind, ExecutionRequest, ExecutionStatus, Requester, StatusIndexEntry,
};
pub use schedule::ScheduleState;
