//! # Orchestration
//!
//! The execution orchestration subsystem: workflow registry, orchestrator,
//! synchronous delivery, stuck-execution reconciler and the administrative
//! surface.

pub mod admin;
pub mod delivery;
pub mod orchestrator;
pub mod reconciler;
pub mod registry;

pub use admin::{AdminService, AuthContext};
pub use delivery::{ExecutionOutcome, MemoryDelivery, RedisDelivery, ResultDelivery};
pub use orchestrator::{ExecutionEnqueuer, Orchestrator};
pub use reconciler::{Reconciler, StuckExecution};
pub use registry::{
    JobContext, JobError, JobOutput, RegistryError, WorkflowHandler, WorkflowMetadata,
    WorkflowRegistry,
};
