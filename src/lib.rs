//! # Orchestra Core
//!
//! Execution orchestration for a multi-tenant workflow automation backend.
//!
//! The crate is organized around a handful of cooperating subsystems:
//!
//! - **orchestration**: the worker loop that pulls execution requests off a
//!   queue and runs workflow handlers under bounded concurrency, with hard
//!   timeouts and cooperative-then-forced cancellation
//! - **scheduler**: CRON-driven triggering with persisted per-workflow
//!   schedule state
//! - **store**: execution records, the active-status index, and schedule
//!   state behind a storage trait (Postgres in production, in-memory for
//!   tests)
//! - **cache**: workflow result caching with stampede protection, plus
//!   reference-data pre-warming
//! - **queue**: the execution request transport (Redis list in production)
//! - **events**: broadcast status-change notifications
//! - **config**: YAML configuration with environment overlays, and the
//!   org-over-global configuration entry resolver
//!
//! Synchronous callers wait on a delivery channel for exactly one outcome
//! per execution; asynchronous callers observe progress through status
//! events and the store.

pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod queue;
pub mod scheduler;
pub mod store;

pub use error::{OrchestraError, Result};
pub use models::{Execution, ExecutionRequest, ExecutionStatus};
pub use orchestration::Orchestrator;
