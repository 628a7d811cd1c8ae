//! Administrative surface: stuck-execution inspection and cleanup, CRON
//! validation, and manual schedule triggering. Every operation is gated to
//! administrative callers.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::{OrchestraError, Result};
use crate::scheduler::{CronDescription, Scheduler};

use super::reconciler::{Reconciler, StuckExecution};

/// Caller identity as resolved by the surrounding auth layer.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub admin: bool,
}

impl AuthContext {
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            admin: true,
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            admin: false,
        }
    }
}

pub struct AdminService {
    reconciler: Arc<Reconciler>,
    scheduler: Arc<Scheduler>,
}

impl AdminService {
    pub fn new(reconciler: Arc<Reconciler>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            reconciler,
            scheduler,
        }
    }

    fn require_admin(ctx: &AuthContext) -> Result<()> {
        if ctx.admin {
            Ok(())
        } else {
            Err(OrchestraError::PermissionDenied(format!(
                "user {} is not an administrator",
                ctx.user_id
            )))
        }
    }

    /// List executions currently stuck past their thresholds.
    pub async fn list_stuck(&self, ctx: &AuthContext) -> Result<Vec<StuckExecution>> {
        Self::require_admin(ctx)?;
        self.reconciler.find_stuck().await
    }

    /// Run a reconciliation sweep now; returns how many executions were
    /// repaired.
    pub async fn trigger_cleanup(&self, ctx: &AuthContext) -> Result<usize> {
        Self::require_admin(ctx)?;
        self.reconciler.reconcile().await
    }

    /// Validate a CRON expression: validity, description, next run times and
    /// a short-interval warning.
    pub async fn validate_cron(
        &self,
        ctx: &AuthContext,
        expression: &str,
        next_runs: usize,
    ) -> Result<CronDescription> {
        Self::require_admin(ctx)?;
        Ok(self.scheduler.describe(expression, next_runs))
    }

    /// Trigger a schedule now, bypassing the due check. Persisted state is
    /// updated exactly as a natural trigger would.
    pub async fn trigger_schedule(&self, ctx: &AuthContext, workflow: &str) -> Result<Uuid> {
        Self::require_admin(ctx)?;
        self.scheduler.trigger_manual(workflow).await
    }
}
