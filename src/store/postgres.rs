//! PostgreSQL execution store.
//!
//! Schema (managed by the host application's migration tooling):
//!
//! ```sql
//! CREATE TABLE orchestra_executions (
//!     id UUID PRIMARY KEY,
//!     workflow TEXT NOT NULL,
//!     organization TEXT,
//!     requester JSONB NOT NULL,
//!     parameters JSONB NOT NULL,
//!     status TEXT NOT NULL,
//!     result JSONB,
//!     result_blob_ref TEXT,
//!     result_in_blob BOOLEAN NOT NULL DEFAULT FALSE,
//!     error TEXT,
//!     error_kind JSONB,
//!     synchronous BOOLEAN NOT NULL DEFAULT FALSE,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     started_at TIMESTAMPTZ,
//!     completed_at TIMESTAMPTZ,
//!     updated_at TIMESTAMPTZ NOT NULL,
//!     duration_ms BIGINT
//! );
//!
//! CREATE TABLE orchestra_status_index (
//!     execution_id UUID PRIMARY KEY REFERENCES orchestra_executions (id),
//!     status TEXT NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE orchestra_schedule_state (
//!     workflow TEXT PRIMARY KEY,
//!     next_run TIMESTAMPTZ,
//!     last_run TIMESTAMPTZ,
//!     last_execution_id UUID,
//!     run_count BIGINT NOT NULL DEFAULT 0
//! );
//! ```
//!
//! The conditional transition runs the status compare, the record update and
//! the index maintenance inside one transaction, which is what makes the
//! reconciler/worker race benign: whoever commits first wins, the loser's
//! `UPDATE ... WHERE status = ANY(..)` matches zero rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{
    Execution, ExecutionErrorKind, ExecutionStatus, Requester, ScheduleState, StatusIndexEntry,
};

use super::{ExecutionStore, StoreError, TransitionUpdate};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a bounded pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_execution(row: &sqlx::postgres::PgRow) -> Result<Execution, StoreError> {
        let status_str: String = row.try_get("status")?;
        let status = ExecutionStatus::from_str(&status_str)
            .map_err(StoreError::Database)?;
        let requester: serde_json::Value = row.try_get("requester")?;
        let error_kind: Option<serde_json::Value> = row.try_get("error_kind")?;
        let error_kind = match error_kind {
            Some(value) => Some(serde_json::from_value::<ExecutionErrorKind>(value)?),
            None => None,
        };
        Ok(Execution {
            id: row.try_get("id")?,
            workflow: row.try_get("workflow")?,
            organization: row.try_get("organization")?,
            requester: serde_json::from_value::<Requester>(requester)?,
            parameters: row.try_get("parameters")?,
            status,
            result: row.try_get("result")?,
            result_blob_ref: row.try_get("result_blob_ref")?,
            result_in_blob: row.try_get("result_in_blob")?,
            error: row.try_get("error")?,
            error_kind,
            synchronous: row.try_get("synchronous")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            updated_at: row.try_get("updated_at")?,
            duration_ms: row.try_get("duration_ms")?,
        })
    }
}

#[async_trait]
impl ExecutionStore for PostgresStore {
    async fn insert(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orchestra_executions
                (id, workflow, organization, requester, parameters, status,
                 result, result_blob_ref, result_in_blob, error, error_kind,
                 synchronous, created_at, started_at, completed_at, updated_at,
                 duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17)
            "#,
        )
        .bind(execution.id)
        .bind(&execution.workflow)
        .bind(&execution.organization)
        .bind(serde_json::to_value(&execution.requester)?)
        .bind(&execution.parameters)
        .bind(execution.status.to_string())
        .bind(&execution.result)
        .bind(&execution.result_blob_ref)
        .bind(execution.result_in_blob)
        .bind(&execution.error)
        .bind(
            execution
                .error_kind
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(execution.synchronous)
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.updated_at)
        .bind(execution.duration_ms)
        .execute(&mut *tx)
        .await?;

        if execution.status.is_active() {
            sqlx::query(
                r#"
                INSERT INTO orchestra_status_index (execution_id, status, updated_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (execution_id)
                DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(execution.id)
            .bind(execution.status.to_string())
            .bind(execution.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        let row = sqlx::query("SELECT * FROM orchestra_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[ExecutionStatus],
        update: TransitionUpdate,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM orchestra_executions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound(id));
        };
        let mut execution = Self::row_to_execution(&row)?;

        if !from.contains(&execution.status) {
            tx.rollback().await?;
            return Ok(false);
        }
        if let Some(to) = update.to {
            if !execution.status.can_transition_to(to) {
                tx.rollback().await?;
                return Ok(false);
            }
        }

        let now = Utc::now();
        update.apply(&mut execution, now);

        sqlx::query(
            r#"
            UPDATE orchestra_executions
            SET status = $2, result = $3, result_blob_ref = $4,
                result_in_blob = $5, error = $6, error_kind = $7,
                started_at = $8, completed_at = $9, duration_ms = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(execution.status.to_string())
        .bind(&execution.result)
        .bind(&execution.result_blob_ref)
        .bind(execution.result_in_blob)
        .bind(&execution.error)
        .bind(
            execution
                .error_kind
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(execution.updated_at)
        .execute(&mut *tx)
        .await?;

        if execution.status.is_active() {
            sqlx::query(
                r#"
                INSERT INTO orchestra_status_index (execution_id, status, updated_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (execution_id)
                DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(id)
            .bind(execution.status.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query("DELETE FROM orchestra_status_index WHERE execution_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn stale_index_entries(
        &self,
        status: ExecutionStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<StatusIndexEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, status, updated_at
            FROM orchestra_status_index
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at
            "#,
        )
        .bind(status.to_string())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status_str: String = row.try_get("status")?;
                Ok(StatusIndexEntry {
                    execution_id: row.try_get("execution_id")?,
                    status: ExecutionStatus::from_str(&status_str)
                        .map_err(StoreError::Database)?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    async fn index_entry(&self, id: Uuid) -> Result<Option<StatusIndexEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT execution_id, status, updated_at FROM orchestra_status_index WHERE execution_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status_str: String = row.try_get("status")?;
            Ok(StatusIndexEntry {
                execution_id: row.try_get("execution_id")?,
                status: ExecutionStatus::from_str(&status_str).map_err(StoreError::Database)?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn schedule_state(&self, workflow: &str) -> Result<Option<ScheduleState>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT workflow, next_run, last_run, last_execution_id, run_count
            FROM orchestra_schedule_state
            WHERE workflow = $1
            "#,
        )
        .bind(workflow)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ScheduleState {
                workflow: row.try_get("workflow")?,
                next_run: row.try_get("next_run")?,
                last_run: row.try_get("last_run")?,
                last_execution_id: row.try_get("last_execution_id")?,
                run_count: row.try_get("run_count")?,
            })
        })
        .transpose()
    }

    async fn put_schedule_state(&self, state: &ScheduleState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orchestra_schedule_state
                (workflow, next_run, last_run, last_execution_id, run_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (workflow)
            DO UPDATE SET next_run = EXCLUDED.next_run,
                          last_run = EXCLUDED.last_run,
                          last_execution_id = EXCLUDED.last_execution_id,
                          run_count = EXCLUDED.run_count
            "#,
        )
        .bind(&state.workflow)
        .bind(state.next_run)
        .bind(state.last_run)
        .bind(state.last_execution_id)
        .bind(state.run_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
