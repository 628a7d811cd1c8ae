//! Audit/metrics sink.
//!
//! The orchestrator reports one record per finished execution. The default
//! sink writes structured tracing events; hosts wanting a metrics pipeline
//! implement [`AuditSink`] themselves.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::ExecutionStatus;

/// One audit record per finished execution.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub execution_id: Uuid,
    pub workflow: String,
    pub organization: Option<String>,
    pub status: ExecutionStatus,
    pub duration_ms: Option<i64>,
    /// Approximate resource usage: serialized result payload size in bytes.
    pub result_bytes: usize,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Default sink: structured log line per execution.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) {
        tracing::info!(
            execution_id = %record.execution_id,
            workflow = %record.workflow,
            organization = record.organization.as_deref(),
            status = %record.status,
            duration_ms = record.duration_ms,
            result_bytes = record.result_bytes,
            "EXECUTION_AUDIT"
        );
    }
}
