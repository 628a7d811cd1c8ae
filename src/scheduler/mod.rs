//! # Scheduler
//!
//! Evaluates CRON expressions against persisted per-workflow schedule state,
//! finds due work, and triggers it — naturally on the polling loop or
//! manually through the admin surface. Both trigger paths run the same
//! update sequence, so persisted state cannot tell them apart.
//!
//! Malformed expressions are flagged as errors and never produce a next-run
//! time: a broken schedule fails safe (never fires) rather than open.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::error::{OrchestraError, Result};
use crate::models::{ExecutionRequest, Requester, ScheduleState};
use crate::orchestration::{ExecutionEnqueuer, WorkflowRegistry};
use crate::store::ExecutionStore;

/// Health classification of one schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleHealth {
    Ok,
    /// Informational only; a short natural interval does not block execution.
    Warning(String),
    /// Malformed expression; excluded from due evaluation entirely.
    Error(String),
}

/// Evaluation result for one scheduled workflow.
#[derive(Debug, Clone)]
pub struct ScheduleReport {
    pub workflow: String,
    pub cron: String,
    pub next_run: Option<DateTime<Utc>>,
    pub health: ScheduleHealth,
    pub due: bool,
    /// Next-run time passed by more than the grace buffer. Reporting signal,
    /// not an error.
    pub overdue: bool,
}

/// Result of validating a CRON expression through the admin surface.
#[derive(Debug, Clone)]
pub struct CronDescription {
    pub valid: bool,
    pub description: String,
    pub next_runs: Vec<DateTime<Utc>>,
    pub warning: Option<String>,
}

pub struct Scheduler {
    store: Arc<dyn ExecutionStore>,
    registry: Arc<WorkflowRegistry>,
    enqueuer: Arc<dyn ExecutionEnqueuer>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        registry: Arc<WorkflowRegistry>,
        enqueuer: Arc<dyn ExecutionEnqueuer>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            enqueuer,
            config,
        }
    }

    /// Evaluate every scheduled workflow at `now`.
    ///
    /// Schedule state is created lazily on first evaluation: an unseen
    /// workflow gets its next-run computed and persisted here, so it becomes
    /// due only once that time actually passes.
    pub async fn evaluate(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleReport>> {
        let mut reports = Vec::new();
        for metadata in self.registry.list() {
            let Some(expression) = metadata.cron.clone() else {
                continue;
            };

            let schedule = match parse_cron(&expression) {
                Ok(schedule) => schedule,
                Err(err) => {
                    reports.push(ScheduleReport {
                        workflow: metadata.name,
                        cron: expression,
                        next_run: None,
                        health: ScheduleHealth::Error(err.to_string()),
                        due: false,
                        overdue: false,
                    });
                    continue;
                }
            };

            let mut state = self
                .store
                .schedule_state(&metadata.name)
                .await?
                .unwrap_or_else(|| ScheduleState::new(&metadata.name));
            if state.next_run.is_none() {
                state.next_run = schedule.after(&now).next();
                self.store.put_schedule_state(&state).await?;
            }

            let next_run = state.next_run;
            let due = next_run.is_some_and(|at| at <= now);
            let overdue = next_run.is_some_and(|at| now - at > self.config.grace_buffer());
            let health = match short_interval(&schedule, now, self.config.min_interval_warning()) {
                Some(interval) => ScheduleHealth::Warning(format!(
                    "natural interval of {}s is under {}s",
                    interval.num_seconds(),
                    self.config.min_interval_warning().num_seconds()
                )),
                None => ScheduleHealth::Ok,
            };

            reports.push(ScheduleReport {
                workflow: metadata.name,
                cron: expression,
                next_run,
                health,
                due,
                overdue,
            });
        }
        Ok(reports)
    }

    /// Due schedules at `now`: next-run has passed and the expression is
    /// valid.
    pub async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleReport>> {
        Ok(self
            .evaluate(now)
            .await?
            .into_iter()
            .filter(|r| r.due && !matches!(r.health, ScheduleHealth::Error(_)))
            .collect())
    }

    /// Trigger every due schedule. Each trigger enqueues an asynchronous
    /// execution and writes the schedule bookkeeping (next run, last run,
    /// last execution, run count) in one state update, so a schedule can
    /// never be found due twice for the same tick.
    pub async fn trigger_due(&self, now: DateTime<Utc>) -> Result<Vec<uuid::Uuid>> {
        let mut triggered = Vec::new();
        for report in self.due_schedules(now).await? {
            match self.trigger(&report.workflow, &report.cron, now).await {
                Ok(execution_id) => triggered.push(execution_id),
                Err(err) => {
                    // One broken schedule must not stop the others.
                    warn!(workflow = %report.workflow, error = %err, "Schedule trigger failed");
                }
            }
        }
        Ok(triggered)
    }

    /// Manual trigger, bypassing the due check. The state update sequence is
    /// identical to a natural trigger, so audit and next-run math stay
    /// consistent regardless of trigger source.
    pub async fn trigger_manual(&self, workflow: &str) -> Result<uuid::Uuid> {
        let metadata = self
            .registry
            .list()
            .into_iter()
            .find(|m| m.name == workflow)
            .ok_or_else(|| {
                OrchestraError::InvalidState(format!("workflow not registered: {workflow}"))
            })?;
        let expression = metadata.cron.ok_or_else(|| {
            OrchestraError::InvalidCronExpression(format!("workflow {workflow} has no schedule"))
        })?;
        self.trigger(workflow, &expression, Utc::now()).await
    }

    async fn trigger(
        &self,
        workflow: &str,
        expression: &str,
        now: DateTime<Utc>,
    ) -> Result<uuid::Uuid> {
        let schedule = parse_cron(expression)?;

        let request = ExecutionRequest::new(workflow, serde_json::json!({}))
            .with_requester(Requester::new("scheduler", "scheduler"));
        let execution_id = self.enqueuer.enqueue_execution(request).await?;

        let mut state = self
            .store
            .schedule_state(workflow)
            .await?
            .unwrap_or_else(|| ScheduleState::new(workflow));
        state.next_run = schedule.after(&now).next();
        state.last_run = Some(now);
        state.last_execution_id = Some(execution_id);
        state.run_count += 1;
        self.store.put_schedule_state(&state).await?;

        info!(
            workflow = workflow,
            execution_id = %execution_id,
            next_run = ?state.next_run,
            run_count = state.run_count,
            "Schedule triggered"
        );
        Ok(execution_id)
    }

    /// Validate and describe a CRON expression.
    pub fn describe(&self, expression: &str, next_runs: usize) -> CronDescription {
        let schedule = match parse_cron(expression) {
            Ok(schedule) => schedule,
            Err(err) => {
                return CronDescription {
                    valid: false,
                    description: err.to_string(),
                    next_runs: Vec::new(),
                    warning: None,
                }
            }
        };
        let now = Utc::now();
        let upcoming: Vec<DateTime<Utc>> = schedule.after(&now).take(next_runs).collect();
        let description = match upcoming.first() {
            Some(first) => format!(
                "valid expression; next run at {}",
                first.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => "valid expression with no upcoming runs".to_string(),
        };
        let warning =
            short_interval(&schedule, now, self.config.min_interval_warning()).map(|interval| {
                format!(
                    "runs every {}s, which is under the {}s advisory minimum",
                    interval.num_seconds(),
                    self.config.min_interval_warning().num_seconds()
                )
            });
        CronDescription {
            valid: true,
            description,
            next_runs: upcoming,
            warning,
        }
    }

    /// Polling loop for the daemon: trigger due schedules every interval.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.tick().await; // the first tick is immediate
        info!(
            interval_secs = self.config.poll_interval_secs,
            "Scheduler started"
        );
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.trigger_due(Utc::now()).await {
                        warn!(error = %err, "Scheduler tick failed");
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }
}

/// Parse a CRON expression, accepting the conventional 5-field form by
/// prefixing a seconds field, as well as the native 6/7-field forms.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(OrchestraError::InvalidCronExpression(
            "cron expression cannot be empty".to_string(),
        ));
    }
    let field_count = trimmed.split_whitespace().count();
    let normalized = match field_count {
        5 => format!("0 {trimmed}"),
        6 | 7 => trimmed.to_string(),
        n => {
            return Err(OrchestraError::InvalidCronExpression(format!(
                "expected 5, 6 or 7 fields, found {n}: {trimmed}"
            )))
        }
    };
    Schedule::from_str(&normalized).map_err(|e| {
        OrchestraError::InvalidCronExpression(format!("invalid cron expression '{trimmed}': {e}"))
    })
}

/// Natural interval between the next two runs, when it is under `minimum`.
fn short_interval(
    schedule: &Schedule,
    now: DateTime<Utc>,
    minimum: chrono::Duration,
) -> Option<chrono::Duration> {
    let mut upcoming = schedule.after(&now);
    let first = upcoming.next()?;
    let second = upcoming.next()?;
    let interval = second - first;
    (interval < minimum).then_some(interval)
}
