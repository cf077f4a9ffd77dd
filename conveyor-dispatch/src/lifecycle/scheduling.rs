//! scheduleTask, rerunTask, cancelTask.

use super::TaskLifecycle;
use chrono::Utc;
use conveyor_shared::constants::MAX_RUNS_ALLOWED;
use conveyor_shared::errors::{ApiError, ApiResult};
use conveyor_shared::messaging::Resolution;
use conveyor_shared::models::run::Run;
use conveyor_shared::models::task::TaskStatus;
use conveyor_shared::state_machine::{ReasonCreated, ReasonResolved};
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq)]
enum RerunOutcome {
    Rerun(u32),
    AlreadyActive,
    RunsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CancelOutcome {
    Canceled(u32),
    NoChange,
}

impl TaskLifecycle {
    /// Force-schedule a task regardless of its dependency state.
    #[instrument(skip(self))]
    pub async fn schedule_task(&self, task_id: &str) -> ApiResult<TaskStatus> {
        match self.tracker.schedule_task(task_id).await? {
            Some(status) => Ok(status),
            None => Err(ApiError::conflict(format!(
                "task {task_id} is past its deadline and can no longer be scheduled"
            ))),
        }
    }

    /// Append a rerun after the task resolved. A task whose last run is
    /// still active treats the call as a replay and returns the current
    /// status.
    #[instrument(skip(self))]
    pub async fn rerun_task(&self, task_id: &str) -> ApiResult<TaskStatus> {
        let task = self.ctx.require_task(task_id).await?;
        let now = Utc::now();
        if task.past_deadline(now) {
            return Err(ApiError::conflict(format!(
                "task {task_id} is past its deadline and can no longer be rerun"
            )));
        }

        let retries = task.definition.retries;
        let mut outcome = RerunOutcome::AlreadyActive;
        let task = self
            .ctx
            .modify_task(task_id, |t| {
                outcome = match t.runs.last() {
                    None => RerunOutcome::RunsExhausted,
                    Some(run) if !run.state.is_terminal() => RerunOutcome::AlreadyActive,
                    Some(_) if t.runs.len() >= MAX_RUNS_ALLOWED => RerunOutcome::RunsExhausted,
                    Some(_) => {
                        let run_id = t.runs.len() as u32;
                        t.runs.push(Run::pending(run_id, ReasonCreated::Rerun, now));
                        t.retries_left =
                            retries.min((MAX_RUNS_ALLOWED - t.runs.len()) as u32);
                        RerunOutcome::Rerun(run_id)
                    }
                };
            })
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::not_found(format!("task {task_id} not found")))?;

        match outcome {
            RerunOutcome::Rerun(run_id) => {
                self.ctx
                    .put_pending_message(&task, run_id)
                    .await
                    .map_err(ApiError::from)?;
                self.ctx
                    .publish_task_pending(&task, run_id)
                    .map_err(ApiError::from)?;
                info!(task_id, run_id, "task rerun");
                Ok(task.status())
            }
            RerunOutcome::AlreadyActive => Ok(task.status()),
            RerunOutcome::RunsExhausted => Err(ApiError::conflict(format!(
                "task {task_id} cannot be rerun: no resolved run to rerun or run limit reached"
            ))),
        }
    }

    /// Cancel the active run, or record a cancellation for a task that
    /// never ran. Cancelling an already-resolved task is a no-op.
    #[instrument(skip(self))]
    pub async fn cancel_task(&self, task_id: &str) -> ApiResult<TaskStatus> {
        let task = self.ctx.require_task(task_id).await?;
        let now = Utc::now();
        if task.past_deadline(now) {
            return Err(ApiError::conflict(format!(
                "task {task_id} is past its deadline and can no longer be canceled"
            )));
        }

        let mut outcome = CancelOutcome::NoChange;
        let task = self
            .ctx
            .modify_task(task_id, |t| {
                outcome = match t.runs.last_mut() {
                    Some(run) if !run.state.is_terminal() => {
                        run.resolve(ReasonResolved::Canceled, now);
                        t.taken_until = None;
                        CancelOutcome::Canceled(run.run_id)
                    }
                    None => {
                        t.runs
                            .push(Run::exception(0, ReasonResolved::Canceled, now));
                        CancelOutcome::Canceled(0)
                    }
                    Some(_) => CancelOutcome::NoChange,
                };
            })
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::not_found(format!("task {task_id} not found")))?;

        if let CancelOutcome::Canceled(run_id) = outcome {
            self.ctx
                .put_resolved_message(&task, Resolution::Exception)
                .await
                .map_err(ApiError::from)?;
            self.ctx
                .publish_task_exception(&task, Some(run_id))
                .map_err(ApiError::from)?;
            info!(task_id, run_id, "task canceled");
        }
        Ok(task.status())
    }
}
