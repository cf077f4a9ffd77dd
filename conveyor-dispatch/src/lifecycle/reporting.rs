//! Worker resolution reports: reportCompleted, reportFailed,
//! reportException.

use super::TaskLifecycle;
use chrono::Utc;
use conveyor_shared::constants::MAX_RUNS_ALLOWED;
use conveyor_shared::errors::{ApiError, ApiResult};
use conveyor_shared::messaging::Resolution;
use conveyor_shared::models::artifact::{ArtifactRef, StorageType};
use conveyor_shared::models::run::Run;
use conveyor_shared::models::task::TaskStatus;
use conveyor_shared::state_machine::{ReasonCreated, ReasonResolved, RunState};
use conveyor_shared::store::{self, Table};
use tracing::{info, instrument, warn};

/// What the modify decided; side effects happen after the commit.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ReportOutcome {
    Resolved,
    Retried(u32),
    Replay,
    RunMissing,
    WrongState,
}

impl TaskLifecycle {
    /// Resolve a running run as completed. Every object-storage
    /// artifact of the run must be present first.
    #[instrument(skip(self))]
    pub async fn report_completed(&self, task_id: &str, run_id: u32) -> ApiResult<TaskStatus> {
        self.ensure_artifacts_present(task_id, run_id).await?;
        let (task, outcome) = self
            .resolve_run(task_id, run_id, ReasonResolved::Completed)
            .await?;
        if outcome == ReportOutcome::Resolved {
            self.ctx
                .put_resolved_message(&task, Resolution::Completed)
                .await
                .map_err(ApiError::from)?;
            self.ctx
                .publish_task_completed(&task, run_id)
                .map_err(ApiError::from)?;
            info!(task_id, run_id, "task completed");
        }
        Ok(task.status())
    }

    /// Resolve a running run as failed.
    #[instrument(skip(self))]
    pub async fn report_failed(&self, task_id: &str, run_id: u32) -> ApiResult<TaskStatus> {
        let (task, outcome) = self
            .resolve_run(task_id, run_id, ReasonResolved::Failed)
            .await?;
        if outcome == ReportOutcome::Resolved {
            self.ctx
                .put_resolved_message(&task, Resolution::Failed)
                .await
                .map_err(ApiError::from)?;
            self.ctx
                .publish_task_failed(&task, run_id)
                .map_err(ApiError::from)?;
            info!(task_id, run_id, "task failed");
        }
        Ok(task.status())
    }

    /// Resolve a running run as an exception. `worker-shutdown` and
    /// `intermittent-task` consume a retry while retries remain, in
    /// which case the task goes back to pending and no task-exception
    /// is published.
    #[instrument(skip(self))]
    pub async fn report_exception(
        &self,
        task_id: &str,
        run_id: u32,
        reason: ReasonResolved,
    ) -> ApiResult<TaskStatus> {
        if !matches!(
            reason,
            ReasonResolved::WorkerShutdown
                | ReasonResolved::MalformedPayload
                | ReasonResolved::ResourceUnavailable
                | ReasonResolved::InternalError
                | ReasonResolved::Superseded
                | ReasonResolved::IntermittentTask
        ) {
            return Err(ApiError::input(format!(
                "'{reason}' is not a reportable exception reason"
            )));
        }

        let (task, outcome) = self.resolve_run(task_id, run_id, reason).await?;
        match outcome {
            ReportOutcome::Retried(new_run_id) => {
                self.ctx
                    .put_pending_message(&task, new_run_id)
                    .await
                    .map_err(ApiError::from)?;
                self.ctx
                    .publish_task_pending(&task, new_run_id)
                    .map_err(ApiError::from)?;
                info!(task_id, run_id, new_run_id, %reason, "task retried after exception");
            }
            ReportOutcome::Resolved => {
                self.ctx
                    .put_resolved_message(&task, Resolution::Exception)
                    .await
                    .map_err(ApiError::from)?;
                self.ctx
                    .publish_task_exception(&task, Some(run_id))
                    .map_err(ApiError::from)?;
                info!(task_id, run_id, %reason, "task resolved as exception");
            }
            _ => {}
        }
        Ok(task.status())
    }

    /// Shared modify for the three report operations. Replays of the
    /// identical report return the stored status; anything else not
    /// matching "last run, running" is a conflict or not-found.
    async fn resolve_run(
        &self,
        task_id: &str,
        run_id: u32,
        reason: ReasonResolved,
    ) -> ApiResult<(conveyor_shared::models::task::Task, ReportOutcome)> {
        self.ctx.require_task(task_id).await?;
        let now = Utc::now();

        let mut outcome = ReportOutcome::WrongState;
        let task = self
            .ctx
            .modify_task(task_id, |t| {
                outcome = if t.run(run_id).is_none() {
                    ReportOutcome::RunMissing
                } else if t.last_run_is(run_id, RunState::Running) {
                    if let Some(run) = t.run_mut(run_id) {
                        run.resolve(reason, now);
                    }
                    t.taken_until = None;
                    if reason.is_retriable_exception()
                        && t.retries_left > 0
                        && t.runs.len() < MAX_RUNS_ALLOWED
                    {
                        t.retries_left -= 1;
                        let new_run_id = t.runs.len() as u32;
                        let reason_created = match reason {
                            ReasonResolved::IntermittentTask => ReasonCreated::TaskRetry,
                            _ => ReasonCreated::Retry,
                        };
                        t.runs.push(Run::pending(new_run_id, reason_created, now));
                        ReportOutcome::Retried(new_run_id)
                    } else {
                        ReportOutcome::Resolved
                    }
                } else if t
                    .run(run_id)
                    .is_some_and(|r| r.reason_resolved == Some(reason))
                {
                    ReportOutcome::Replay
                } else {
                    ReportOutcome::WrongState
                };
            })
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::not_found(format!("task {task_id} not found")))?;

        match outcome {
            ReportOutcome::RunMissing => Err(ApiError::not_found(format!(
                "task {task_id} has no run {run_id}"
            ))),
            ReportOutcome::WrongState => Err(ApiError::conflict(format!(
                "run {run_id} of task {task_id} is not the running last run"
            ))),
            other => Ok((task, other)),
        }
    }

    /// The completion gate: every object artifact attached to the run
    /// must have finished uploading.
    async fn ensure_artifacts_present(&self, task_id: &str, run_id: u32) -> ApiResult<()> {
        let prefix = format!("{task_id}/{run_id}/");
        let mut continuation: Option<String> = None;
        loop {
            let (artifacts, next): (Vec<ArtifactRef>, _) = store::scan_prefix(
                self.ctx.store(),
                Table::Artifacts,
                &prefix,
                continuation.as_deref(),
                100,
            )
            .await
            .map_err(ApiError::from)?;
            for artifact in &artifacts {
                if artifact.storage_type == StorageType::Object && !artifact.present {
                    warn!(task_id, run_id, artifact = %artifact.name, "completion blocked by absent artifact");
                    return Err(ApiError::conflict(format!(
                        "artifact '{}' of run {run_id} is not present yet",
                        artifact.name
                    )));
                }
            }
            continuation = next;
            if continuation.is_none() {
                return Ok(());
            }
        }
    }
}
