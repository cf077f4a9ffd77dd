//! Work claiming: long-poll fan-out of pending runs to workers.
//!
//! Claim ordering is load-bearing: the run transitions to running and
//! the claim-expiration message is posted before the pending message is
//! deleted, so a crash anywhere in between leaves at least one advisory
//! message alive for every non-terminal run.

use crate::context::SystemContext;
use crate::credentials::RunCredentials;
use crate::worker_registry::WorkerRegistry;
use chrono::{DateTime, Utc};
use conveyor_shared::errors::{ApiError, ApiResult};
use conveyor_shared::messaging::{PendingMessage, QueueName};
use conveyor_shared::models::task::TaskStatus;
use conveyor_shared::state_machine::RunState;
use conveyor_shared::validation::validate_identifier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimWorkRequest {
    pub provisioner_id: String,
    pub worker_type: String,
    pub worker_group: String,
    pub worker_id: String,
    /// Upper bound on claims returned in one call.
    pub count: usize,
}

/// One claimed run, handed to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedRun {
    pub status: TaskStatus,
    pub run_id: u32,
    pub worker_group: String,
    pub worker_id: String,
    pub taken_until: DateTime<Utc>,
    pub credentials: RunCredentials,
}

/// Result of a reclaim: the same claim with a later horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimedRun {
    pub status: TaskStatus,
    pub run_id: u32,
    pub taken_until: DateTime<Utc>,
    pub credentials: RunCredentials,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ClaimOutcome {
    Claimed,
    Ghost,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ReclaimOutcome {
    Reclaimed,
    NotAdvancing,
    NotRunning,
}

pub struct WorkClaimer {
    ctx: Arc<SystemContext>,
    registry: WorkerRegistry,
}

impl WorkClaimer {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self {
            registry: WorkerRegistry::new(ctx.clone()),
            ctx,
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Long-poll for up to `count` pending runs, draining priority
    /// buckets strictly highest-first each cycle. Returns early as soon
    /// as anything is claimed; otherwise waits out the long-poll window
    /// or the caller's abort signal.
    #[instrument(skip(self, request, abort), fields(worker_id = %request.worker_id))]
    pub async fn claim_work(
        &self,
        request: &ClaimWorkRequest,
        abort: Option<Arc<Notify>>,
    ) -> ApiResult<Vec<ClaimedRun>> {
        for (field, value) in [
            ("provisionerId", &request.provisioner_id),
            ("workerType", &request.worker_type),
            ("workerGroup", &request.worker_group),
            ("workerId", &request.worker_id),
        ] {
            validate_identifier(value, field)?;
        }

        let worker = self
            .registry
            .worker_seen(
                &request.provisioner_id,
                &request.worker_type,
                &request.worker_group,
                &request.worker_id,
            )
            .await
            .map_err(ApiError::from)?;

        let long_poll = Duration::from_secs(self.ctx.config.claims.long_poll_seconds);
        let poll_interval = self.ctx.config.claims.poll_interval();
        let started = Instant::now();

        if worker.is_quarantined(Utc::now()) {
            debug!(worker_id = %request.worker_id, "quarantined worker polled for work");
            self.wait(long_poll, abort.as_deref()).await;
            return Ok(vec![]);
        }

        let count = request.count.max(1);
        let mut claims: Vec<ClaimedRun> = Vec::new();
        loop {
            for queue in
                QueueName::pending_buckets(&request.provisioner_id, &request.worker_type)
            {
                if claims.len() >= count {
                    break;
                }
                let messages = self
                    .ctx
                    .queues()
                    .receive(
                        &queue,
                        count - claims.len(),
                        self.ctx.config.claims.claim_timeout(),
                    )
                    .await
                    .map_err(|e| ApiError::internal(e.to_string()))?;

                for message in messages {
                    let pending: PendingMessage =
                        match serde_json::from_value(message.payload.clone()) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(queue = %queue, error = %e, "dropping malformed pending message");
                                let _ = self.ctx.queues().delete(&queue, &message.receipt).await;
                                continue;
                            }
                        };
                    match self.try_claim(&pending, request).await? {
                        Some(claim) => {
                            claims.push(claim);
                            // Run is running and its claim message is
                            // posted; only now is the pending message
                            // disposable.
                            self.ctx
                                .queues()
                                .delete(&queue, &message.receipt)
                                .await
                                .map_err(|e| ApiError::internal(e.to_string()))?;
                        }
                        None => {
                            // Ghost: the run moved on while the message
                            // sat in the queue.
                            let _ = self.ctx.queues().delete(&queue, &message.receipt).await;
                        }
                    }
                }
            }

            if !claims.is_empty() || started.elapsed() >= long_poll {
                return Ok(claims);
            }
            let remaining = long_poll - started.elapsed();
            self.wait(remaining.min(poll_interval), abort.as_deref()).await;
            if started.elapsed() >= long_poll {
                return Ok(claims);
            }
        }
    }

    async fn wait(&self, duration: Duration, abort: Option<&Notify>) {
        match abort {
            Some(notify) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = notify.notified() => {}
                }
            }
            None => tokio::time::sleep(duration).await,
        }
    }

    /// Bind one pending message to a running run. Returns `None` for
    /// ghosts (run no longer pending).
    async fn try_claim(
        &self,
        pending: &PendingMessage,
        request: &ClaimWorkRequest,
    ) -> ApiResult<Option<ClaimedRun>> {
        let now = Utc::now();
        let taken_until = now + self.ctx.config.claims.claim_timeout();

        let mut outcome = ClaimOutcome::Ghost;
        let task = self
            .ctx
            .modify_task(&pending.task_id, |t| {
                outcome = ClaimOutcome::Ghost;
                let is_pending = t
                    .run(pending.run_id)
                    .is_some_and(|r| r.state == RunState::Pending);
                if is_pending {
                    if let Some(run) = t.run_mut(pending.run_id) {
                        run.start(&request.worker_group, &request.worker_id, taken_until, now);
                    }
                    t.taken_until = Some(taken_until);
                    outcome = ClaimOutcome::Claimed;
                }
            })
            .await
            .map_err(ApiError::from)?;
        let Some(task) = task else { return Ok(None) };
        if outcome == ClaimOutcome::Ghost {
            return Ok(None);
        }

        self.ctx
            .put_claim_message(&pending.task_id, pending.run_id, taken_until)
            .await
            .map_err(ApiError::from)?;
        self.registry
            .record_claim(
                &request.provisioner_id,
                &request.worker_type,
                &request.worker_group,
                &request.worker_id,
                &pending.task_id,
                pending.run_id,
            )
            .await
            .map_err(ApiError::from)?;

        let credentials = self
            .ctx
            .credentials
            .mint(&task, pending.run_id, &request.worker_group, &request.worker_id)
            .await
            .map_err(ApiError::from)?;
        self.ctx
            .publish_task_running(&task, pending.run_id)
            .map_err(ApiError::from)?;

        info!(
            task_id = %pending.task_id,
            run_id = pending.run_id,
            worker_id = %request.worker_id,
            "run claimed"
        );
        Ok(Some(ClaimedRun {
            status: task.status(),
            run_id: pending.run_id,
            worker_group: request.worker_group.clone(),
            worker_id: request.worker_id.clone(),
            taken_until,
            credentials,
        }))
    }

    /// Refresh a claim. The new horizon must advance strictly beyond
    /// the current one.
    #[instrument(skip(self))]
    pub async fn reclaim(&self, task_id: &str, run_id: u32) -> ApiResult<ReclaimedRun> {
        let task = self.ctx.require_task(task_id).await?;
        let now = Utc::now();
        if task.past_deadline(now) {
            return Err(ApiError::conflict(format!(
                "task {task_id} is past its deadline; the claim cannot be renewed"
            )));
        }

        let proposed = now + self.ctx.config.claims.claim_timeout();
        let mut outcome = ReclaimOutcome::NotRunning;
        let task = self
            .ctx
            .modify_task(task_id, |t| {
                outcome = ReclaimOutcome::NotRunning;
                if t.last_run_is(run_id, RunState::Running) {
                    let advances = t
                        .run(run_id)
                        .and_then(|r| r.taken_until)
                        .map(|current| proposed > current)
                        .unwrap_or(true);
                    if advances {
                        if let Some(run) = t.run_mut(run_id) {
                            run.taken_until = Some(proposed);
                        }
                        t.taken_until = Some(proposed);
                        outcome = ReclaimOutcome::Reclaimed;
                    } else {
                        outcome = ReclaimOutcome::NotAdvancing;
                    }
                }
            })
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::not_found(format!("task {task_id} not found")))?;

        match outcome {
            ReclaimOutcome::Reclaimed => {
                self.ctx
                    .put_claim_message(task_id, run_id, proposed)
                    .await
                    .map_err(ApiError::from)?;
                let run = task.run(run_id);
                let worker_group = run
                    .and_then(|r| r.worker_group.clone())
                    .unwrap_or_default();
                let worker_id = run.and_then(|r| r.worker_id.clone()).unwrap_or_default();
                let credentials = self
                    .ctx
                    .credentials
                    .mint(&task, run_id, &worker_group, &worker_id)
                    .await
                    .map_err(ApiError::from)?;
                debug!(task_id, run_id, taken_until = %proposed, "claim renewed");
                Ok(ReclaimedRun {
                    status: task.status(),
                    run_id,
                    taken_until: proposed,
                    credentials,
                })
            }
            ReclaimOutcome::NotAdvancing => Err(ApiError::conflict(format!(
                "proposed takenUntil does not advance the claim on run {run_id} of task {task_id}"
            ))),
            ReclaimOutcome::NotRunning => Err(ApiError::conflict(format!(
                "run {run_id} of task {task_id} is not the running last run"
            ))),
        }
    }
}
