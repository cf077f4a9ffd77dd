//! Claim-expiration resolver.
//!
//! A claim message becomes visible exactly at its takenUntil. If the
//! run still holds that horizon the worker is gone: the run resolves
//! claim-expired, and a retry run is appended while retries remain.
//! A moved takenUntil (reclaim) or resolved run makes the message
//! stale, and stale messages are simply dropped.

use super::{Disposition, QueueConsumer};
use crate::context::SystemContext;
use async_trait::async_trait;
use chrono::Utc;
use conveyor_shared::constants::MAX_RUNS_ALLOWED;
use conveyor_shared::errors::ConveyorResult;
use conveyor_shared::messaging::{ClaimMessage, QueueName, Resolution};
use conveyor_shared::models::run::Run;
use conveyor_shared::state_machine::{ReasonCreated, ReasonResolved, RunState};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
enum ExpiryOutcome {
    Retried(u32),
    Resolved(u32),
    Stale,
}

pub struct ClaimExpiryConsumer {
    ctx: Arc<SystemContext>,
}

impl ClaimExpiryConsumer {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl QueueConsumer for ClaimExpiryConsumer {
    fn name(&self) -> &'static str {
        "claim-expiry"
    }

    fn queue(&self) -> QueueName {
        QueueName::ClaimExpiration
    }

    async fn handle(&self, payload: &Value) -> ConveyorResult<Disposition> {
        let message: ClaimMessage = match serde_json::from_value(payload.clone()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping malformed claim message");
                return Ok(Disposition::Delete);
            }
        };

        let Some(_task) = self.ctx.load_task(&message.task_id).await? else {
            return Ok(Disposition::Delete);
        };

        let now = Utc::now();
        let mut outcome = ExpiryOutcome::Stale;
        let task = self
            .ctx
            .modify_task(&message.task_id, |t| {
                outcome = ExpiryOutcome::Stale;
                let claim_live = t.run(message.run_id).is_some_and(|r| {
                    r.state == RunState::Running && r.taken_until == Some(message.taken_until)
                });
                if !claim_live {
                    return;
                }
                if let Some(run) = t.run_mut(message.run_id) {
                    run.resolve(ReasonResolved::ClaimExpired, now);
                }
                t.taken_until = None;
                if t.retries_left > 0 && t.runs.len() < MAX_RUNS_ALLOWED {
                    t.retries_left -= 1;
                    let new_run_id = t.runs.len() as u32;
                    t.runs
                        .push(Run::pending(new_run_id, ReasonCreated::Retry, now));
                    outcome = ExpiryOutcome::Retried(new_run_id);
                } else {
                    outcome = ExpiryOutcome::Resolved(message.run_id);
                }
            })
            .await?;
        let Some(task) = task else {
            return Ok(Disposition::Delete);
        };

        match outcome {
            ExpiryOutcome::Retried(new_run_id) => {
                self.ctx.put_pending_message(&task, new_run_id).await?;
                self.ctx.publish_task_pending(&task, new_run_id)?;
                info!(
                    task_id = %message.task_id,
                    expired_run = message.run_id,
                    new_run_id,
                    "claim expired, run retried"
                );
            }
            ExpiryOutcome::Resolved(run_id) => {
                self.ctx
                    .put_resolved_message(&task, Resolution::Exception)
                    .await?;
                self.ctx.publish_task_exception(&task, Some(run_id))?;
                info!(
                    task_id = %message.task_id,
                    run_id,
                    "claim expired, task resolved as exception"
                );
            }
            ExpiryOutcome::Stale => {}
        }
        Ok(Disposition::Delete)
    }
}
