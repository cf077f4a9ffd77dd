//! Deadline resolver.
//!
//! The deadline message is enqueued before the task row is created and
//! becomes visible exactly at the deadline, so every unresolved task is
//! resolved deadline-exceeded no later than one resolver cycle past its
//! deadline, whatever else was lost along the way.

use super::{Disposition, QueueConsumer};
use crate::context::SystemContext;
use async_trait::async_trait;
use chrono::Utc;
use conveyor_shared::errors::ConveyorResult;
use conveyor_shared::messaging::{DeadlineMessage, QueueName, Resolution};
use conveyor_shared::models::run::Run;
use conveyor_shared::state_machine::ReasonResolved;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
enum DeadlineOutcome {
    /// An active run was resolved deadline-exceeded.
    ResolvedRun(u32),
    /// The task never ran; a synthetic exception run records the expiry.
    ResolvedSynthetic(u32),
    Stale,
}

pub struct DeadlineConsumer {
    ctx: Arc<SystemContext>,
}

impl DeadlineConsumer {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl QueueConsumer for DeadlineConsumer {
    fn name(&self) -> &'static str {
        "deadline"
    }

    fn queue(&self) -> QueueName {
        QueueName::Deadline
    }

    async fn handle(&self, payload: &Value) -> ConveyorResult<Disposition> {
        let message: DeadlineMessage = match serde_json::from_value(payload.clone()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping malformed deadline message");
                return Ok(Disposition::Delete);
            }
        };

        // The message may predate the task row (creation puts it
        // first); a task that never materialized leaves nothing to do.
        let Some(_task) = self.ctx.load_task(&message.task_id).await? else {
            return Ok(Disposition::Delete);
        };

        let now = Utc::now();
        let mut outcome = DeadlineOutcome::Stale;
        let task = self
            .ctx
            .modify_task(&message.task_id, |t| {
                outcome = DeadlineOutcome::Stale;
                if t.definition.deadline != message.deadline || t.is_resolved() {
                    return;
                }
                match t.runs.last_mut() {
                    Some(run) if !run.state.is_terminal() => {
                        run.resolve(ReasonResolved::DeadlineExceeded, now);
                        outcome = DeadlineOutcome::ResolvedRun(run.run_id);
                    }
                    None => {
                        t.runs
                            .push(Run::exception(0, ReasonResolved::DeadlineExceeded, now));
                        outcome = DeadlineOutcome::ResolvedSynthetic(0);
                    }
                    Some(_) => {}
                }
                t.taken_until = None;
            })
            .await?;
        let Some(task) = task else {
            return Ok(Disposition::Delete);
        };

        let resolved_run = match outcome {
            DeadlineOutcome::ResolvedRun(run_id)
            | DeadlineOutcome::ResolvedSynthetic(run_id) => Some(run_id),
            DeadlineOutcome::Stale => None,
        };
        if let Some(run_id) = resolved_run {
            self.ctx
                .put_resolved_message(&task, Resolution::Exception)
                .await?;
            self.ctx.publish_task_exception(&task, Some(run_id))?;
            info!(task_id = %message.task_id, run_id, "task resolved deadline-exceeded");
        }
        Ok(Disposition::Delete)
    }
}
