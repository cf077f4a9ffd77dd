//! Resolved resolver.
//!
//! Consumes task resolutions: fans each one out to dependents and
//! retires the task from its group's active set, publishing
//! task-group-resolved on the transition to empty.

use super::{Disposition, QueueConsumer};
use crate::context::SystemContext;
use crate::dependencies::DependencyTracker;
use async_trait::async_trait;
use conveyor_shared::errors::ConveyorResult;
use conveyor_shared::messaging::{QueueName, ResolvedMessage};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ResolvedConsumer {
    tracker: DependencyTracker,
}

impl ResolvedConsumer {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self {
            tracker: DependencyTracker::new(ctx),
        }
    }
}

#[async_trait]
impl QueueConsumer for ResolvedConsumer {
    fn name(&self) -> &'static str {
        "resolved"
    }

    fn queue(&self) -> QueueName {
        QueueName::Resolved
    }

    async fn handle(&self, payload: &Value) -> ConveyorResult<Disposition> {
        let message: ResolvedMessage = match serde_json::from_value(payload.clone()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping malformed resolved message");
                return Ok(Disposition::Delete);
            }
        };
        debug!(
            task_id = %message.task_id,
            resolution = %message.resolution,
            "processing task resolution"
        );

        self.tracker
            .resolve_dependencies_of(&message.task_id, message.resolution)
            .await?;
        self.tracker
            .resolve_group_membership(&message.task_id, &message.task_group_id)
            .await?;
        Ok(Disposition::Delete)
    }
}
