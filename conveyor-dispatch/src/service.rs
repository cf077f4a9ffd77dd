//! Engine assembly.
//!
//! Wires the lifecycle service, the work claimer and the three resolver
//! loops over one [`SystemContext`]. Front-ends hold a `QueueService`
//! and call straight through; embedded and test setups use it the same
//! way with in-memory collaborators.

use crate::claims::WorkClaimer;
use crate::context::SystemContext;
use crate::lifecycle::TaskLifecycle;
use crate::resolvers::{ClaimExpiryConsumer, DeadlineConsumer, ResolvedConsumer, ResolverLoop};
use std::sync::Arc;
use tracing::info;

pub struct QueueService {
    pub ctx: Arc<SystemContext>,
    pub lifecycle: TaskLifecycle,
    pub claimer: WorkClaimer,
    pub claim_expiry_resolver: Arc<ResolverLoop>,
    pub deadline_resolver: Arc<ResolverLoop>,
    pub resolved_resolver: Arc<ResolverLoop>,
}

impl QueueService {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self {
            lifecycle: TaskLifecycle::new(ctx.clone()),
            claimer: WorkClaimer::new(ctx.clone()),
            claim_expiry_resolver: ResolverLoop::new(
                ctx.clone(),
                Arc::new(ClaimExpiryConsumer::new(ctx.clone())),
            ),
            deadline_resolver: ResolverLoop::new(
                ctx.clone(),
                Arc::new(DeadlineConsumer::new(ctx.clone())),
            ),
            resolved_resolver: ResolverLoop::new(
                ctx.clone(),
                Arc::new(ResolvedConsumer::new(ctx.clone())),
            ),
            ctx,
        }
    }

    /// Start the three background loops.
    pub async fn start_resolvers(&self) {
        self.claim_expiry_resolver.start().await;
        self.deadline_resolver.start().await;
        self.resolved_resolver.start().await;
        info!(system_id = %self.ctx.system_id, "resolver loops running");
    }

    /// Drain in-flight handlers and stop the loops.
    pub async fn shutdown(&self) {
        self.claim_expiry_resolver.stop().await;
        self.deadline_resolver.stop().await;
        self.resolved_resolver.stop().await;
        info!(system_id = %self.ctx.system_id, "resolver loops stopped");
    }
}
