//! Background resolver loops.
//!
//! Each loop drains one advisory queue with a small batch size and a
//! visibility window of a few minutes. Handlers are idempotent: a
//! message is deleted only after its handler succeeds, so transient
//! failures are retried for free when the visibility window lapses.
//! Errors never propagate to users.

pub mod claim_expiry;
pub mod deadline;
pub mod resolved;

use crate::context::SystemContext;
use async_trait::async_trait;
use conveyor_shared::errors::ConveyorResult;
use conveyor_shared::messaging::QueueName;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub use claim_expiry::ClaimExpiryConsumer;
pub use deadline::DeadlineConsumer;
pub use resolved::ResolvedConsumer;

/// What to do with a message after its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled (or permanently unusable); remove it.
    Delete,
    /// Leave it; the visibility window will redeliver.
    Retain,
}

#[async_trait]
pub trait QueueConsumer: Send + Sync {
    fn name(&self) -> &'static str;
    fn queue(&self) -> QueueName;
    async fn handle(&self, payload: &Value) -> ConveyorResult<Disposition>;
}

struct LoopState {
    running: AtomicBool,
    shutdown: Notify,
}

/// Drives one consumer against its queue until shut down.
pub struct ResolverLoop {
    ctx: Arc<SystemContext>,
    consumer: Arc<dyn QueueConsumer>,
    state: Arc<LoopState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ResolverLoop {
    pub fn new(ctx: Arc<SystemContext>, consumer: Arc<dyn QueueConsumer>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            consumer,
            state: Arc::new(LoopState {
                running: AtomicBool::new(false),
                shutdown: Notify::new(),
            }),
            handle: Mutex::new(None),
        })
    }

    /// Receive one batch and run every message through the handler.
    /// Returns how many messages were processed. Exposed so tests can
    /// step the resolver deterministically.
    pub async fn tick(&self) -> ConveyorResult<usize> {
        let queue = self.consumer.queue();
        let config = &self.ctx.config.resolvers;
        let messages = self
            .ctx
            .queues()
            .receive(&queue, config.batch_size, config.visibility())
            .await?;
        let mut processed = 0usize;
        for message in messages {
            match self.consumer.handle(&message.payload).await {
                Ok(Disposition::Delete) => {
                    self.ctx.queues().delete(&queue, &message.receipt).await?;
                    processed += 1;
                }
                Ok(Disposition::Retain) => {}
                Err(e) => {
                    // Left in place; the queue redelivers after the
                    // visibility window.
                    warn!(
                        resolver = self.consumer.name(),
                        error = %e,
                        "handler failed, message retained for retry"
                    );
                }
            }
        }
        Ok(processed)
    }

    /// Spawn the processing loop.
    pub async fn start(self: &Arc<Self>) {
        if self.state.running.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(resolver = self.consumer.name(), "resolver loop starting");
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let poll_interval = this.ctx.config.resolvers.poll_interval();
            while this.state.running.load(Ordering::Acquire) {
                let processed = match this.tick().await {
                    Ok(n) => n,
                    Err(e) => {
                        error!(
                            resolver = this.consumer.name(),
                            error = %e,
                            "resolver tick failed"
                        );
                        0
                    }
                };
                if processed == 0 {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = this.state.shutdown.notified() => {}
                    }
                }
            }
            info!(resolver = this.consumer.name(), "resolver loop stopped");
        });
        *self.handle.lock().await = Some(handle);
    }

    /// Signal shutdown and wait for in-flight handlers to drain.
    pub async fn stop(&self) {
        self.state.running.store(false, Ordering::Release);
        self.state.shutdown.notify_waiters();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}
