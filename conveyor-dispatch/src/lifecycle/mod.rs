//! User-visible task operations.
//!
//! One service struct; the operation families live in sibling modules:
//! creation ([`creation`]), scheduling/rerun/cancel ([`scheduling`]),
//! worker reports ([`reporting`]), artifacts ([`artifacts`]) and the
//! read-only views ([`queries`]).
//!
//! Every operation is idempotent on its key inputs: replays of an
//! identical request return the same status without emitting additional
//! events.

pub mod artifacts;
pub mod creation;
pub mod queries;
pub mod reporting;
pub mod scheduling;

use crate::context::SystemContext;
use crate::dependencies::DependencyTracker;
use conveyor_shared::models::task::TaskDefinition;
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

pub struct TaskLifecycle {
    pub(crate) ctx: Arc<SystemContext>,
    pub(crate) tracker: DependencyTracker,
    /// Read-only definition cache; invalidated whenever this service
    /// writes the task.
    pub(crate) definition_cache: Cache<String, TaskDefinition>,
    /// Approximate pending counts per queue, held for the cache window.
    pub(crate) pending_counts: Mutex<HashMap<String, (Instant, usize)>>,
}

impl TaskLifecycle {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        let capacity = ctx.config.lifecycle.definition_cache_capacity;
        Self {
            tracker: DependencyTracker::new(ctx.clone()),
            ctx,
            definition_cache: Cache::new(capacity),
            pending_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }
}
