//! Dependency edges and unresolved-dependency tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a dependent decides its dependencies are satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequiresMode {
    /// Every dependency must resolve `completed`. A failure or exception
    /// on any dependency dooms the dependent.
    AllCompleted,
    /// Any terminal state on a dependency counts.
    AllResolved,
}

impl Default for RequiresMode {
    fn default() -> Self {
        Self::AllCompleted
    }
}

/// A directed dependency edge.
///
/// Stored twice: forward keyed by `<dependent>/<required>` and reverse
/// keyed by `<required>/<dependent>`, so resolution can fan out to
/// dependents without a table scan. Each edge owns both endpoint ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    pub dependent_task_id: String,
    pub required_task_id: String,
    pub requires: RequiresMode,
    pub expires: DateTime<Utc>,
}

impl DependencyEdge {
    pub fn forward_key(&self) -> String {
        format!("{}/{}", self.dependent_task_id, self.required_task_id)
    }

    pub fn reverse_key(&self) -> String {
        format!("{}/{}", self.required_task_id, self.dependent_task_id)
    }
}

/// Unsatisfied dependencies of one dependent task.
///
/// Removal of a satisfied dependency is idempotent, so duplicate
/// resolved-queue deliveries and the creation-time satisfaction sweep
/// can both remove the same id without double counting. An empty set
/// (and not doomed) means the dependent is ready to schedule. `doomed`
/// is set when an all-completed dependent saw a dependency fail; the
/// dependent resolves through the cancel path and is never scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyCounter {
    pub task_id: String,
    pub remaining: Vec<String>,
    pub requires: RequiresMode,
    #[serde(default)]
    pub doomed: bool,
}

impl DependencyCounter {
    /// Remove a satisfied dependency; `true` if it was present.
    pub fn satisfy(&mut self, required_task_id: &str) -> bool {
        let before = self.remaining.len();
        self.remaining.retain(|id| id != required_task_id);
        self.remaining.len() != before
    }

    pub fn is_ready(&self) -> bool {
        self.remaining.is_empty() && !self.doomed
    }
}
