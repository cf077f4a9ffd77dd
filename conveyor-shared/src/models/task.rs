//! Task definition, row and status view.

use crate::constants::Priority;
use crate::models::dependency::RequiresMode;
use crate::models::run::Run;
use crate::state_machine::{RunState, TaskState};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The immutable definition a scheduler submits with `createTask`.
///
/// `payload`, `metadata`, `tags` and `extra` are opaque JSON: the core
/// never inspects their structure and round-trips them byte-identically
/// for idempotency comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub provisioner_id: String,
    pub worker_type: String,
    pub scheduler_id: String,
    pub task_group_id: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub requires: RequiresMode,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub retries: u32,
    pub created: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Defaults to `deadline` plus one year during normalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub tags: Value,
    #[serde(default)]
    pub extra: Value,
}

impl TaskDefinition {
    /// Normalize the definition to its canonical stored form: fill the
    /// expires default and truncate timestamps to whole milliseconds.
    /// Priority aliasing (`normal` -> `lowest`) already happened at
    /// deserialization.
    pub fn normalize(&mut self) {
        self.created = truncate_ms(self.created);
        self.deadline = truncate_ms(self.deadline);
        let expires = self
            .expires
            .unwrap_or_else(|| self.deadline + Duration::days(crate::constants::DEFAULT_EXPIRES_DAYS_AFTER_DEADLINE));
        self.expires = Some(truncate_ms(expires));
    }

    /// Expiry after normalization.
    pub fn expires(&self) -> DateTime<Utc> {
        self.expires.unwrap_or(self.deadline)
    }

    /// Two definitions collide idempotently only when their canonical
    /// JSON forms are identical.
    pub fn same_as(&self, other: &TaskDefinition) -> bool {
        serde_json::to_value(self).ok() == serde_json::to_value(other).ok()
    }
}

fn truncate_ms(ts: DateTime<Utc>) -> DateTime<Utc> {
    let millis = ts.timestamp_millis();
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(ts)
}

/// The persisted task row: definition plus mutable execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub definition: TaskDefinition,
    /// Non-increasing; decremented when a retry consumes an attempt.
    pub retries_left: u32,
    /// Claim horizon of the active run, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taken_until: Option<DateTime<Utc>>,
    /// Append-only, at most `MAX_RUNS_ALLOWED` entries, index == runId.
    #[serde(default)]
    pub runs: Vec<Run>,
}

impl Task {
    pub fn new(task_id: String, definition: TaskDefinition) -> Self {
        let retries_left = definition.retries;
        Self {
            task_id,
            definition,
            retries_left,
            taken_until: None,
            runs: Vec::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_last_run(self.runs.last().map(|r| r.state))
    }

    pub fn last_run(&self) -> Option<&Run> {
        self.runs.last()
    }

    pub fn run(&self, run_id: u32) -> Option<&Run> {
        self.runs.get(run_id as usize)
    }

    pub fn run_mut(&mut self, run_id: u32) -> Option<&mut Run> {
        self.runs.get_mut(run_id as usize)
    }

    /// Whether the last run is `run_id` and currently in `state`.
    pub fn last_run_is(&self, run_id: u32, state: RunState) -> bool {
        match self.runs.last() {
            Some(run) => run.run_id == run_id && run.state == state,
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state().is_resolved()
    }

    pub fn past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.definition.deadline
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            task_id: self.task_id.clone(),
            provisioner_id: self.definition.provisioner_id.clone(),
            worker_type: self.definition.worker_type.clone(),
            scheduler_id: self.definition.scheduler_id.clone(),
            task_group_id: self.definition.task_group_id.clone(),
            deadline: self.definition.deadline,
            expires: self.definition.expires(),
            retries_left: self.retries_left,
            state: self.state(),
            runs: self.runs.clone(),
        }
    }
}

/// The status view returned by every user-visible operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub task_id: String,
    pub provisioner_id: String,
    pub worker_type: String,
    pub scheduler_id: String,
    pub task_group_id: String,
    pub deadline: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub retries_left: u32,
    pub state: TaskState,
    pub runs: Vec<Run>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::ReasonCreated;

    fn definition() -> TaskDefinition {
        TaskDefinition {
            provisioner_id: "aws".into(),
            worker_type: "builder".into(),
            scheduler_id: "sched-1".into(),
            task_group_id: "group".into(),
            dependencies: vec![],
            requires: RequiresMode::AllCompleted,
            routes: vec![],
            scopes: vec![],
            priority: Priority::Lowest,
            retries: 5,
            created: Utc::now(),
            deadline: Utc::now() + Duration::hours(1),
            expires: None,
            payload: serde_json::json!({}),
            metadata: serde_json::json!({}),
            tags: serde_json::json!({}),
            extra: serde_json::json!({}),
        }
    }

    #[test]
    fn normalize_fills_expires_default() {
        let mut def = definition();
        def.normalize();
        let expires = def.expires.unwrap();
        assert_eq!(expires, def.deadline + Duration::days(365));
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut def = definition();
        def.normalize();
        let once = def.clone();
        def.normalize();
        assert!(def.same_as(&once));
    }

    #[test]
    fn definition_comparison_sees_payload_changes() {
        let mut a = definition();
        a.normalize();
        let mut b = a.clone();
        assert!(a.same_as(&b));
        b.payload = serde_json::json!({"command": ["true"]});
        assert!(!a.same_as(&b));
    }

    #[test]
    fn derived_state_follows_last_run() {
        let mut task = Task::new("t".into(), definition());
        assert_eq!(task.state(), TaskState::Unscheduled);
        task.runs.push(Run::pending(0, ReasonCreated::Scheduled, Utc::now()));
        assert_eq!(task.state(), TaskState::Pending);
        assert!(task.last_run_is(0, RunState::Pending));
        assert!(!task.last_run_is(1, RunState::Pending));
    }
}
