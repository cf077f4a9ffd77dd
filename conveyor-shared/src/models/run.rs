//! A single execution attempt of a task.

use crate::state_machine::{ReasonCreated, ReasonResolved, RunState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One attempt at executing a task.
///
/// Runs live at contiguous 0-based indexes on their task and are never
/// reordered. Once a run enters a terminal state it is never mutated
/// again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: u32,
    pub state: RunState,
    pub reason_created: ReasonCreated,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_resolved: Option<ReasonResolved>,
    pub scheduled: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taken_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl Run {
    /// A fresh pending run at the given index.
    pub fn pending(run_id: u32, reason_created: ReasonCreated, scheduled: DateTime<Utc>) -> Self {
        Self {
            run_id,
            state: RunState::Pending,
            reason_created,
            reason_resolved: None,
            scheduled,
            started: None,
            resolved: None,
            taken_until: None,
            worker_group: None,
            worker_id: None,
        }
    }

    /// A synthetic run that records a resolution for a task that never
    /// executed (deadline expiry, cancellation of an unscheduled task).
    pub fn exception(run_id: u32, reason_resolved: ReasonResolved, now: DateTime<Utc>) -> Self {
        Self {
            run_id,
            state: RunState::Exception,
            reason_created: ReasonCreated::Exception,
            reason_resolved: Some(reason_resolved),
            scheduled: now,
            started: None,
            resolved: Some(now),
            taken_until: None,
            worker_group: None,
            worker_id: None,
        }
    }

    /// Transition this pending run to running under a worker claim.
    pub fn start(
        &mut self,
        worker_group: &str,
        worker_id: &str,
        taken_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.state = RunState::Running;
        self.started = Some(now);
        self.worker_group = Some(worker_group.to_string());
        self.worker_id = Some(worker_id.to_string());
        self.taken_until = Some(taken_until);
    }

    /// Resolve this run. The state is derived from the reason.
    pub fn resolve(&mut self, reason: ReasonResolved, now: DateTime<Utc>) {
        self.state = reason.run_state();
        self.reason_resolved = Some(reason);
        self.resolved = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_fields_are_camel_case() {
        let run = Run::pending(0, ReasonCreated::Scheduled, Utc::now());
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["runId"], 0);
        assert_eq!(json["reasonCreated"], "scheduled");
        assert!(json.get("reasonResolved").is_none());
    }

    #[test]
    fn resolve_derives_state_from_reason() {
        let now = Utc::now();
        let mut run = Run::pending(0, ReasonCreated::Scheduled, now);
        run.start("wg", "w1", now + chrono::Duration::minutes(20), now);
        run.resolve(ReasonResolved::ClaimExpired, now);
        assert_eq!(run.state, RunState::Exception);
        assert_eq!(run.reason_resolved, Some(ReasonResolved::ClaimExpired));
        assert!(run.resolved.is_some());
    }
}
