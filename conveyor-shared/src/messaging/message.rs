//! Message payloads carried on the advisory queues.
//!
//! Every payload references store rows by id; consumers reload the row
//! and verify the referenced state still matches before acting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A run waiting to be claimed, on the (provisioner, workerType,
/// priority) pending queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub task_id: String,
    pub run_id: u32,
    /// Opaque marker correlating a message with the scheduling decision
    /// that produced it; duplicate deliveries share it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint_id: Option<String>,
}

/// A claim horizon, visible on the claim-expiration queue at
/// `takenUntil`. Stale when the run's takenUntil has moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimMessage {
    pub task_id: String,
    pub run_id: u32,
    pub taken_until: DateTime<Utc>,
}

/// A task deadline, visible on the deadline queue at `deadline`. Stale
/// when it no longer matches the task's deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadlineMessage {
    pub task_id: String,
    pub deadline: DateTime<Utc>,
}

/// Terminal resolution kinds carried on the resolved queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    Completed,
    Failed,
    Exception,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Exception => write!(f, "exception"),
        }
    }
}

/// A task resolution awaiting dependency fan-out and group accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMessage {
    pub task_id: String,
    pub task_group_id: String,
    pub scheduler_id: String,
    pub resolution: Resolution,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_message_wire_shape() {
        let msg = PendingMessage {
            task_id: "t".into(),
            run_id: 3,
            hint_id: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["taskId"], "t");
        assert_eq!(json["runId"], 3);
        assert!(json.get("hintId").is_none());
    }

    #[test]
    fn resolution_is_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Resolution::Exception).unwrap(),
            "\"exception\""
        );
    }
}
