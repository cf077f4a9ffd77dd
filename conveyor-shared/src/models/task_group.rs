//! Task groups and their membership rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task group: every member task shares this `schedulerId`.
///
/// The scheduler invariant is enforced at task creation; a member
/// submitted with a different scheduler is a `RequestConflict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroup {
    pub task_group_id: String,
    pub scheduler_id: String,
    pub expires: DateTime<Utc>,
}

/// Group membership row, keyed `<taskGroupId>/<taskId>`.
///
/// Two parallel row sets share this shape: the permanent member set
/// (kept until group expiry) and the active set, from which a task is
/// removed when it resolves. The group is resolved when the active set
/// drains to empty while at least one member exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroupMember {
    pub task_group_id: String,
    pub task_id: String,
    pub expires: DateTime<Utc>,
}

impl TaskGroupMember {
    pub fn key(task_group_id: &str, task_id: &str) -> String {
        format!("{task_group_id}/{task_id}")
    }
}
