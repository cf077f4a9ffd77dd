//! Bus topics and event payloads.

use crate::constants::topics;
use crate::models::artifact::ArtifactRef;
use crate::models::task::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    TaskDefined,
    TaskPending,
    TaskRunning,
    TaskCompleted,
    TaskFailed,
    TaskException,
    TaskGroupResolved,
    ArtifactCreated,
}

impl Topic {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TaskDefined => topics::TASK_DEFINED,
            Self::TaskPending => topics::TASK_PENDING,
            Self::TaskRunning => topics::TASK_RUNNING,
            Self::TaskCompleted => topics::TASK_COMPLETED,
            Self::TaskFailed => topics::TASK_FAILED,
            Self::TaskException => topics::TASK_EXCEPTION,
            Self::TaskGroupResolved => topics::TASK_GROUP_RESOLVED,
            Self::ArtifactCreated => topics::ARTIFACT_CREATED,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published event: topic, rendered routing keys, JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub topic: Topic,
    pub routing_key: String,
    pub cc_routes: Vec<String>,
    pub payload: serde_json::Value,
    pub published: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinedEvent {
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPendingEvent {
    pub status: TaskStatus,
    pub run_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunningEvent {
    pub status: TaskStatus,
    pub run_id: u32,
    pub worker_group: String,
    pub worker_id: String,
    pub taken_until: DateTime<Utc>,
}

/// Payload for task-completed and task-failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunResolvedEvent {
    pub status: TaskStatus,
    pub run_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

/// task-exception may reference a run or, for deadline expiry of a task
/// that never ran, no run at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExceptionEvent {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroupResolvedEvent {
    pub task_group_id: String,
    pub scheduler_id: String,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactCreatedEvent {
    pub status: TaskStatus,
    pub run_id: u32,
    pub artifact: ArtifactRef,
}
