//! Worker registry rows: provisioners, worker types and workers.

use crate::constants::WORKER_RECENT_TASKS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A (taskId, runId) pair, as recorded in a worker's recent-claim ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunRef {
    pub task_id: String,
    pub run_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerInfo {
    pub provisioner_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerTypeInfo {
    pub provisioner_id: String,
    pub worker_type: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl WorkerTypeInfo {
    pub fn key(provisioner_id: &str, worker_type: &str) -> String {
        format!("{provisioner_id}/{worker_type}")
    }
}

/// One worker, keyed
/// `<provisionerId>/<workerType>/<workerGroup>/<workerId>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    pub provisioner_id: String,
    pub worker_type: String,
    pub worker_group: String,
    pub worker_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// A quarantined worker is recorded as seen but receives no work
    /// until this passes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_until: Option<DateTime<Utc>>,
    /// Most recent claims, newest last, capped at `WORKER_RECENT_TASKS`.
    #[serde(default)]
    pub recent_tasks: Vec<TaskRunRef>,
}

impl WorkerInfo {
    pub fn key(
        provisioner_id: &str,
        worker_type: &str,
        worker_group: &str,
        worker_id: &str,
    ) -> String {
        format!("{provisioner_id}/{worker_type}/{worker_group}/{worker_id}")
    }

    pub fn is_quarantined(&self, now: DateTime<Utc>) -> bool {
        self.quarantine_until.is_some_and(|until| until > now)
    }

    pub fn record_claim(&mut self, task_id: &str, run_id: u32) {
        self.recent_tasks.push(TaskRunRef {
            task_id: task_id.to_string(),
            run_id,
        });
        if self.recent_tasks.len() > WORKER_RECENT_TASKS {
            let excess = self.recent_tasks.len() - WORKER_RECENT_TASKS;
            self.recent_tasks.drain(..excess);
        }
    }
}
