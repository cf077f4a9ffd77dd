//! Temporary run credentials, minted by an external collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_shared::errors::ConveyorResult;
use conveyor_shared::models::task::Task;
use serde::{Deserialize, Serialize};

/// Credentials a worker uses while it holds a claim. Refreshed on
/// reclaim; scoped to the run by the minter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCredentials {
    pub client_id: String,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    pub expires: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialsMinter: Send + Sync {
    async fn mint(
        &self,
        task: &Task,
        run_id: u32,
        worker_group: &str,
        worker_id: &str,
    ) -> ConveyorResult<RunCredentials>;
}

/// Deterministic minter for tests and embedded deployments.
#[derive(Debug, Default)]
pub struct StaticCredentialsMinter;

#[async_trait]
impl CredentialsMinter for StaticCredentialsMinter {
    async fn mint(
        &self,
        task: &Task,
        run_id: u32,
        _worker_group: &str,
        worker_id: &str,
    ) -> ConveyorResult<RunCredentials> {
        let expires = task
            .run(run_id)
            .and_then(|r| r.taken_until)
            .unwrap_or_else(Utc::now);
        Ok(RunCredentials {
            client_id: format!("task-client/{}/{run_id}/on/{worker_id}", task.task_id),
            access_token: "static-access-token".to_string(),
            certificate: None,
            expires,
        })
    }
}
