//! Artifact reference registration.
//!
//! Content storage lives outside the core; these operations maintain
//! the reference rows that gate `reportCompleted` and feed the
//! artifact-created topic.

use super::TaskLifecycle;
use conveyor_shared::errors::{ApiError, ApiResult, ConveyorError};
use conveyor_shared::models::artifact::{ArtifactRef, StorageType};
use conveyor_shared::state_machine::RunState;
use conveyor_shared::store::{self, StoreError, Table};
use conveyor_shared::validation::validate_artifact_name;
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

impl TaskLifecycle {
    /// Register an artifact for a running run. Object artifacts start
    /// absent and must be marked present before the run can complete;
    /// reference and error artifacts are complete immediately.
    #[instrument(skip(self, expires))]
    pub async fn register_artifact(
        &self,
        task_id: &str,
        run_id: u32,
        name: &str,
        storage_type: StorageType,
        expires: Option<DateTime<Utc>>,
    ) -> ApiResult<ArtifactRef> {
        validate_artifact_name(name)?;
        let task = self.ctx.require_task(task_id).await?;
        let Some(run) = task.run(run_id) else {
            return Err(ApiError::not_found(format!(
                "task {task_id} has no run {run_id}"
            )));
        };
        if run.state != RunState::Running {
            return Err(ApiError::conflict(format!(
                "run {run_id} of task {task_id} is not running"
            )));
        }

        let artifact = ArtifactRef::new(
            task_id.to_string(),
            run_id,
            name.to_string(),
            storage_type,
            expires.unwrap_or(task.definition.expires()),
        );
        let key = ArtifactRef::key(task_id, run_id, name);
        match store::create(self.ctx.store(), Table::Artifacts, &key, &artifact).await {
            Ok(()) => {
                self.ctx
                    .publish_artifact_created(&task, &artifact)
                    .map_err(ApiError::from)?;
                info!(task_id, run_id, name, "artifact registered");
                Ok(artifact)
            }
            Err(StoreError::RowConflict { .. }) => {
                let existing: Option<ArtifactRef> =
                    store::load(self.ctx.store(), Table::Artifacts, &key)
                        .await
                        .map_err(ApiError::from)?;
                match existing {
                    Some(existing) if existing.storage_type == storage_type => Ok(existing),
                    Some(_) => Err(ApiError::conflict(format!(
                        "artifact '{name}' already registered with a different storage type"
                    ))),
                    None => Err(ApiError::internal("artifact row vanished")),
                }
            }
            Err(e) => Err(ApiError::from(ConveyorError::from(e))),
        }
    }

    /// Flip an object artifact to present once its upload finished.
    #[instrument(skip(self))]
    pub async fn mark_artifact_present(
        &self,
        task_id: &str,
        run_id: u32,
        name: &str,
    ) -> ApiResult<ArtifactRef> {
        let key = ArtifactRef::key(task_id, run_id, name);
        let updated: Option<ArtifactRef> = store::modify(
            self.ctx.store(),
            Table::Artifacts,
            &key,
            self.ctx.max_modify_attempts(),
            |a: &mut ArtifactRef| a.present = true,
        )
        .await
        .map_err(ApiError::from)?;
        updated.ok_or_else(|| {
            ApiError::not_found(format!("artifact '{name}' of run {run_id} not found"))
        })
    }

    /// Artifact references of one run.
    pub async fn list_artifacts(
        &self,
        task_id: &str,
        run_id: u32,
    ) -> ApiResult<Vec<ArtifactRef>> {
        self.ctx.require_task(task_id).await?;
        let prefix = format!("{task_id}/{run_id}/");
        let mut artifacts = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let (page, next): (Vec<ArtifactRef>, _) = store::scan_prefix(
                self.ctx.store(),
                Table::Artifacts,
                &prefix,
                continuation.as_deref(),
                100,
            )
            .await
            .map_err(ApiError::from)?;
            artifacts.extend(page);
            continuation = next;
            if continuation.is_none() {
                return Ok(artifacts);
            }
        }
    }
}
