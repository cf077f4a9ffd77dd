//! Seen-liveness tracking for provisioners, worker types and workers.
//!
//! Rows are upserted whenever a worker polls for work, so the registry
//! reflects who has been alive recently without any explicit
//! registration step. Quarantine gates dispatch: a quarantined worker
//! keeps polling (and stays visible here) but receives nothing.

use crate::context::SystemContext;
use chrono::{DateTime, Utc};
use conveyor_shared::errors::{ApiError, ApiResult, ConveyorResult};
use conveyor_shared::models::worker::{ProvisionerInfo, TaskRunRef, WorkerInfo, WorkerTypeInfo};
use conveyor_shared::store::{self, Table};
use conveyor_shared::validation::validate_identifier;
use std::sync::Arc;
use tracing::{debug, info};

pub struct WorkerRegistry {
    ctx: Arc<SystemContext>,
}

impl WorkerRegistry {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self { ctx }
    }

    /// Record liveness for the full (provisioner, workerType, worker)
    /// chain and return the worker row.
    pub async fn worker_seen(
        &self,
        provisioner_id: &str,
        worker_type: &str,
        worker_group: &str,
        worker_id: &str,
    ) -> ConveyorResult<WorkerInfo> {
        let now = Utc::now();
        let attempts = self.ctx.max_modify_attempts();

        store::modify_or_create(
            self.ctx.store(),
            Table::Provisioners,
            provisioner_id,
            attempts,
            || ProvisionerInfo {
                provisioner_id: provisioner_id.to_string(),
                first_seen: now,
                last_seen: now,
            },
            |p| p.last_seen = now,
        )
        .await?;

        store::modify_or_create(
            self.ctx.store(),
            Table::WorkerTypes,
            &WorkerTypeInfo::key(provisioner_id, worker_type),
            attempts,
            || WorkerTypeInfo {
                provisioner_id: provisioner_id.to_string(),
                worker_type: worker_type.to_string(),
                first_seen: now,
                last_seen: now,
            },
            |wt| wt.last_seen = now,
        )
        .await?;

        store::modify_or_create(
            self.ctx.store(),
            Table::Workers,
            &WorkerInfo::key(provisioner_id, worker_type, worker_group, worker_id),
            attempts,
            || WorkerInfo {
                provisioner_id: provisioner_id.to_string(),
                worker_type: worker_type.to_string(),
                worker_group: worker_group.to_string(),
                worker_id: worker_id.to_string(),
                first_seen: now,
                last_seen: now,
                quarantine_until: None,
                recent_tasks: vec![],
            },
            |w| w.last_seen = now,
        )
        .await
    }

    /// Append a claim to the worker's recent-task ring.
    pub async fn record_claim(
        &self,
        provisioner_id: &str,
        worker_type: &str,
        worker_group: &str,
        worker_id: &str,
        task_id: &str,
        run_id: u32,
    ) -> ConveyorResult<()> {
        let key = WorkerInfo::key(provisioner_id, worker_type, worker_group, worker_id);
        let updated: Option<WorkerInfo> = store::modify(
            self.ctx.store(),
            Table::Workers,
            &key,
            self.ctx.max_modify_attempts(),
            |w: &mut WorkerInfo| w.record_claim(task_id, run_id),
        )
        .await?;
        if updated.is_none() {
            debug!(worker = %key, "claim recorded for unknown worker");
        }
        Ok(())
    }

    /// Quarantine (or, with a past timestamp, unquarantine) a worker.
    pub async fn quarantine_worker(
        &self,
        provisioner_id: &str,
        worker_type: &str,
        worker_group: &str,
        worker_id: &str,
        quarantine_until: DateTime<Utc>,
    ) -> ApiResult<WorkerInfo> {
        for (field, value) in [
            ("provisionerId", provisioner_id),
            ("workerType", worker_type),
            ("workerGroup", worker_group),
            ("workerId", worker_id),
        ] {
            validate_identifier(value, field)?;
        }
        let key = WorkerInfo::key(provisioner_id, worker_type, worker_group, worker_id);
        let updated: Option<WorkerInfo> = store::modify(
            self.ctx.store(),
            Table::Workers,
            &key,
            self.ctx.max_modify_attempts(),
            |w: &mut WorkerInfo| w.quarantine_until = Some(quarantine_until),
        )
        .await
        .map_err(ApiError::from)?;
        match updated {
            Some(worker) => {
                info!(worker = %key, until = %quarantine_until, "worker quarantined");
                Ok(worker)
            }
            None => Err(ApiError::not_found(format!("worker {key} not found"))),
        }
    }

    pub async fn get_worker(
        &self,
        provisioner_id: &str,
        worker_type: &str,
        worker_group: &str,
        worker_id: &str,
    ) -> ApiResult<WorkerInfo> {
        let key = WorkerInfo::key(provisioner_id, worker_type, worker_group, worker_id);
        let worker: Option<WorkerInfo> = store::load(self.ctx.store(), Table::Workers, &key)
            .await
            .map_err(ApiError::from)?;
        worker.ok_or_else(|| ApiError::not_found(format!("worker {key} not found")))
    }

    /// Recent claims of one worker, newest last.
    pub async fn recent_tasks(
        &self,
        provisioner_id: &str,
        worker_type: &str,
        worker_group: &str,
        worker_id: &str,
    ) -> ApiResult<Vec<TaskRunRef>> {
        Ok(self
            .get_worker(provisioner_id, worker_type, worker_group, worker_id)
            .await?
            .recent_tasks)
    }
}
