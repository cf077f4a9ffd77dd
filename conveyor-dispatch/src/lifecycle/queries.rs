//! Read-only views: getTask, getTaskStatus, listTaskGroup,
//! listDependentTasks, pendingTasks.

use super::TaskLifecycle;
use conveyor_shared::constants::PENDING_COUNT_CACHE_SECONDS;
use conveyor_shared::errors::{ApiError, ApiResult};
use conveyor_shared::messaging::QueueName;
use conveyor_shared::models::dependency::DependencyEdge;
use conveyor_shared::models::task::{Task, TaskDefinition, TaskStatus};
use conveyor_shared::models::task_group::{TaskGroup, TaskGroupMember};
use conveyor_shared::store::{self, Table};
use conveyor_shared::validation::validate_identifier;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::warn;

/// One page of a task-group listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroupPage {
    pub task_group_id: String,
    pub scheduler_id: String,
    pub tasks: Vec<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
}

/// One page of a dependents listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentsPage {
    pub task_id: String,
    pub dependents: Vec<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
}

impl TaskLifecycle {
    pub async fn get_task(&self, task_id: &str) -> ApiResult<Task> {
        self.ctx.require_task(task_id).await
    }

    pub async fn get_task_status(&self, task_id: &str) -> ApiResult<TaskStatus> {
        Ok(self.ctx.require_task(task_id).await?.status())
    }

    /// The immutable definition, served from an in-process cache.
    /// Definitions never change after creation, so the cache only needs
    /// invalidation when this service itself writes the row.
    pub async fn get_task_definition(&self, task_id: &str) -> ApiResult<TaskDefinition> {
        if let Some(definition) = self.definition_cache.get(task_id).await {
            return Ok(definition);
        }
        let task = self.ctx.require_task(task_id).await?;
        self.definition_cache
            .insert(task_id.to_string(), task.definition.clone())
            .await;
        Ok(task.definition)
    }

    /// Member statuses of a task group, paginated.
    ///
    /// A member whose schedulerId disagrees with the group violates the
    /// group invariant; such rows are surfaced in the log as data
    /// corruption and dropped from the listing.
    pub async fn list_task_group(
        &self,
        task_group_id: &str,
        continuation: Option<&str>,
        limit: usize,
    ) -> ApiResult<TaskGroupPage> {
        let group: TaskGroup =
            store::load(self.ctx.store(), Table::TaskGroups, task_group_id)
                .await
                .map_err(ApiError::from)?
                .ok_or_else(|| {
                    ApiError::not_found(format!("task group {task_group_id} not found"))
                })?;

        let prefix = format!("{task_group_id}/");
        let (members, next): (Vec<TaskGroupMember>, _) = store::scan_prefix(
            self.ctx.store(),
            Table::TaskGroupMembers,
            &prefix,
            continuation,
            limit.clamp(1, 1000),
        )
        .await
        .map_err(ApiError::from)?;

        let mut tasks = Vec::with_capacity(members.len());
        for member in &members {
            let Some(task) = self
                .ctx
                .load_task(&member.task_id)
                .await
                .map_err(ApiError::from)?
            else {
                continue;
            };
            if task.definition.scheduler_id != group.scheduler_id {
                warn!(
                    task_id = %task.task_id,
                    task_group_id,
                    task_scheduler = %task.definition.scheduler_id,
                    group_scheduler = %group.scheduler_id,
                    "task group member violates the scheduler invariant"
                );
                continue;
            }
            tasks.push(task.status());
        }

        let continuation = next.map(|_| {
            members
                .last()
                .map(|m| TaskGroupMember::key(task_group_id, &m.task_id))
                .unwrap_or_default()
        });
        Ok(TaskGroupPage {
            task_group_id: task_group_id.to_string(),
            scheduler_id: group.scheduler_id,
            tasks,
            continuation,
        })
    }

    /// Tasks that depend on `task_id`, via the reverse edge set.
    pub async fn list_dependent_tasks(
        &self,
        task_id: &str,
        continuation: Option<&str>,
        limit: usize,
    ) -> ApiResult<DependentsPage> {
        self.ctx.require_task(task_id).await?;
        let prefix = format!("{task_id}/");
        let (edges, next): (Vec<DependencyEdge>, _) = store::scan_prefix(
            self.ctx.store(),
            Table::DependentEdges,
            &prefix,
            continuation,
            limit.clamp(1, 1000),
        )
        .await
        .map_err(ApiError::from)?;

        let mut dependents = Vec::with_capacity(edges.len());
        for edge in &edges {
            if let Some(task) = self
                .ctx
                .load_task(&edge.dependent_task_id)
                .await
                .map_err(ApiError::from)?
            {
                dependents.push(task.status());
            }
        }
        let continuation = next.map(|_| {
            edges
                .last()
                .map(|e| e.reverse_key())
                .unwrap_or_default()
        });
        Ok(DependentsPage {
            task_id: task_id.to_string(),
            dependents,
            continuation,
        })
    }

    /// Approximate count of pending runs for one (provisioner,
    /// workerType), summed across the priority buckets. Served from a
    /// short-lived cache.
    pub async fn pending_tasks(
        &self,
        provisioner_id: &str,
        worker_type: &str,
    ) -> ApiResult<usize> {
        validate_identifier(provisioner_id, "provisionerId")?;
        validate_identifier(worker_type, "workerType")?;

        let cache_key = format!("{provisioner_id}/{worker_type}");
        let ttl = Duration::from_secs(PENDING_COUNT_CACHE_SECONDS);
        {
            let counts = self.pending_counts.lock().await;
            if let Some((at, count)) = counts.get(&cache_key) {
                if at.elapsed() < ttl {
                    return Ok(*count);
                }
            }
        }

        let mut total = 0usize;
        for queue in QueueName::pending_buckets(provisioner_id, worker_type) {
            total += self
                .ctx
                .queues()
                .count(&queue)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;
        }

        self.pending_counts
            .lock()
            .await
            .insert(cache_key, (Instant::now(), total));
        Ok(total)
    }
}
