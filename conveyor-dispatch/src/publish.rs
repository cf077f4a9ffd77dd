//! Typed event publication.
//!
//! Every bus event the engine emits is built here, so routing keys and
//! payload shapes cannot drift between call sites. Callers publish only
//! after the corresponding store write has committed.

use crate::context::SystemContext;
use conveyor_shared::errors::{ApiError, ApiResult, ConveyorResult};
use conveyor_shared::events::{
    ArtifactCreatedEvent, RoutingKey, TaskDefinedEvent, TaskExceptionEvent, TaskGroupResolvedEvent,
    TaskPendingEvent, TaskRunResolvedEvent, TaskRunningEvent, Topic,
};
use conveyor_shared::models::artifact::ArtifactRef;
use conveyor_shared::models::task::Task;
use conveyor_shared::models::task_group::TaskGroup;
use conveyor_shared::store::{self, Table};

impl SystemContext {
    pub async fn load_task(&self, task_id: &str) -> ConveyorResult<Option<Task>> {
        store::load(self.store(), Table::Tasks, task_id).await
    }

    pub async fn require_task(&self, task_id: &str) -> ApiResult<Task> {
        self.load_task(task_id)
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::not_found(format!("task {task_id} not found")))
    }

    /// Mutator-retry update of one task row. The mutator must be free
    /// of side effects; it may run several times under contention.
    pub async fn modify_task<F>(&self, task_id: &str, mutate: F) -> ConveyorResult<Option<Task>>
    where
        F: FnMut(&mut Task),
    {
        store::modify(
            self.store(),
            Table::Tasks,
            task_id,
            self.max_modify_attempts(),
            mutate,
        )
        .await
    }

    pub fn publish_task_defined(&self, task: &Task) -> ConveyorResult<()> {
        self.events.publish(
            Topic::TaskDefined,
            &RoutingKey::for_task(task),
            &task.definition.routes,
            &TaskDefinedEvent {
                status: task.status(),
            },
        )
    }

    pub fn publish_task_pending(&self, task: &Task, run_id: u32) -> ConveyorResult<()> {
        self.events.publish(
            Topic::TaskPending,
            &RoutingKey::for_task(task).with_run(run_id),
            &task.definition.routes,
            &TaskPendingEvent {
                status: task.status(),
                run_id,
            },
        )
    }

    pub fn publish_task_running(&self, task: &Task, run_id: u32) -> ConveyorResult<()> {
        let run = task.run(run_id);
        let worker_group = run.and_then(|r| r.worker_group.clone()).unwrap_or_default();
        let worker_id = run.and_then(|r| r.worker_id.clone()).unwrap_or_default();
        let taken_until = run
            .and_then(|r| r.taken_until)
            .unwrap_or_else(chrono::Utc::now);
        self.events.publish(
            Topic::TaskRunning,
            &RoutingKey::for_task(task)
                .with_run(run_id)
                .with_worker(&worker_group, &worker_id),
            &task.definition.routes,
            &TaskRunningEvent {
                status: task.status(),
                run_id,
                worker_group,
                worker_id,
                taken_until,
            },
        )
    }

    pub fn publish_task_completed(&self, task: &Task, run_id: u32) -> ConveyorResult<()> {
        self.publish_run_resolved(Topic::TaskCompleted, task, run_id)
    }

    pub fn publish_task_failed(&self, task: &Task, run_id: u32) -> ConveyorResult<()> {
        self.publish_run_resolved(Topic::TaskFailed, task, run_id)
    }

    fn publish_run_resolved(&self, topic: Topic, task: &Task, run_id: u32) -> ConveyorResult<()> {
        let run = task.run(run_id);
        let worker_group = run.and_then(|r| r.worker_group.clone());
        let worker_id = run.and_then(|r| r.worker_id.clone());
        let mut key = RoutingKey::for_task(task).with_run(run_id);
        if let (Some(wg), Some(wid)) = (&worker_group, &worker_id) {
            key = key.with_worker(wg, wid);
        }
        self.events.publish(
            topic,
            &key,
            &task.definition.routes,
            &TaskRunResolvedEvent {
                status: task.status(),
                run_id,
                worker_group,
                worker_id,
            },
        )
    }

    /// `run_id` is absent when a task resolved without ever gaining a
    /// real run (deadline expiry of an unscheduled task).
    pub fn publish_task_exception(&self, task: &Task, run_id: Option<u32>) -> ConveyorResult<()> {
        let run = run_id.and_then(|r| task.run(r));
        let worker_group = run.and_then(|r| r.worker_group.clone());
        let worker_id = run.and_then(|r| r.worker_id.clone());
        let mut key = RoutingKey::for_task(task);
        if let Some(run_id) = run_id {
            key = key.with_run(run_id);
        }
        if let (Some(wg), Some(wid)) = (&worker_group, &worker_id) {
            key = key.with_worker(wg, wid);
        }
        self.events.publish(
            Topic::TaskException,
            &key,
            &task.definition.routes,
            &TaskExceptionEvent {
                status: task.status(),
                run_id,
                worker_group,
                worker_id,
            },
        )
    }

    /// Group events carry no task coordinates; the unused key segments
    /// stay as placeholders.
    pub fn publish_task_group_resolved(&self, group: &TaskGroup) -> ConveyorResult<()> {
        let key = RoutingKey {
            task_id: "_".to_string(),
            run_id: None,
            worker_group: None,
            worker_id: None,
            provisioner_id: "_".to_string(),
            worker_type: "_".to_string(),
            scheduler_id: group.scheduler_id.clone(),
            task_group_id: group.task_group_id.clone(),
        };
        self.events.publish(
            Topic::TaskGroupResolved,
            &key,
            &[],
            &TaskGroupResolvedEvent {
                task_group_id: group.task_group_id.clone(),
                scheduler_id: group.scheduler_id.clone(),
                expires: group.expires,
            },
        )
    }

    pub fn publish_artifact_created(&self, task: &Task, artifact: &ArtifactRef) -> ConveyorResult<()> {
        self.events.publish(
            Topic::ArtifactCreated,
            &RoutingKey::for_task(task).with_run(artifact.run_id),
            &task.definition.routes,
            &ArtifactCreatedEvent {
                status: task.status(),
                run_id: artifact.run_id,
                artifact: artifact.clone(),
            },
        )
    }
}
