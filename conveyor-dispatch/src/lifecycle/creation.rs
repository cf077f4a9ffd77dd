//! Task creation: createTask and defineTask.

use super::TaskLifecycle;
use crate::auth::create_task_scopes;
use chrono::Utc;
use conveyor_shared::errors::{ApiError, ApiResult, ConveyorError};
use conveyor_shared::models::run::Run;
use conveyor_shared::models::task::{Task, TaskDefinition, TaskStatus};
use conveyor_shared::models::task_group::{TaskGroup, TaskGroupMember};
use conveyor_shared::state_machine::ReasonCreated;
use conveyor_shared::store::{self, StoreError, Table};
use conveyor_shared::validation::{
    validate_identifier, validate_opaque_json, validate_routes, validate_scopes, validate_slug_id,
    validate_timing, MAX_DEPENDENCIES,
};
use serde_json::json;
use tracing::{info, instrument, warn};

impl TaskLifecycle {
    /// Create a task and, unless it has dependencies, schedule run 0.
    #[instrument(skip(self, definition))]
    pub async fn create_task(
        &self,
        task_id: &str,
        definition: TaskDefinition,
    ) -> ApiResult<TaskStatus> {
        self.create_internal(task_id, definition, false).await
    }

    /// Like createTask, but the task gains a dependency on itself so it
    /// stays unscheduled until an explicit scheduleTask. No task-pending
    /// event is emitted.
    #[instrument(skip(self, definition))]
    pub async fn define_task(
        &self,
        task_id: &str,
        definition: TaskDefinition,
    ) -> ApiResult<TaskStatus> {
        self.create_internal(task_id, definition, true).await
    }

    async fn create_internal(
        &self,
        task_id: &str,
        mut def: TaskDefinition,
        self_dependent: bool,
    ) -> ApiResult<TaskStatus> {
        let now = Utc::now();

        validate_slug_id(task_id, "taskId")?;
        validate_slug_id(&def.task_group_id, "taskGroupId")?;
        validate_identifier(&def.provisioner_id, "provisionerId")?;
        validate_identifier(&def.worker_type, "workerType")?;
        validate_identifier(&def.scheduler_id, "schedulerId")?;
        validate_scopes(&def.scopes)?;
        validate_routes(&def.routes)?;
        if def.dependencies.len() > MAX_DEPENDENCIES {
            return Err(ApiError::input(format!(
                "too many dependencies: {} (max: {MAX_DEPENDENCIES})",
                def.dependencies.len()
            )));
        }
        for dep in &def.dependencies {
            validate_slug_id(dep, "dependencies")?;
        }
        validate_timing(def.created, def.deadline, def.expires, now)?;
        validate_opaque_json(&def.payload, "payload")?;
        validate_opaque_json(&def.metadata, "metadata")?;
        validate_opaque_json(&def.tags, "tags")?;
        validate_opaque_json(&def.extra, "extra")?;

        def.normalize();
        if self_dependent && !def.dependencies.iter().any(|d| d == task_id) {
            def.dependencies.push(task_id.to_string());
        }

        self.ctx
            .auth
            .require_any(&create_task_scopes(
                def.priority,
                &def.provisioner_id,
                &def.worker_type,
            ))
            .await?;

        // Pure replay: identical definition already stored. Returning
        // here keeps membership rows and queues untouched, so a task
        // that already resolved is not resurrected into its group's
        // active set.
        if let Some(existing) = self.ctx.load_task(task_id).await.map_err(ApiError::from)? {
            return self.reconcile_existing(task_id, &def, existing);
        }

        let group_expires = def.expires()
            + self
                .ctx
                .config
                .lifecycle
                .task_group_expires_extension();
        self.ensure_task_group(&def.task_group_id, &def.scheduler_id, group_expires)
            .await?;

        let member = TaskGroupMember {
            task_group_id: def.task_group_id.clone(),
            task_id: task_id.to_string(),
            expires: def.expires(),
        };
        let member_key = TaskGroupMember::key(&def.task_group_id, task_id);
        self.insert_membership(Table::TaskGroupMembers, &member_key, &member)
            .await?;
        self.insert_membership(Table::TaskGroupActive, &member_key, &member)
            .await?;

        // Deadline message goes in before the task row exists, so the
        // deadline resolver can always finish the job even if we crash
        // between here and the row insert.
        self.ctx
            .put_deadline_message(task_id, def.deadline)
            .await
            .map_err(ApiError::from)?;

        let has_dependencies = !def.dependencies.is_empty();
        let mut task = Task::new(task_id.to_string(), def);
        if !has_dependencies {
            task.runs.push(Run::pending(0, ReasonCreated::Scheduled, now));
        }

        match store::create(self.ctx.store(), Table::Tasks, task_id, &task).await {
            Ok(()) => {}
            Err(StoreError::RowConflict { .. }) => {
                // Lost a creation race; fall back to the idempotency
                // comparison against whatever won.
                let existing = self.ctx.require_task(task_id).await?;
                return self.reconcile_existing(task_id, &task.definition, existing);
            }
            Err(e) => return Err(ApiError::from(ConveyorError::from(e))),
        }
        self.definition_cache.invalidate(task_id).await;

        // task-defined goes out before the tracker runs: the tracker
        // may schedule or even doom the task right away, and every
        // event it emits must trail task-defined on the bus.
        self.ctx.publish_task_defined(&task).map_err(ApiError::from)?;

        let task = if has_dependencies {
            let scheduled_by_tracker = self.tracker.track(&task, false).await?;
            let task = self.ctx.require_task(task_id).await?;
            if scheduled_by_tracker {
                self.ctx
                    .publish_task_pending(&task, 0)
                    .map_err(ApiError::from)?;
            }
            task
        } else {
            self.ctx
                .put_pending_message(&task, 0)
                .await
                .map_err(ApiError::from)?;
            self.ctx
                .publish_task_pending(&task, 0)
                .map_err(ApiError::from)?;
            task
        };

        info!(
            task_id,
            task_group_id = %task.definition.task_group_id,
            state = %task.state(),
            "task created"
        );
        Ok(task.status())
    }

    /// Idempotency comparison for a task id that already exists:
    /// identical definitions return the stored status without new
    /// events, different definitions are a conflict carrying both.
    fn reconcile_existing(
        &self,
        task_id: &str,
        requested: &TaskDefinition,
        existing: Task,
    ) -> ApiResult<TaskStatus> {
        let mut requested = requested.clone();
        requested.normalize();
        if existing.definition.same_as(&requested) {
            return Ok(existing.status());
        }
        warn!(task_id, "createTask idempotency collision with different definition");
        Err(ApiError::conflict_with(
            format!("task {task_id} already exists with a different definition"),
            json!({
                "requested": requested,
                "existing": existing.definition,
            }),
        ))
    }

    /// Create the group or, when it exists, verify the scheduler and
    /// extend its expiry monotonically.
    async fn ensure_task_group(
        &self,
        task_group_id: &str,
        scheduler_id: &str,
        expires: chrono::DateTime<chrono::Utc>,
    ) -> ApiResult<()> {
        let attempts = self.ctx.max_modify_attempts().max(1);
        for _ in 0..attempts {
            match store::load::<TaskGroup>(self.ctx.store(), Table::TaskGroups, task_group_id)
                .await
                .map_err(ApiError::from)?
            {
                Some(group) => {
                    if group.scheduler_id != scheduler_id {
                        return Err(ApiError::conflict(format!(
                            "task group {task_group_id} belongs to scheduler {}, not {scheduler_id}",
                            group.scheduler_id
                        )));
                    }
                    if group.expires >= expires {
                        return Ok(());
                    }
                    let updated = store::modify(
                        self.ctx.store(),
                        Table::TaskGroups,
                        task_group_id,
                        attempts,
                        |g: &mut TaskGroup| g.expires = g.expires.max(expires),
                    )
                    .await
                    .map_err(ApiError::from)?;
                    if updated.is_some() {
                        return Ok(());
                    }
                }
                None => {
                    let group = TaskGroup {
                        task_group_id: task_group_id.to_string(),
                        scheduler_id: scheduler_id.to_string(),
                        expires,
                    };
                    match store::create(self.ctx.store(), Table::TaskGroups, task_group_id, &group)
                        .await
                    {
                        Ok(()) => return Ok(()),
                        Err(StoreError::RowConflict { .. }) => continue,
                        Err(e) => return Err(ApiError::from(ConveyorError::from(e))),
                    }
                }
            }
        }
        Err(ApiError::internal(format!(
            "task group {task_group_id} could not be ensured"
        )))
    }

    /// Membership inserts are idempotent; a duplicate with a different
    /// expiry means two different tasks collided on one taskId.
    async fn insert_membership(
        &self,
        table: Table,
        key: &str,
        member: &TaskGroupMember,
    ) -> ApiResult<()> {
        match store::create(self.ctx.store(), table, key, member).await {
            Ok(()) => Ok(()),
            Err(StoreError::RowConflict { .. }) => {
                let existing: Option<TaskGroupMember> =
                    store::load(self.ctx.store(), table, key).await.map_err(ApiError::from)?;
                match existing {
                    Some(existing) if existing.expires == member.expires => Ok(()),
                    Some(_) => Err(ApiError::conflict(format!(
                        "task {} already tracked in group {} with a different expiry",
                        member.task_id, member.task_group_id
                    ))),
                    None => Ok(()),
                }
            }
            Err(e) => Err(ApiError::from(ConveyorError::from(e))),
        }
    }
}
