//! Dependency tracking and fan-out.
//!
//! Forward edges record what a task waits on; reverse edges let a
//! resolution reach its dependents without scanning. Readiness is
//! tracked as the set of still-unsatisfied dependency ids per
//! dependent: removing a satisfied id is idempotent, so duplicate
//! resolved-queue deliveries and the creation-time satisfaction sweep
//! can overlap without double counting.

use crate::context::SystemContext;
use chrono::Utc;
use conveyor_shared::errors::{ApiError, ApiResult, ConveyorError, ConveyorResult};
use conveyor_shared::messaging::Resolution;
use conveyor_shared::models::dependency::{DependencyCounter, DependencyEdge, RequiresMode};
use conveyor_shared::models::run::Run;
use conveyor_shared::models::task::{Task, TaskStatus};
use conveyor_shared::models::task_group::{TaskGroup, TaskGroupMember};
use conveyor_shared::state_machine::{ReasonCreated, ReasonResolved};
use conveyor_shared::store::{self, StoreError, Table};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FANOUT_PAGE: usize = 100;

#[derive(Clone)]
pub struct DependencyTracker {
    ctx: Arc<SystemContext>,
}

impl DependencyTracker {
    pub fn new(ctx: Arc<SystemContext>) -> Self {
        Self { ctx }
    }

    /// Record the dependencies of a freshly created task and schedule it
    /// if they are already satisfied. Returns whether a run was
    /// appended.
    ///
    /// When `publish_pending` is false the caller owns the task-pending
    /// publication (task creation publishes task-defined first); the
    /// pending queue message is emitted here either way.
    pub async fn track(&self, task: &Task, publish_pending: bool) -> ApiResult<bool> {
        let deps = &task.definition.dependencies;
        if deps.is_empty() {
            return Ok(false);
        }

        // Dependencies must exist before the dependent; the one allowed
        // exception is a self-dependency, which exists by construction.
        let mut missing = Vec::new();
        for dep in deps {
            if dep != &task.task_id
                && self
                    .ctx
                    .load_task(dep)
                    .await
                    .map_err(ApiError::from)?
                    .is_none()
            {
                missing.push(dep.clone());
            }
        }
        if !missing.is_empty() {
            return Err(ApiError::input(format!(
                "unknown task dependencies: {missing:?}"
            )));
        }

        let expires = task.definition.expires();
        for dep in deps {
            let edge = DependencyEdge {
                dependent_task_id: task.task_id.clone(),
                required_task_id: dep.clone(),
                requires: task.definition.requires,
                expires,
            };
            self.put_edge(Table::DependencyEdges, &edge.forward_key(), &edge)
                .await?;
            self.put_edge(Table::DependentEdges, &edge.reverse_key(), &edge)
                .await?;
        }

        let attempts = self.ctx.max_modify_attempts();
        store::modify_or_create(
            self.ctx.store(),
            Table::DependencyCounters,
            &task.task_id,
            attempts,
            || DependencyCounter {
                task_id: task.task_id.clone(),
                remaining: deps.clone(),
                requires: task.definition.requires,
                doomed: false,
            },
            |_c| {},
        )
        .await
        .map_err(ApiError::from)?;

        // Satisfaction sweep: some dependencies may have resolved before
        // the edges were written, in which case no resolved-queue
        // delivery will arrive for them.
        let mut counter = None;
        for dep in deps {
            if dep == &task.task_id {
                continue;
            }
            let Some(dep_task) = self.ctx.load_task(dep).await.map_err(ApiError::from)? else {
                continue;
            };
            let state = dep_task.state();
            let (satisfied, adverse) = match task.definition.requires {
                RequiresMode::AllCompleted => (
                    state == conveyor_shared::state_machine::TaskState::Completed,
                    state.is_resolved()
                        && state != conveyor_shared::state_machine::TaskState::Completed,
                ),
                RequiresMode::AllResolved => (state.is_resolved(), false),
            };
            if satisfied || adverse {
                counter = self
                    .update_counter(&task.task_id, dep, adverse)
                    .await
                    .map_err(ApiError::from)?;
            }
        }

        let counter = match counter {
            Some(c) => c,
            None => store::load(self.ctx.store(), Table::DependencyCounters, &task.task_id)
                .await
                .map_err(ApiError::from)?
                .ok_or_else(|| ApiError::internal("dependency counter vanished"))?,
        };

        if counter.doomed {
            self.doom_dependent(&task.task_id).await.map_err(ApiError::from)?;
            return Ok(false);
        }
        if counter.is_ready() {
            let scheduled = self
                .schedule_task_inner(&task.task_id, publish_pending)
                .await?;
            return Ok(scheduled.is_some());
        }
        Ok(false)
    }

    async fn put_edge(
        &self,
        table: Table,
        key: &str,
        edge: &DependencyEdge,
    ) -> ApiResult<()> {
        match store::create(self.ctx.store(), table, key, edge).await {
            Ok(()) | Err(StoreError::RowConflict { .. }) => Ok(()),
            Err(e) => Err(ApiError::from(ConveyorError::from(e))),
        }
    }

    async fn update_counter(
        &self,
        dependent: &str,
        required: &str,
        adverse: bool,
    ) -> ConveyorResult<Option<DependencyCounter>> {
        store::modify(
            self.ctx.store(),
            Table::DependencyCounters,
            dependent,
            self.ctx.max_modify_attempts(),
            |c: &mut DependencyCounter| {
                if adverse {
                    c.doomed = true;
                } else {
                    c.satisfy(required);
                }
            },
        )
        .await
    }

    /// Fan a resolution out to every dependent of `task_id`.
    pub async fn resolve_dependencies_of(
        &self,
        task_id: &str,
        resolution: Resolution,
    ) -> ConveyorResult<()> {
        let prefix = format!("{task_id}/");
        let mut continuation: Option<String> = None;
        loop {
            let (edges, next): (Vec<DependencyEdge>, _) = store::scan_prefix(
                self.ctx.store(),
                Table::DependentEdges,
                &prefix,
                continuation.as_deref(),
                FANOUT_PAGE,
            )
            .await?;

            for edge in &edges {
                let adverse = edge.requires == RequiresMode::AllCompleted
                    && resolution != Resolution::Completed;
                let counter = self
                    .update_counter(&edge.dependent_task_id, task_id, adverse)
                    .await?;
                let Some(counter) = counter else {
                    warn!(
                        dependent = %edge.dependent_task_id,
                        required = %task_id,
                        "dependency counter missing during fan-out"
                    );
                    continue;
                };
                if counter.doomed {
                    self.doom_dependent(&edge.dependent_task_id).await?;
                } else if counter.is_ready() {
                    if let Err(e) = self.schedule_task_inner(&edge.dependent_task_id, true).await {
                        // Past-deadline dependents surface a conflict to
                        // callers; during fan-out there is no caller.
                        debug!(
                            dependent = %edge.dependent_task_id,
                            error = %e,
                            "dependent not schedulable during fan-out"
                        );
                    }
                }
            }

            continuation = next;
            if continuation.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Schedule a task: append run 0 iff it is still unscheduled.
    /// Returns `None` when the task is past its deadline, which callers
    /// surface as a conflict.
    pub async fn schedule_task(&self, task_id: &str) -> ApiResult<Option<TaskStatus>> {
        self.schedule_task_inner(task_id, true).await
    }

    async fn schedule_task_inner(
        &self,
        task_id: &str,
        publish_pending: bool,
    ) -> ApiResult<Option<TaskStatus>> {
        let task = self.ctx.require_task(task_id).await?;
        let now = Utc::now();
        if task.past_deadline(now) && !task.is_resolved() {
            return Ok(None);
        }

        let mut scheduled_run: Option<u32> = None;
        let task = self
            .ctx
            .modify_task(task_id, |t| {
                scheduled_run = None;
                if t.runs.is_empty() {
                    t.runs.push(Run::pending(0, ReasonCreated::Scheduled, now));
                    scheduled_run = Some(0);
                }
            })
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::not_found(format!("task {task_id} not found")))?;

        if let Some(run_id) = scheduled_run {
            self.ctx
                .put_pending_message(&task, run_id)
                .await
                .map_err(ApiError::from)?;
            if publish_pending {
                self.ctx
                    .publish_task_pending(&task, run_id)
                    .map_err(ApiError::from)?;
            }
            info!(task_id, run_id, "task scheduled");
        }
        Ok(Some(task.status()))
    }

    /// Resolve a doomed dependent: an all-completed dependency failed,
    /// so the dependent is cancelled as an exception without ever
    /// running.
    pub async fn doom_dependent(&self, task_id: &str) -> ConveyorResult<()> {
        let now = Utc::now();
        let mut doomed_run: Option<u32> = None;
        let task = self
            .ctx
            .modify_task(task_id, |t| {
                doomed_run = None;
                match t.runs.last_mut() {
                    None => {
                        t.runs.push(Run::exception(0, ReasonResolved::Canceled, now));
                        doomed_run = Some(0);
                    }
                    Some(run) if !run.state.is_terminal() => {
                        run.resolve(ReasonResolved::Canceled, now);
                        doomed_run = Some(run.run_id);
                        t.taken_until = None;
                    }
                    Some(_) => {}
                }
            })
            .await?;
        let Some(task) = task else {
            return Ok(());
        };

        if let Some(run_id) = doomed_run {
            info!(task_id, run_id, "dependent doomed by failed dependency");
            self.ctx
                .put_resolved_message(&task, Resolution::Exception)
                .await?;
            self.ctx.publish_task_exception(&task, Some(run_id))?;
        }
        Ok(())
    }

    /// Drop a resolved task from its group's active set and publish
    /// task-group-resolved on the transition to empty. Re-publication
    /// after new tasks re-populate and re-drain the group is expected.
    pub async fn resolve_group_membership(
        &self,
        task_id: &str,
        task_group_id: &str,
    ) -> ConveyorResult<()> {
        let key = TaskGroupMember::key(task_group_id, task_id);
        let removed = store::remove(self.ctx.store(), Table::TaskGroupActive, &key).await?;
        if !removed {
            return Ok(());
        }

        let prefix = format!("{task_group_id}/");
        let (active, _): (Vec<TaskGroupMember>, _) = store::scan_prefix(
            self.ctx.store(),
            Table::TaskGroupActive,
            &prefix,
            None,
            1,
        )
        .await?;
        if !active.is_empty() {
            return Ok(());
        }

        // Only a group that ever had a member can resolve.
        let (members, _): (Vec<TaskGroupMember>, _) = store::scan_prefix(
            self.ctx.store(),
            Table::TaskGroupMembers,
            &prefix,
            None,
            1,
        )
        .await?;
        if members.is_empty() {
            return Ok(());
        }

        let Some(group) =
            store::load::<TaskGroup>(self.ctx.store(), Table::TaskGroups, task_group_id).await?
        else {
            return Ok(());
        };
        info!(task_group_id, "task group resolved");
        self.ctx.publish_task_group_resolved(&group)?;
        Ok(())
    }
}
