//! Dependency gating, dooming, self-dependencies and task-group
//! resolution.

mod common;

use common::*;
use conveyor_shared::errors::ApiError;
use conveyor_shared::events::Topic;
use conveyor_shared::models::dependency::RequiresMode;
use conveyor_shared::state_machine::{ReasonResolved, RunState, TaskState};

#[tokio::test]
async fn all_completed_dependency_gates_scheduling() {
    let (service, capture) = service();
    let group = slug();
    let t1 = slug();
    let t2 = slug();

    service
        .lifecycle
        .create_task(&t1, definition(&group))
        .await
        .unwrap();

    let mut def2 = definition(&group);
    def2.dependencies = vec![t1.clone()];
    let status = service.lifecycle.create_task(&t2, def2).await.unwrap();
    assert_eq!(status.state, TaskState::Unscheduled);
    assert!(status.runs.is_empty());
    capture.drain().await;

    // Resolve T1 through the normal claim/complete path.
    service
        .claimer
        .claim_work(&claim_request(1), None)
        .await
        .unwrap();
    service.lifecycle.report_completed(&t1, 0).await.unwrap();
    service.resolved_resolver.tick().await.unwrap();

    let status = service.lifecycle.get_task_status(&t2).await.unwrap();
    assert_eq!(status.state, TaskState::Pending);
    assert_eq!(status.runs.len(), 1);

    // Exactly one task-pending for T2.
    let pending: Vec<_> = capture
        .drain_topic(Topic::TaskPending)
        .await
        .into_iter()
        .filter(|e| e.routing_key.starts_with(&t2))
        .collect();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn all_resolved_dependency_accepts_failure() {
    let (service, _capture) = service();
    let group = slug();
    let t1 = slug();
    let t2 = slug();

    service
        .lifecycle
        .create_task(&t1, definition(&group))
        .await
        .unwrap();
    let mut def2 = definition(&group);
    def2.dependencies = vec![t1.clone()];
    def2.requires = RequiresMode::AllResolved;
    service.lifecycle.create_task(&t2, def2).await.unwrap();

    service
        .claimer
        .claim_work(&claim_request(1), None)
        .await
        .unwrap();
    service.lifecycle.report_failed(&t1, 0).await.unwrap();
    service.resolved_resolver.tick().await.unwrap();

    let status = service.lifecycle.get_task_status(&t2).await.unwrap();
    assert_eq!(status.state, TaskState::Pending);
}

#[tokio::test]
async fn all_completed_dependent_is_doomed_by_failure() {
    let (service, capture) = service();
    let group = slug();
    let t1 = slug();
    let t2 = slug();

    service
        .lifecycle
        .create_task(&t1, definition(&group))
        .await
        .unwrap();
    let mut def2 = definition(&group);
    def2.dependencies = vec![t1.clone()];
    service.lifecycle.create_task(&t2, def2).await.unwrap();
    capture.drain().await;

    service
        .claimer
        .claim_work(&claim_request(1), None)
        .await
        .unwrap();
    service.lifecycle.report_failed(&t1, 0).await.unwrap();
    service.resolved_resolver.tick().await.unwrap();

    let status = service.lifecycle.get_task_status(&t2).await.unwrap();
    assert_eq!(status.state, TaskState::Exception);
    assert_eq!(status.runs.len(), 1);
    assert_eq!(status.runs[0].state, RunState::Exception);
    assert_eq!(
        status.runs[0].reason_resolved,
        Some(ReasonResolved::Canceled)
    );

    let exceptions: Vec<_> = capture
        .drain_topic(Topic::TaskException)
        .await
        .into_iter()
        .filter(|e| e.routing_key.starts_with(&t2))
        .collect();
    assert_eq!(exceptions.len(), 1);
}

#[tokio::test]
async fn dependent_doomed_at_creation_sees_defined_before_exception() {
    let (service, capture) = service();
    let group = slug();
    let t1 = slug();
    let t2 = slug();

    // t1 fails before t2 exists; the creation-time sweep dooms t2
    // immediately.
    service
        .lifecycle
        .create_task(&t1, definition(&group))
        .await
        .unwrap();
    service
        .claimer
        .claim_work(&claim_request(1), None)
        .await
        .unwrap();
    service.lifecycle.report_failed(&t1, 0).await.unwrap();
    capture.drain().await;

    let mut def2 = definition(&group);
    def2.dependencies = vec![t1.clone()];
    let status = service.lifecycle.create_task(&t2, def2).await.unwrap();
    assert_eq!(status.state, TaskState::Exception);

    // task-defined still leads the task's event stream.
    let events: Vec<_> = capture
        .drain()
        .await
        .into_iter()
        .filter(|e| e.routing_key.starts_with(&t2))
        .collect();
    assert_eq!(events[0].topic, Topic::TaskDefined);
    assert_eq!(events[1].topic, Topic::TaskException);
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn define_task_stays_unscheduled_until_forced() {
    let (service, capture) = service();
    let group = slug();
    let task_id = slug();

    let status = service
        .lifecycle
        .define_task(&task_id, definition(&group))
        .await
        .unwrap();
    assert_eq!(status.state, TaskState::Unscheduled);
    assert!(capture.drain_topic(Topic::TaskPending).await.is_empty());

    let status = service.lifecycle.schedule_task(&task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Pending);
    assert_eq!(capture.drain_topic(Topic::TaskPending).await.len(), 1);

    // Scheduling again is a no-op.
    let replay = service.lifecycle.schedule_task(&task_id).await.unwrap();
    assert_eq!(replay.runs.len(), 1);
    assert!(capture.drain_topic(Topic::TaskPending).await.is_empty());
}

#[tokio::test]
async fn dependencies_satisfied_before_creation_schedule_immediately() {
    let (service, capture) = service();
    let group = slug();
    let t1 = slug();
    let t2 = slug();

    service
        .lifecycle
        .create_task(&t1, definition(&group))
        .await
        .unwrap();
    service
        .claimer
        .claim_work(&claim_request(1), None)
        .await
        .unwrap();
    service.lifecycle.report_completed(&t1, 0).await.unwrap();
    capture.drain().await;

    let mut def2 = definition(&group);
    def2.dependencies = vec![t1.clone()];
    let status = service.lifecycle.create_task(&t2, def2).await.unwrap();
    assert_eq!(status.state, TaskState::Pending);

    // task-defined precedes task-pending for the new task.
    let events: Vec<_> = capture
        .drain()
        .await
        .into_iter()
        .filter(|e| e.routing_key.starts_with(&t2))
        .collect();
    assert_eq!(events[0].topic, Topic::TaskDefined);
    assert_eq!(events[1].topic, Topic::TaskPending);
}

#[tokio::test]
async fn unknown_dependencies_are_rejected() {
    let (service, _capture) = service();
    let group = slug();
    let mut def = definition(&group);
    def.dependencies = vec![slug()];
    let err = service
        .lifecycle
        .create_task(&slug(), def)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InputError { .. }));
}

#[tokio::test]
async fn task_group_re_resolves_after_new_members() {
    let (service, capture) = service();
    let group = slug();

    let t1 = slug();
    service
        .lifecycle
        .create_task(&t1, definition(&group))
        .await
        .unwrap();
    service
        .claimer
        .claim_work(&claim_request(1), None)
        .await
        .unwrap();
    service.lifecycle.report_completed(&t1, 0).await.unwrap();
    service.resolved_resolver.tick().await.unwrap();
    assert_eq!(capture.drain_topic(Topic::TaskGroupResolved).await.len(), 1);

    // A new task re-populates the group; its resolution resolves the
    // group a second time.
    let t2 = slug();
    service
        .lifecycle
        .create_task(&t2, definition(&group))
        .await
        .unwrap();
    service
        .claimer
        .claim_work(&claim_request(1), None)
        .await
        .unwrap();
    service.lifecycle.report_completed(&t2, 0).await.unwrap();
    service.resolved_resolver.tick().await.unwrap();
    assert_eq!(capture.drain_topic(Topic::TaskGroupResolved).await.len(), 1);
}

#[tokio::test]
async fn list_dependent_tasks_uses_reverse_edges() {
    let (service, _capture) = service();
    let group = slug();
    let t1 = slug();

    service
        .lifecycle
        .create_task(&t1, definition(&group))
        .await
        .unwrap();
    let mut dependents = Vec::new();
    for _ in 0..3 {
        let id = slug();
        let mut def = definition(&group);
        def.dependencies = vec![t1.clone()];
        service.lifecycle.create_task(&id, def).await.unwrap();
        dependents.push(id);
    }

    let page = service
        .lifecycle
        .list_dependent_tasks(&t1, None, 100)
        .await
        .unwrap();
    assert_eq!(page.dependents.len(), 3);
    for status in &page.dependents {
        assert!(dependents.contains(&status.task_id));
        assert_eq!(status.state, TaskState::Unscheduled);
    }
}
