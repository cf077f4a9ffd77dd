//! Lifecycle flows: creation, claiming, reports, cancellation, rerun,
//! idempotency and the artifact gate.

mod common;

use common::*;
use conveyor_dispatch::auth::FixedScopeAuth;
use conveyor_dispatch::{QueueService, SystemContext};
use conveyor_shared::constants::Priority;
use conveyor_shared::errors::ApiError;
use conveyor_shared::events::Topic;
use conveyor_shared::messaging::QueueName;
use conveyor_shared::models::artifact::StorageType;
use conveyor_shared::state_machine::{ReasonCreated, ReasonResolved, RunState, TaskState};
use std::sync::Arc;

#[tokio::test]
async fn create_claim_complete_resolves_task_and_group() {
    let (service, capture) = service();
    let group = slug();
    let task_id = slug();

    // Create: run 0 pending, task-defined then task-pending.
    let status = service
        .lifecycle
        .create_task(&task_id, definition(&group))
        .await
        .unwrap();
    assert_eq!(status.state, TaskState::Pending);
    assert_eq!(status.runs.len(), 1);
    assert_eq!(status.runs[0].reason_created, ReasonCreated::Scheduled);

    let events = capture.drain().await;
    assert_eq!(events[0].topic, Topic::TaskDefined);
    assert_eq!(events[1].topic, Topic::TaskPending);

    let pending_queue = QueueName::pending(PROVISIONER, WORKER_TYPE, Priority::Lowest);
    assert_eq!(service.ctx.queues().count(&pending_queue).await.unwrap(), 1);

    // Claim: run 0 running, claim-expiration message posted, pending
    // message consumed.
    let claims = service
        .claimer
        .claim_work(&claim_request(4), None)
        .await
        .unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].run_id, 0);
    assert_eq!(claims[0].status.state, TaskState::Running);
    assert_eq!(service.ctx.queues().count(&pending_queue).await.unwrap(), 0);
    assert_eq!(
        service
            .ctx
            .queues()
            .count(&QueueName::ClaimExpiration)
            .await
            .unwrap(),
        1
    );
    let events = capture.drain_topic(Topic::TaskRunning).await;
    assert_eq!(events.len(), 1);

    // Complete: terminal status, resolved message, task-completed.
    let status = service
        .lifecycle
        .report_completed(&task_id, 0)
        .await
        .unwrap();
    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(
        service
            .ctx
            .queues()
            .count(&QueueName::Resolved)
            .await
            .unwrap(),
        1
    );
    assert_eq!(capture.drain_topic(Topic::TaskCompleted).await.len(), 1);

    // Resolved resolver: active set drains, group resolves once.
    service.resolved_resolver.tick().await.unwrap();
    assert_eq!(capture.drain_topic(Topic::TaskGroupResolved).await.len(), 1);
}

#[tokio::test]
async fn identical_create_replays_without_new_events() {
    let (service, capture) = service();
    let group = slug();
    let task_id = slug();
    let def = definition(&group);

    let first = service
        .lifecycle
        .create_task(&task_id, def.clone())
        .await
        .unwrap();
    capture.drain().await;

    let second = service
        .lifecycle
        .create_task(&task_id, def.clone())
        .await
        .unwrap();
    assert_eq!(first, second);
    assert!(capture.drain().await.is_empty(), "replay emitted events");

    // A different definition is a conflict carrying both definitions.
    let mut other = def;
    other.retries = 5;
    let err = service
        .lifecycle
        .create_task(&task_id, other)
        .await
        .unwrap_err();
    match err {
        ApiError::RequestConflict { details, .. } => {
            let details = details.expect("conflict carries definitions");
            assert!(details.get("requested").is_some());
            assert!(details.get("existing").is_some());
        }
        other => panic!("expected RequestConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn task_group_scheduler_conflict_is_rejected() {
    let (service, _capture) = service();
    let group = slug();

    service
        .lifecycle
        .create_task(&slug(), definition(&group))
        .await
        .unwrap();

    let mut def = definition(&group);
    def.scheduler_id = "other-sched".to_string();
    let err = service
        .lifecycle
        .create_task(&slug(), def)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::RequestConflict { .. }));

    // The group keeps its original scheduler.
    let page = service
        .lifecycle
        .list_task_group(&group, None, 100)
        .await
        .unwrap();
    assert_eq!(page.scheduler_id, SCHEDULER);
    assert_eq!(page.tasks.len(), 1);
}

#[tokio::test]
async fn worker_shutdown_consumes_a_retry_without_exception_event() {
    let (service, capture) = service();
    let group = slug();
    let task_id = slug();
    let mut def = definition(&group);
    def.retries = 2;

    service.lifecycle.create_task(&task_id, def).await.unwrap();
    service
        .claimer
        .claim_work(&claim_request(1), None)
        .await
        .unwrap();
    capture.drain().await;

    let status = service
        .lifecycle
        .report_exception(&task_id, 0, ReasonResolved::WorkerShutdown)
        .await
        .unwrap();

    assert_eq!(status.retries_left, 1);
    assert_eq!(status.runs.len(), 2);
    assert_eq!(status.runs[0].state, RunState::Exception);
    assert_eq!(
        status.runs[0].reason_resolved,
        Some(ReasonResolved::WorkerShutdown)
    );
    assert_eq!(status.runs[1].state, RunState::Pending);
    assert_eq!(status.runs[1].reason_created, ReasonCreated::Retry);

    assert_eq!(capture.drain_topic(Topic::TaskPending).await.len(), 1);
    assert!(capture.drain_topic(Topic::TaskException).await.is_empty());
}

#[tokio::test]
async fn intermittent_task_retry_uses_task_retry_reason() {
    let (service, _capture) = service();
    let group = slug();
    let task_id = slug();
    let mut def = definition(&group);
    def.retries = 1;

    service.lifecycle.create_task(&task_id, def).await.unwrap();
    service
        .claimer
        .claim_work(&claim_request(1), None)
        .await
        .unwrap();

    let status = service
        .lifecycle
        .report_exception(&task_id, 0, ReasonResolved::IntermittentTask)
        .await
        .unwrap();
    assert_eq!(status.runs[1].reason_created, ReasonCreated::TaskRetry);
}

#[tokio::test]
async fn cancel_task_without_runs_appends_synthetic_exception() {
    let (service, capture) = service();
    let group = slug();
    let task_id = slug();

    service
        .lifecycle
        .define_task(&task_id, definition(&group))
        .await
        .unwrap();
    capture.drain().await;

    let status = service.lifecycle.cancel_task(&task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Exception);
    assert_eq!(status.runs.len(), 1);
    assert_eq!(status.runs[0].reason_created, ReasonCreated::Exception);
    assert_eq!(
        status.runs[0].reason_resolved,
        Some(ReasonResolved::Canceled)
    );
    assert_eq!(capture.drain_topic(Topic::TaskException).await.len(), 1);

    // Cancelling again is a no-op replay.
    let again = service.lifecycle.cancel_task(&task_id).await.unwrap();
    assert_eq!(again, status);
    assert!(capture.drain_topic(Topic::TaskException).await.is_empty());
}

#[tokio::test]
async fn rerun_appends_a_run_after_resolution() {
    let (service, capture) = service();
    let group = slug();
    let task_id = slug();
    let mut def = definition(&group);
    def.retries = 3;

    service.lifecycle.create_task(&task_id, def).await.unwrap();
    service
        .claimer
        .claim_work(&claim_request(1), None)
        .await
        .unwrap();
    service.lifecycle.report_failed(&task_id, 0).await.unwrap();
    capture.drain().await;

    let status = service.lifecycle.rerun_task(&task_id).await.unwrap();
    assert_eq!(status.runs.len(), 2);
    assert_eq!(status.runs[1].state, RunState::Pending);
    assert_eq!(status.runs[1].reason_created, ReasonCreated::Rerun);
    assert_eq!(capture.drain_topic(Topic::TaskPending).await.len(), 1);

    // A rerun while the new run is still active is a replay.
    let replay = service.lifecycle.rerun_task(&task_id).await.unwrap();
    assert_eq!(replay.runs.len(), 2);
    assert!(capture.drain_topic(Topic::TaskPending).await.is_empty());
}

#[tokio::test]
async fn completion_is_gated_on_object_artifacts() {
    let (service, capture) = service();
    let group = slug();
    let task_id = slug();

    service
        .lifecycle
        .create_task(&task_id, definition(&group))
        .await
        .unwrap();
    service
        .claimer
        .claim_work(&claim_request(1), None)
        .await
        .unwrap();

    service
        .lifecycle
        .register_artifact(&task_id, 0, "public/build/out.tar.gz", StorageType::Object, None)
        .await
        .unwrap();
    assert_eq!(capture.drain_topic(Topic::ArtifactCreated).await.len(), 1);

    let err = service
        .lifecycle
        .report_completed(&task_id, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::RequestConflict { .. }));

    service
        .lifecycle
        .mark_artifact_present(&task_id, 0, "public/build/out.tar.gz")
        .await
        .unwrap();
    let status = service
        .lifecycle
        .report_completed(&task_id, 0)
        .await
        .unwrap();
    assert_eq!(status.state, TaskState::Completed);
}

#[tokio::test]
async fn reclaim_advances_the_claim_horizon() {
    let (service, _capture) = service();
    let group = slug();
    let task_id = slug();

    service
        .lifecycle
        .create_task(&task_id, definition(&group))
        .await
        .unwrap();
    let claims = service
        .claimer
        .claim_work(&claim_request(1), None)
        .await
        .unwrap();
    let original = claims[0].taken_until;

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let reclaimed = service.claimer.reclaim(&task_id, 0).await.unwrap();
    assert!(reclaimed.taken_until > original);

    // Reclaiming a run that is not running is a conflict.
    service
        .lifecycle
        .report_completed(&task_id, 0)
        .await
        .unwrap();
    let err = service.claimer.reclaim(&task_id, 0).await.unwrap_err();
    assert!(matches!(err, ApiError::RequestConflict { .. }));
}

#[tokio::test]
async fn create_task_requires_a_satisfying_priority_scope() {
    let ctx = SystemContext::new(
        test_config(),
        Arc::new(conveyor_shared::store::InMemoryStore::new()),
        Arc::new(conveyor_shared::messaging::InMemoryQueueClient::new()),
        Arc::new(conveyor_dispatch::credentials::StaticCredentialsMinter),
        Arc::new(FixedScopeAuth::new(vec![format!(
            "queue:create-task:high:{PROVISIONER}/{WORKER_TYPE}"
        )])),
    );
    let service = QueueService::new(ctx);
    let group = slug();

    // The high scope covers anything at or below high.
    let mut low = definition(&group);
    low.priority = Priority::Low;
    service.lifecycle.create_task(&slug(), low).await.unwrap();

    // It does not cover highest.
    let mut highest = definition(&group);
    highest.priority = Priority::Highest;
    let err = service
        .lifecycle
        .create_task(&slug(), highest)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::AuthorizationError { .. }));
}

#[tokio::test]
async fn invalid_definitions_are_input_errors() {
    let (service, _capture) = service();
    let group = slug();

    // Scope ending in `**`.
    let mut def = definition(&group);
    def.scopes = vec!["queue:**".to_string()];
    assert!(matches!(
        service.lifecycle.create_task(&slug(), def).await,
        Err(ApiError::InputError { .. })
    ));

    // Deadline in the past.
    let mut def = definition(&group);
    def.deadline = def.created - chrono::Duration::hours(1);
    assert!(matches!(
        service.lifecycle.create_task(&slug(), def).await,
        Err(ApiError::InputError { .. })
    ));

    // Malformed task id.
    assert!(matches!(
        service
            .lifecycle
            .create_task("not-a-slug", definition(&group))
            .await,
        Err(ApiError::InputError { .. })
    ));

    // Too many routes.
    let mut def = definition(&group);
    def.routes = (0..=conveyor_shared::validation::MAX_ROUTES)
        .map(|i| format!("index.route-{i}"))
        .collect();
    assert!(matches!(
        service.lifecycle.create_task(&slug(), def).await,
        Err(ApiError::InputError { .. })
    ));
}
