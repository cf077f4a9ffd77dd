//! Shared harness for the integration tests: an in-memory engine, an
//! event capture, and task-definition builders.
#![allow(dead_code)]

use chrono::{Duration, Utc};
use conveyor_dispatch::{ClaimWorkRequest, QueueService, SystemContext};
use conveyor_shared::config::ConveyorConfig;
use conveyor_shared::constants::Priority;
use conveyor_shared::events::EventCapture;
use conveyor_shared::ids::generate_slug_id;
use conveyor_shared::models::dependency::RequiresMode;
use conveyor_shared::models::task::TaskDefinition;

pub const PROVISIONER: &str = "test-prov";
pub const WORKER_TYPE: &str = "test-wt";
pub const SCHEDULER: &str = "test-sched";

/// Timings tightened so visibility windows expire within a test run.
pub fn test_config() -> ConveyorConfig {
    let mut config = ConveyorConfig::default();
    config.claims.long_poll_seconds = 1;
    config.claims.poll_interval_ms = 50;
    config.resolvers.poll_interval_ms = 100;
    config
}

pub fn service() -> (QueueService, EventCapture) {
    service_with(test_config())
}

pub fn service_with(config: ConveyorConfig) -> (QueueService, EventCapture) {
    let ctx = SystemContext::in_memory(config);
    let capture = EventCapture::attach(&ctx.events);
    (QueueService::new(ctx), capture)
}

pub fn slug() -> String {
    generate_slug_id()
}

pub fn definition(task_group_id: &str) -> TaskDefinition {
    let now = Utc::now();
    TaskDefinition {
        provisioner_id: PROVISIONER.to_string(),
        worker_type: WORKER_TYPE.to_string(),
        scheduler_id: SCHEDULER.to_string(),
        task_group_id: task_group_id.to_string(),
        dependencies: vec![],
        requires: RequiresMode::AllCompleted,
        routes: vec![],
        scopes: vec![],
        priority: Priority::Lowest,
        retries: 0,
        created: now,
        deadline: now + Duration::hours(1),
        expires: None,
        payload: serde_json::json!({"command": ["true"]}),
        metadata: serde_json::json!({"name": "integration test task"}),
        tags: serde_json::json!({}),
        extra: serde_json::json!({}),
    }
}

pub fn claim_request(count: usize) -> ClaimWorkRequest {
    ClaimWorkRequest {
        provisioner_id: PROVISIONER.to_string(),
        worker_type: WORKER_TYPE.to_string(),
        worker_group: "test-wg".to_string(),
        worker_id: "test-worker-1".to_string(),
        count,
    }
}
