//! Shared system dependencies.
//!
//! Dependency-injection container handed to every service: the store,
//! the advisory queues, the event bus, and the external collaborators
//! (credentials minter, scope checker). Also owns the typed queue-put
//! helpers so invariant-bearing messages are built in exactly one
//! place.

use crate::auth::{AllowAllAuth, AuthChecker};
use crate::credentials::{CredentialsMinter, StaticCredentialsMinter};
use chrono::{DateTime, Utc};
use conveyor_shared::backoff::retry_with_backoff;
use conveyor_shared::config::ConveyorConfig;
use conveyor_shared::errors::ConveyorResult;
use conveyor_shared::events::EventPublisher;
use conveyor_shared::messaging::{
    ClaimMessage, DeadlineMessage, InMemoryQueueClient, PendingMessage, QueueClient, QueueName,
    Resolution, ResolvedMessage,
};
use conveyor_shared::models::task::Task;
use conveyor_shared::store::{InMemoryStore, Store};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct SystemContext {
    /// System instance id, for logs and diagnostics.
    pub system_id: Uuid,
    pub config: ConveyorConfig,
    store: Arc<dyn Store>,
    queues: Arc<dyn QueueClient>,
    pub events: EventPublisher,
    pub credentials: Arc<dyn CredentialsMinter>,
    pub auth: Arc<dyn AuthChecker>,
    ensured_queues: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("system_id", &self.system_id)
            .finish_non_exhaustive()
    }
}

impl SystemContext {
    pub fn new(
        config: ConveyorConfig,
        store: Arc<dyn Store>,
        queues: Arc<dyn QueueClient>,
        credentials: Arc<dyn CredentialsMinter>,
        auth: Arc<dyn AuthChecker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            system_id: Uuid::new_v4(),
            config,
            store,
            queues,
            events: EventPublisher::new(),
            credentials,
            auth,
            ensured_queues: Mutex::new(HashSet::new()),
        })
    }

    /// Fully in-memory context for tests and embedded use.
    pub fn in_memory(config: ConveyorConfig) -> Arc<Self> {
        Self::new(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryQueueClient::new()),
            Arc::new(StaticCredentialsMinter::default()),
            Arc::new(AllowAllAuth),
        )
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn queues(&self) -> &dyn QueueClient {
        self.queues.as_ref()
    }

    pub fn max_modify_attempts(&self) -> u32 {
        self.config.store.max_modify_attempts
    }

    /// Create the queue once per process; later puts skip the check.
    async fn ensure_queue_once(&self, queue: &QueueName) -> ConveyorResult<()> {
        let name = queue.name();
        {
            let ensured = self.ensured_queues.lock().await;
            if ensured.contains(&name) {
                return Ok(());
            }
        }
        self.queues.ensure_queue(queue).await?;
        self.ensured_queues.lock().await.insert(name);
        Ok(())
    }

    async fn put_with_retry(
        &self,
        queue: &QueueName,
        payload: serde_json::Value,
        visible_at: DateTime<Utc>,
    ) -> ConveyorResult<()> {
        self.ensure_queue_once(queue).await?;
        retry_with_backoff(&self.config.backoff, "queue.put", || {
            let payload = payload.clone();
            async move { self.queues.put(queue, payload, visible_at).await }
        })
        .await
        .map_err(Into::into)
    }

    /// Pending message for a freshly scheduled run, visible now.
    pub async fn put_pending_message(&self, task: &Task, run_id: u32) -> ConveyorResult<()> {
        let queue = QueueName::pending(
            &task.definition.provisioner_id,
            &task.definition.worker_type,
            task.definition.priority,
        );
        let message = PendingMessage {
            task_id: task.task_id.clone(),
            run_id,
            hint_id: Some(Uuid::new_v4().simple().to_string()),
        };
        self.put_with_retry(&queue, serde_json::to_value(&message)?, Utc::now())
            .await
    }

    /// Claim-expiration message, visible exactly at `taken_until`.
    pub async fn put_claim_message(
        &self,
        task_id: &str,
        run_id: u32,
        taken_until: DateTime<Utc>,
    ) -> ConveyorResult<()> {
        let message = ClaimMessage {
            task_id: task_id.to_string(),
            run_id,
            taken_until,
        };
        self.put_with_retry(
            &QueueName::ClaimExpiration,
            serde_json::to_value(&message)?,
            taken_until,
        )
        .await
    }

    /// Deadline message, visible exactly at `deadline`.
    pub async fn put_deadline_message(
        &self,
        task_id: &str,
        deadline: DateTime<Utc>,
    ) -> ConveyorResult<()> {
        let message = DeadlineMessage {
            task_id: task_id.to_string(),
            deadline,
        };
        self.put_with_retry(
            &QueueName::Deadline,
            serde_json::to_value(&message)?,
            deadline,
        )
        .await
    }

    /// Resolution message for dependency fan-out, visible now.
    pub async fn put_resolved_message(
        &self,
        task: &Task,
        resolution: Resolution,
    ) -> ConveyorResult<()> {
        let message = ResolvedMessage {
            task_id: task.task_id.clone(),
            task_group_id: task.definition.task_group_id.clone(),
            scheduler_id: task.definition.scheduler_id.clone(),
            resolution,
        };
        self.put_with_retry(
            &QueueName::Resolved,
            serde_json::to_value(&message)?,
            Utc::now(),
        )
        .await
    }
}
