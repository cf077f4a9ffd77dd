//! Unified trait for advisory-queue clients.
//!
//! One interface for the pgmq-backed production client and the
//! in-memory testing client, so the engine switches on configuration
//! without code changes.

use crate::messaging::errors::MessagingResult;
use crate::messaging::queues::QueueName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Opaque handle for deleting a received message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(pub String);

impl Receipt {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// A received message, locked until `visible_until`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub receipt: Receipt,
    pub payload: Value,
    pub visible_until: DateTime<Utc>,
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Create the queue if it does not exist.
    async fn ensure_queue(&self, queue: &QueueName) -> MessagingResult<()>;

    /// Enqueue with at-least-once delivery, no earlier than
    /// `visible_at`.
    async fn put(
        &self,
        queue: &QueueName,
        payload: Value,
        visible_at: DateTime<Utc>,
    ) -> MessagingResult<()>;

    /// Receive up to `max` visible messages, locking each for
    /// `visibility`. Messages not deleted before the lock expires are
    /// redelivered.
    async fn receive(
        &self,
        queue: &QueueName,
        max: usize,
        visibility: chrono::Duration,
    ) -> MessagingResult<Vec<QueueMessage>>;

    /// Remove a message for good.
    async fn delete(&self, queue: &QueueName, receipt: &Receipt) -> MessagingResult<()>;

    /// Approximate number of messages in the queue, including those
    /// currently locked.
    async fn count(&self, queue: &QueueName) -> MessagingResult<usize>;
}
