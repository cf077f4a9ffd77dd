//! In-memory queue client with full visibility-timeout semantics.
//!
//! Backs tests and embedded deployments. Delivery order within a queue
//! is insertion order among currently visible messages, which matches
//! the FIFO-with-lock behavior of the pgmq backend closely enough for
//! every consumer in the system.

use super::traits::{QueueClient, QueueMessage, Receipt};
use crate::messaging::errors::MessagingResult;
use crate::messaging::queues::QueueName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    payload: Value,
    visible_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Queue {
    next_id: u64,
    messages: Vec<StoredMessage>,
}

#[derive(Debug, Default)]
pub struct InMemoryQueueClient {
    queues: Mutex<HashMap<String, Queue>>,
}

impl InMemoryQueueClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    async fn ensure_queue(&self, queue: &QueueName) -> MessagingResult<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(queue.name()).or_default();
        Ok(())
    }

    async fn put(
        &self,
        queue: &QueueName,
        payload: Value,
        visible_at: DateTime<Utc>,
    ) -> MessagingResult<()> {
        let mut queues = self.queues.lock().await;
        let q = queues.entry(queue.name()).or_default();
        let id = q.next_id;
        q.next_id += 1;
        q.messages.push(StoredMessage {
            id,
            payload,
            visible_at,
            locked_until: None,
        });
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueName,
        max: usize,
        visibility: chrono::Duration,
    ) -> MessagingResult<Vec<QueueMessage>> {
        let mut queues = self.queues.lock().await;
        let q = queues.entry(queue.name()).or_default();
        let now = Utc::now();
        let locked_until = now + visibility;

        let mut received = Vec::new();
        for message in q.messages.iter_mut() {
            if received.len() >= max {
                break;
            }
            let visible = message.visible_at <= now
                && message.locked_until.map(|t| t <= now).unwrap_or(true);
            if visible {
                message.locked_until = Some(locked_until);
                received.push(QueueMessage {
                    receipt: Receipt::new(message.id.to_string()),
                    payload: message.payload.clone(),
                    visible_until: locked_until,
                });
            }
        }
        Ok(received)
    }

    async fn delete(&self, queue: &QueueName, receipt: &Receipt) -> MessagingResult<()> {
        let mut queues = self.queues.lock().await;
        if let Some(q) = queues.get_mut(&queue.name()) {
            if let Ok(id) = receipt.0.parse::<u64>() {
                q.messages.retain(|m| m.id != id);
            }
        }
        Ok(())
    }

    async fn count(&self, queue: &QueueName) -> MessagingResult<usize> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(&queue.name())
            .map(|q| q.messages.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> QueueName {
        QueueName::ClaimExpiration
    }

    #[tokio::test]
    async fn delayed_messages_stay_invisible() {
        let client = InMemoryQueueClient::new();
        client
            .put(&queue(), json!({"n": 1}), Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        let got = client
            .receive(&queue(), 10, chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(got.is_empty());
        assert_eq!(client.count(&queue()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn visibility_timeout_locks_and_releases() {
        let client = InMemoryQueueClient::new();
        client.put(&queue(), json!(1), Utc::now()).await.unwrap();

        let first = client
            .receive(&queue(), 10, chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let second = client
            .receive(&queue(), 10, chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert!(second.is_empty());

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let third = client
            .receive(&queue(), 10, chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(third.len(), 1, "lock expired, message redelivered");
    }

    #[tokio::test]
    async fn delete_consumes_the_message() {
        let client = InMemoryQueueClient::new();
        client.put(&queue(), json!(1), Utc::now()).await.unwrap();
        let got = client
            .receive(&queue(), 1, chrono::Duration::seconds(30))
            .await
            .unwrap();
        client.delete(&queue(), &got[0].receipt).await.unwrap();
        assert_eq!(client.count(&queue()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn receive_respects_max() {
        let client = InMemoryQueueClient::new();
        for i in 0..5 {
            client.put(&queue(), json!(i), Utc::now()).await.unwrap();
        }
        let got = client
            .receive(&queue(), 3, chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(got.len(), 3);
    }
}
