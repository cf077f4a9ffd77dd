//! pgmq-backed advisory queue client.
//!
//! Wraps the `pgmq` crate: delayed delivery maps to `send_delay`,
//! visibility timeouts to the read `vt`, and the approximate count is a
//! direct query against the queue table.

use super::traits::{QueueClient, QueueMessage, Receipt};
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::queues::QueueName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgmq::PGMQueue;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PgmqQueueClient {
    pgmq: PGMQueue,
}

impl PgmqQueueClient {
    /// Connect with a fresh pool from a connection string.
    pub async fn new(database_url: &str) -> MessagingResult<Self> {
        let pgmq = PGMQueue::new(database_url.to_string()).await?;
        info!("connected to pgmq");
        Ok(Self { pgmq })
    }

    /// Reuse an existing connection pool.
    pub async fn new_with_pool(pool: sqlx::PgPool) -> Self {
        let pgmq = PGMQueue::new_with_pool(pool).await;
        Self { pgmq }
    }
}

#[async_trait]
impl QueueClient for PgmqQueueClient {
    async fn ensure_queue(&self, queue: &QueueName) -> MessagingResult<()> {
        let name = queue.pg_name();
        self.pgmq.create(&name).await?;
        debug!(queue = %name, "queue ensured");
        Ok(())
    }

    async fn put(
        &self,
        queue: &QueueName,
        payload: Value,
        visible_at: DateTime<Utc>,
    ) -> MessagingResult<()> {
        let name = queue.pg_name();
        let delay = (visible_at - Utc::now()).num_seconds().max(0) as u64;
        let msg_id = self.pgmq.send_delay(&name, &payload, delay).await?;
        debug!(queue = %name, msg_id, delay_seconds = delay, "message enqueued");
        Ok(())
    }

    async fn receive(
        &self,
        queue: &QueueName,
        max: usize,
        visibility: chrono::Duration,
    ) -> MessagingResult<Vec<QueueMessage>> {
        let name = queue.pg_name();
        let vt = visibility.num_seconds().max(1) as i32;
        let messages = self
            .pgmq
            .read_batch::<Value>(&name, Some(vt), max.max(1) as i32)
            .await?
            .unwrap_or_default();

        let visible_until = Utc::now() + visibility;
        Ok(messages
            .into_iter()
            .map(|m| QueueMessage {
                receipt: Receipt::new(m.msg_id.to_string()),
                payload: m.message,
                visible_until,
            })
            .collect())
    }

    async fn delete(&self, queue: &QueueName, receipt: &Receipt) -> MessagingResult<()> {
        let name = queue.pg_name();
        let msg_id: i64 = receipt
            .0
            .parse()
            .map_err(|_| MessagingError::InvalidReceipt(receipt.0.clone()))?;
        self.pgmq.delete(&name, msg_id).await?;
        Ok(())
    }

    async fn count(&self, queue: &QueueName) -> MessagingResult<usize> {
        // pgmq stores each queue in pgmq.q_<name>; the count includes
        // currently locked messages.
        let name = queue.pg_name();
        let count: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM pgmq.q_{name}"))
            .fetch_one(&self.pgmq.connection)
            .await
            .map_err(|e| MessagingError::Backend(e.to_string()))?;
        Ok(count.max(0) as usize)
    }
}
