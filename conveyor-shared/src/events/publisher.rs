//! Event publisher over a broadcast channel.
//!
//! In-process fan-out to any number of subscribers. A publish with no
//! subscribers succeeds; the bus promises at-least-once to attached
//! consumers, not durability. Durable effects ride the advisory queues.

use super::routing::{cc_routes, RoutingKey};
use super::types::{BusEvent, Topic};
use crate::errors::{ConveyorError, ConveyorResult};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, instrument};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<BusEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Publish a typed payload under a topic and routing key.
    #[instrument(skip(self, payload, routing_key), fields(topic = %topic))]
    pub fn publish<T: Serialize>(
        &self,
        topic: Topic,
        routing_key: &RoutingKey,
        routes: &[String],
        payload: &T,
    ) -> ConveyorResult<()> {
        let event = BusEvent {
            topic,
            routing_key: routing_key.render(),
            cc_routes: cc_routes(routes),
            payload: serde_json::to_value(payload)
                .map_err(|e| ConveyorError::EventError(e.to_string()))?,
            published: Utc::now(),
        };
        debug!(routing_key = %event.routing_key, "event published");
        // No subscribers is fine; the send only fails when nobody is
        // listening, which is not an error for an advisory bus.
        let _ = self.sender.send(event);
        Ok(())
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Test subscriber that accumulates every event published after it was
/// attached.
#[derive(Debug)]
pub struct EventCapture {
    receiver: Mutex<broadcast::Receiver<BusEvent>>,
}

impl EventCapture {
    pub fn attach(publisher: &EventPublisher) -> Self {
        Self {
            receiver: Mutex::new(publisher.subscribe()),
        }
    }

    /// Drain everything received so far.
    pub async fn drain(&self) -> Vec<BusEvent> {
        let mut receiver = self.receiver.lock().await;
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Drain, keeping only events on `topic`.
    pub async fn drain_topic(&self, topic: Topic) -> Vec<BusEvent> {
        self.drain()
            .await
            .into_iter()
            .filter(|e| e.topic == topic)
            .collect()
    }
}
