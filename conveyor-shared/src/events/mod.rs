//! Task transition event bus.
//!
//! Topic-style publish with structured routing keys. Delivery is
//! at-least-once and consumers tolerate duplicates; for any single task
//! the publish order matches the order of committed state transitions,
//! because handlers publish only after the store write lands.

pub mod publisher;
pub mod routing;
pub mod types;

pub use publisher::{EventCapture, EventPublisher};
pub use routing::RoutingKey;
pub use types::{
    ArtifactCreatedEvent, BusEvent, TaskDefinedEvent, TaskExceptionEvent, TaskGroupResolvedEvent,
    TaskPendingEvent, TaskRunResolvedEvent, TaskRunningEvent, Topic,
};
