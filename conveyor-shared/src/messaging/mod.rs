//! Advisory queues.
//!
//! Durable FIFO queues with visibility-timeout semantics. Messages are
//! hints, never authority: every consumer re-reads the task row and
//! checks that the referenced (taskId, runId, takenUntil/deadline) still
//! matches before acting, so duplicates and stale deliveries are
//! harmless.

pub mod clients;
pub mod errors;
pub mod message;
pub mod queues;

pub use clients::{InMemoryQueueClient, PgmqQueueClient, QueueClient, QueueMessage, Receipt};
pub use errors::{MessagingError, MessagingResult};
pub use message::{ClaimMessage, DeadlineMessage, PendingMessage, Resolution, ResolvedMessage};
pub use queues::QueueName;
