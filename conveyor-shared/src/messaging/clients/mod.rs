//! Queue client implementations.

pub mod in_memory;
pub mod pgmq_client;
pub mod traits;

pub use in_memory::InMemoryQueueClient;
pub use pgmq_client::PgmqQueueClient;
pub use traits::{QueueClient, QueueMessage, Receipt};
