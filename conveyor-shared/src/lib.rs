//! Shared foundations of the conveyor task queue: row models, the run
//! state machine, the optimistic-concurrency store, advisory queue
//! clients and the event bus.

pub mod backoff;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod state_machine;
pub mod store;
pub mod validation;

pub use config::ConveyorConfig;
pub use errors::{ApiError, ApiResult, ConveyorError, ConveyorResult};
