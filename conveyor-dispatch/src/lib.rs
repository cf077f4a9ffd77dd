//! The conveyor dispatch engine: task lifecycle, dependency tracking,
//! work claiming and the background resolvers that keep every task
//! moving toward resolution.

pub mod auth;
pub mod claims;
pub mod context;
pub mod credentials;
pub mod dependencies;
pub mod lifecycle;
pub mod publish;
pub mod resolvers;
pub mod service;
pub mod worker_registry;

pub use claims::{ClaimWorkRequest, ClaimedRun, ReclaimedRun, WorkClaimer};
pub use context::SystemContext;
pub use dependencies::DependencyTracker;
pub use lifecycle::TaskLifecycle;
pub use service::QueueService;
pub use worker_registry::WorkerRegistry;
