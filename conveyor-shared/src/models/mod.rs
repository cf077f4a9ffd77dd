//! Row models persisted through the store.

pub mod artifact;
pub mod dependency;
pub mod run;
pub mod task;
pub mod task_group;
pub mod worker;

pub use artifact::{ArtifactRef, StorageType};
pub use dependency::{DependencyCounter, DependencyEdge, RequiresMode};
pub use run::Run;
pub use task::{Task, TaskDefinition, TaskStatus};
pub use task_group::{TaskGroup, TaskGroupMember};
pub use worker::{ProvisionerInfo, TaskRunRef, WorkerInfo, WorkerTypeInfo};
