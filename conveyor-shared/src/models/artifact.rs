//! Artifact references.
//!
//! The core does not store artifact content; it tracks references so the
//! `present` flag can gate `reportCompleted` and the `artifact-created`
//! event can fire. Blob storage and signed URLs live elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an artifact's content lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageType {
    /// Content uploaded to object storage; `present` flips true once the
    /// upload is finished.
    Object,
    /// A redirect to an external URL; present on creation.
    Reference,
    /// A tombstone recording why an artifact could not be produced.
    Error,
}

/// Reference row for one artifact of one run, keyed
/// `<taskId>/<runId>/<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub task_id: String,
    pub run_id: u32,
    pub name: String,
    pub storage_type: StorageType,
    pub present: bool,
    pub expires: DateTime<Utc>,
}

impl ArtifactRef {
    pub fn key(task_id: &str, run_id: u32, name: &str) -> String {
        format!("{task_id}/{run_id}/{name}")
    }

    /// Object artifacts start absent; reference and error artifacts are
    /// complete the moment they are registered.
    pub fn new(
        task_id: String,
        run_id: u32,
        name: String,
        storage_type: StorageType,
        expires: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            run_id,
            name,
            present: !matches!(storage_type, StorageType::Object),
            storage_type,
            expires,
        }
    }
}
