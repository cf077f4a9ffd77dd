//! Row store with optimistic concurrency.
//!
//! Rows are JSON documents keyed by `(table, key)` with a monotonically
//! increasing etag. All writes go through compare-and-swap on the etag;
//! the store is the only strongly consistent resource in the system and
//! the row version is authoritative across processes.
//!
//! The [`Store`] trait is object-safe and value-typed; the typed helpers
//! in this module layer serde and the mutator-retry loop on top.

pub mod memory;
pub mod postgres;

use crate::errors::{ConveyorError, ConveyorResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Row families. The string form is the table name in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Tasks,
    TaskGroups,
    TaskGroupMembers,
    TaskGroupActive,
    DependencyEdges,
    DependentEdges,
    DependencyCounters,
    Artifacts,
    Provisioners,
    WorkerTypes,
    Workers,
}

impl Table {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::TaskGroups => "task_groups",
            Self::TaskGroupMembers => "task_group_members",
            Self::TaskGroupActive => "task_group_active",
            Self::DependencyEdges => "dependency_edges",
            Self::DependentEdges => "dependent_edges",
            Self::DependencyCounters => "dependency_counters",
            Self::Artifacts => "artifacts",
            Self::Provisioners => "provisioners",
            Self::WorkerTypes => "worker_types",
            Self::Workers => "workers",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// `create` hit an existing row. Callers treat this as the
    /// idempotency signal: reload and compare.
    #[error("row already exists: {table}/{key}")]
    RowConflict { table: &'static str, key: String },

    /// Compare-and-swap lost the race; reload and retry.
    #[error("row version conflict: {table}/{key}")]
    VersionConflict { table: &'static str, key: String },

    /// The row disappeared between load and write.
    #[error("row not found: {table}/{key}")]
    RowMissing { table: &'static str, key: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for ConveyorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { table, key } => {
                ConveyorError::VersionConflict(format!("{table}/{key}"))
            }
            other => ConveyorError::StoreError(other.to_string()),
        }
    }
}

/// A stored row: key, version, JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub key: String,
    pub etag: u64,
    pub value: Value,
}

/// One page of a scan, with the continuation to pass back for the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub rows: Vec<RawRow>,
    pub continuation: Option<String>,
}

/// Value-typed row store operations.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, table: Table, key: &str) -> StoreResult<Option<RawRow>>;

    /// Insert a new row at etag 1. Fails with [`StoreError::RowConflict`]
    /// when the key exists.
    async fn insert(&self, table: Table, key: &str, value: Value) -> StoreResult<RawRow>;

    /// Compare-and-swap update. Fails with
    /// [`StoreError::VersionConflict`] when `etag` is stale and
    /// [`StoreError::RowMissing`] when the row is gone.
    async fn update(&self, table: Table, key: &str, value: Value, etag: u64)
        -> StoreResult<RawRow>;

    /// Delete a row; `true` when something was removed.
    async fn remove(&self, table: Table, key: &str) -> StoreResult<bool>;

    /// Keys are scanned in lexicographic order. `continuation` is the
    /// last key of the previous page; only keys strictly greater are
    /// returned.
    async fn scan(
        &self,
        table: Table,
        prefix: &str,
        continuation: Option<&str>,
        limit: usize,
    ) -> StoreResult<Page>;
}

/// Load and deserialize one row.
pub async fn load<T: DeserializeOwned>(
    store: &dyn Store,
    table: Table,
    key: &str,
) -> ConveyorResult<Option<T>> {
    match store.get(table, key).await.map_err(ConveyorError::from)? {
        Some(row) => Ok(Some(serde_json::from_value(row.value)?)),
        None => Ok(None),
    }
}

/// Serialize and insert one row; `RowConflict` passes through untouched
/// so callers can run their idempotency comparison.
pub async fn create<T: Serialize>(
    store: &dyn Store,
    table: Table,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let json = serde_json::to_value(value).map_err(|e| StoreError::Backend(e.to_string()))?;
    store.insert(table, key, json).await?;
    Ok(())
}

pub async fn remove(store: &dyn Store, table: Table, key: &str) -> ConveyorResult<bool> {
    store.remove(table, key).await.map_err(ConveyorError::from)
}

/// Apply `mutate` to the row under optimistic concurrency.
///
/// The mutator may run several times when concurrent writers conflict,
/// so it must not carry side effects; callers record decisions in
/// captured state and act on them after this returns. A mutation that
/// leaves the document unchanged skips the write entirely, which is
/// what makes no-op operations idempotent without burning a version.
///
/// Returns `None` when the row does not exist.
pub async fn modify<T, F>(
    store: &dyn Store,
    table: Table,
    key: &str,
    max_attempts: u32,
    mut mutate: F,
) -> ConveyorResult<Option<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(&mut T),
{
    for _ in 0..max_attempts.max(1) {
        let Some(row) = store.get(table, key).await.map_err(ConveyorError::from)? else {
            return Ok(None);
        };
        let mut value: T = serde_json::from_value(row.value.clone())?;
        mutate(&mut value);
        let updated = serde_json::to_value(&value)?;
        if updated == row.value {
            return Ok(Some(value));
        }
        match store.update(table, key, updated, row.etag).await {
            Ok(_) => return Ok(Some(value)),
            Err(StoreError::VersionConflict { .. }) => continue,
            Err(StoreError::RowMissing { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
    Err(ConveyorError::VersionConflict(format!(
        "{}/{key}: modify attempts exhausted",
        table.as_str()
    )))
}

/// Like [`modify`], but creates the row from `init` when it is absent.
pub async fn modify_or_create<T, I, F>(
    store: &dyn Store,
    table: Table,
    key: &str,
    max_attempts: u32,
    init: I,
    mut mutate: F,
) -> ConveyorResult<T>
where
    T: Serialize + DeserializeOwned,
    I: Fn() -> T,
    F: FnMut(&mut T),
{
    for _ in 0..max_attempts.max(1) {
        match store.get(table, key).await.map_err(ConveyorError::from)? {
            Some(row) => {
                let mut value: T = serde_json::from_value(row.value.clone())?;
                mutate(&mut value);
                let updated = serde_json::to_value(&value)?;
                if updated == row.value {
                    return Ok(value);
                }
                match store.update(table, key, updated, row.etag).await {
                    Ok(_) => return Ok(value),
                    Err(StoreError::VersionConflict { .. } | StoreError::RowMissing { .. }) => {
                        continue
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => {
                let mut value = init();
                mutate(&mut value);
                match store
                    .insert(table, key, serde_json::to_value(&value)?)
                    .await
                {
                    Ok(_) => return Ok(value),
                    Err(StoreError::RowConflict { .. }) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
    Err(ConveyorError::VersionConflict(format!(
        "{}/{key}: modify attempts exhausted",
        table.as_str()
    )))
}

/// Scan a key prefix and deserialize each row.
pub async fn scan_prefix<T: DeserializeOwned>(
    store: &dyn Store,
    table: Table,
    prefix: &str,
    continuation: Option<&str>,
    limit: usize,
) -> ConveyorResult<(Vec<T>, Option<String>)> {
    let page = store
        .scan(table, prefix, continuation, limit)
        .await
        .map_err(ConveyorError::from)?;
    let mut rows = Vec::with_capacity(page.rows.len());
    for row in page.rows {
        rows.push(serde_json::from_value(row.value)?);
    }
    Ok((rows, page.continuation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        n: u32,
    }

    #[tokio::test]
    async fn modify_skips_write_when_unchanged() {
        let store = InMemoryStore::new();
        create(&store, Table::Tasks, "k", &Counter { n: 1 })
            .await
            .unwrap();
        let before = store.get(Table::Tasks, "k").await.unwrap().unwrap();
        let out: Option<Counter> = modify(&store, Table::Tasks, "k", 5, |_c| {}).await.unwrap();
        assert_eq!(out, Some(Counter { n: 1 }));
        let after = store.get(Table::Tasks, "k").await.unwrap().unwrap();
        assert_eq!(before.etag, after.etag);
    }

    #[tokio::test]
    async fn modify_or_create_initializes_missing_rows() {
        let store = InMemoryStore::new();
        let out: Counter = modify_or_create(
            &store,
            Table::Workers,
            "w",
            5,
            || Counter { n: 0 },
            |c| c.n += 1,
        )
        .await
        .unwrap();
        assert_eq!(out.n, 1);
        let out: Counter = modify_or_create(
            &store,
            Table::Workers,
            "w",
            5,
            || Counter { n: 0 },
            |c| c.n += 1,
        )
        .await
        .unwrap();
        assert_eq!(out.n, 2);
    }
}
