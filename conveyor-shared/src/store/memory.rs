//! In-memory store for tests and embedded use.
//!
//! A `BTreeMap` per table behind one async mutex. Etag semantics match
//! the Postgres backend exactly, which is what makes the integration
//! tests meaningful.

use super::{Page, RawRow, Store, StoreError, StoreResult, Table};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredRow {
    etag: u64,
    value: Value,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<HashMap<&'static str, BTreeMap<String, StoredRow>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, table: Table, key: &str) -> StoreResult<Option<RawRow>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .get(table.as_str())
            .and_then(|rows| rows.get(key))
            .map(|row| RawRow {
                key: key.to_string(),
                etag: row.etag,
                value: row.value.clone(),
            }))
    }

    async fn insert(&self, table: Table, key: &str, value: Value) -> StoreResult<RawRow> {
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table.as_str()).or_default();
        if rows.contains_key(key) {
            return Err(StoreError::RowConflict {
                table: table.as_str(),
                key: key.to_string(),
            });
        }
        rows.insert(
            key.to_string(),
            StoredRow {
                etag: 1,
                value: value.clone(),
            },
        );
        Ok(RawRow {
            key: key.to_string(),
            etag: 1,
            value,
        })
    }

    async fn update(
        &self,
        table: Table,
        key: &str,
        value: Value,
        etag: u64,
    ) -> StoreResult<RawRow> {
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table.as_str()).or_default();
        let Some(row) = rows.get_mut(key) else {
            return Err(StoreError::RowMissing {
                table: table.as_str(),
                key: key.to_string(),
            });
        };
        if row.etag != etag {
            return Err(StoreError::VersionConflict {
                table: table.as_str(),
                key: key.to_string(),
            });
        }
        row.etag += 1;
        row.value = value.clone();
        Ok(RawRow {
            key: key.to_string(),
            etag: row.etag,
            value,
        })
    }

    async fn remove(&self, table: Table, key: &str) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .get_mut(table.as_str())
            .map(|rows| rows.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn scan(
        &self,
        table: Table,
        prefix: &str,
        continuation: Option<&str>,
        limit: usize,
    ) -> StoreResult<Page> {
        let tables = self.tables.lock().await;
        let Some(rows) = tables.get(table.as_str()) else {
            return Ok(Page {
                rows: vec![],
                continuation: None,
            });
        };
        let mut out = Vec::new();
        for (key, row) in rows.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(after) = continuation {
                if key.as_str() <= after {
                    continue;
                }
            }
            out.push(RawRow {
                key: key.clone(),
                etag: row.etag,
                value: row.value.clone(),
            });
            if out.len() > limit {
                break;
            }
        }
        let continuation = if out.len() > limit {
            out.truncate(limit);
            out.last().map(|r| r.key.clone())
        } else {
            None
        };
        Ok(Page {
            rows: out,
            continuation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_is_distinct_on_existing_rows() {
        let store = InMemoryStore::new();
        store
            .insert(Table::Tasks, "a", json!({"x": 1}))
            .await
            .unwrap();
        let err = store
            .insert(Table::Tasks, "a", json!({"x": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RowConflict { .. }));
    }

    #[tokio::test]
    async fn update_requires_matching_etag() {
        let store = InMemoryStore::new();
        let row = store
            .insert(Table::Tasks, "a", json!({"x": 1}))
            .await
            .unwrap();
        store
            .update(Table::Tasks, "a", json!({"x": 2}), row.etag)
            .await
            .unwrap();
        let err = store
            .update(Table::Tasks, "a", json!({"x": 3}), row.etag)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn scan_pages_through_a_prefix() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .insert(Table::TaskGroupMembers, &format!("g1/t{i}"), json!(i))
                .await
                .unwrap();
        }
        store
            .insert(Table::TaskGroupMembers, "g2/t0", json!(99))
            .await
            .unwrap();

        let first = store
            .scan(Table::TaskGroupMembers, "g1/", None, 3)
            .await
            .unwrap();
        assert_eq!(first.rows.len(), 3);
        let continuation = first.continuation.clone().unwrap();

        let rest = store
            .scan(Table::TaskGroupMembers, "g1/", Some(&continuation), 3)
            .await
            .unwrap();
        assert_eq!(rest.rows.len(), 2);
        assert_eq!(rest.continuation, None);
    }

    #[tokio::test]
    async fn tables_are_isolated() {
        let store = InMemoryStore::new();
        store.insert(Table::Tasks, "a", json!(1)).await.unwrap();
        assert!(store.get(Table::Workers, "a").await.unwrap().is_none());
    }
}
