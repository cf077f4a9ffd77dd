//! Postgres-backed store.
//!
//! One physical table holds every row family: `(tbl, key)` primary key,
//! JSONB document, bigint etag. Compare-and-swap is a conditional
//! `UPDATE ... WHERE etag = $n`; a zero row count distinguishes a stale
//! etag from a missing row by re-checking existence.

use super::{Page, RawRow, Store, StoreError, StoreResult, Table};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table when it does not exist yet.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conveyor_rows (
                tbl   TEXT   NOT NULL,
                key   TEXT   NOT NULL,
                etag  BIGINT NOT NULL,
                value JSONB  NOT NULL,
                PRIMARY KEY (tbl, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        debug!("store schema ensured");
        Ok(())
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl Store for PgStore {
    async fn get(&self, table: Table, key: &str) -> StoreResult<Option<RawRow>> {
        let row = sqlx::query("SELECT etag, value FROM conveyor_rows WHERE tbl = $1 AND key = $2")
            .bind(table.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(|r| RawRow {
            key: key.to_string(),
            etag: r.get::<i64, _>("etag") as u64,
            value: r.get::<Value, _>("value"),
        }))
    }

    async fn insert(&self, table: Table, key: &str, value: Value) -> StoreResult<RawRow> {
        let result = sqlx::query(
            "INSERT INTO conveyor_rows (tbl, key, etag, value) VALUES ($1, $2, 1, $3) \
             ON CONFLICT (tbl, key) DO NOTHING",
        )
        .bind(table.as_str())
        .bind(key)
        .bind(&value)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RowConflict {
                table: table.as_str(),
                key: key.to_string(),
            });
        }
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
        let result = sqlx::query(
            "UPDATE conveyor_rows SET value = $4, etag = etag + 1 \
             WHERE tbl = $1 AND key = $2 AND etag = $3",
        )
        .bind(table.as_str())
        .bind(key)
        .bind(etag as i64)
        .bind(&value)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            // Stale etag or vanished row; distinguish for the caller.
            return match self.get(table, key).await? {
                Some(_) => Err(StoreError::VersionConflict {
                    table: table.as_str(),
                    key: key.to_string(),
                }),
                None => Err(StoreError::RowMissing {
                    table: table.as_str(),
                    key: key.to_string(),
                }),
            };
        }
        Ok(RawRow {
            key: key.to_string(),
            etag: etag + 1,
            value,
        })
    }

    async fn remove(&self, table: Table, key: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM conveyor_rows WHERE tbl = $1 AND key = $2")
            .bind(table.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn scan(
        &self,
        table: Table,
        prefix: &str,
        continuation: Option<&str>,
        limit: usize,
    ) -> StoreResult<Page> {
        let after = continuation.unwrap_or("");
        let rows = sqlx::query(
            "SELECT key, etag, value FROM conveyor_rows \
             WHERE tbl = $1 AND left(key, length($2)) = $2 AND key > $3 \
             ORDER BY key LIMIT $4",
        )
        .bind(table.as_str())
        .bind(prefix)
        .bind(after)
        .bind((limit + 1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut out: Vec<RawRow> = rows
            .into_iter()
            .map(|r| RawRow {
                key: r.get::<String, _>("key"),
                etag: r.get::<i64, _>("etag") as u64,
                value: r.get::<Value, _>("value"),
            })
            .collect();
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
