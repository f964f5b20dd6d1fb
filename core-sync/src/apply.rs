//! # Row Store
//!
//! Applies queue entry payloads to business tables at the destination
//! endpoint. Table and column names arrive as data (queue entries name the
//! table they touch), so every identifier is validated and quoted before it
//! is interpolated into SQL; row values are always bound as parameters.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::capture::SYNC_TIMESTAMP_COLUMN;
use crate::error::{Result, SyncError};

/// Validate a SQL identifier and wrap it in double quotes.
///
/// Accepts ASCII letters, digits, underscores, and dashes (legacy table names
/// such as `AV-Res` use dashes), starting with a letter or underscore.
pub fn quote_ident(name: &str) -> Result<String> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if !valid_start || !valid_rest {
        return Err(SyncError::InvalidIdentifier(name.to_string()));
    }

    Ok(format!("\"{}\"", name))
}

/// Destination-side access to business-table rows
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RowStore: Send + Sync {
    /// The row's sync timestamp, or `None` when the row does not exist or
    /// has never been stamped
    async fn sync_timestamp(
        &self,
        table: &str,
        pk_column: &str,
        row_id: i64,
    ) -> Result<Option<i64>>;

    /// Write a full row snapshot, replacing any existing row with the same
    /// primary key. Serves both INSERT and UPDATE entries.
    async fn upsert(
        &self,
        table: &str,
        pk_column: &str,
        row_id: i64,
        payload: &Value,
    ) -> Result<()>;

    /// Remove a row. Deleting an absent row is not an error.
    async fn delete(&self, table: &str, pk_column: &str, row_id: i64) -> Result<()>;
}

/// SQLite implementation over one endpoint's connection pool
pub struct SqliteRowStore {
    pool: SqlitePool,
}

impl SqliteRowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RowStore for SqliteRowStore {
    async fn sync_timestamp(
        &self,
        table: &str,
        pk_column: &str,
        row_id: i64,
    ) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            quote_ident(SYNC_TIMESTAMP_COLUMN)?,
            quote_ident(table)?,
            quote_ident(pk_column)?
        );

        let ts: Option<Option<i64>> = sqlx::query_scalar(&sql)
            .bind(row_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(ts.flatten())
    }

    async fn upsert(
        &self,
        table: &str,
        pk_column: &str,
        row_id: i64,
        payload: &Value,
    ) -> Result<()> {
        let mut map = match payload {
            Value::Object(map) => map.clone(),
            other => {
                return Err(SyncError::Database(format!(
                    "Row snapshot must be a JSON object, got {}",
                    match other {
                        Value::Null => "null",
                        Value::Bool(_) => "a boolean",
                        Value::Number(_) => "a number",
                        Value::String(_) => "a string",
                        Value::Array(_) => "an array",
                        Value::Object(_) => unreachable!(),
                    }
                )))
            }
        };

        // Snapshots from older captures may omit the primary key
        map.entry(pk_column.to_string())
            .or_insert_with(|| Value::from(row_id));

        let columns = map
            .keys()
            .map(|k| quote_ident(k))
            .collect::<Result<Vec<_>>>()?;
        let placeholders = vec!["?"; columns.len()];

        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote_ident(table)?,
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for value in map.values() {
            query = match value {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        query.bind(i)
                    } else {
                        query.bind(n.as_f64().unwrap_or(0.0))
                    }
                }
                Value::String(s) => query.bind(s.clone()),
                // Nested structures persist as JSON text
                other => query.bind(other.to_string()),
            };
        }

        query
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, table: &str, pk_column: &str, row_id: i64) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(table)?,
            quote_ident(pk_column)?
        );

        sqlx::query(&sql)
            .bind(row_id)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }
}
