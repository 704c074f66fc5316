//! SQLite persistence backend.
//!
//! A single `kv` table keyed by the full storage key. Prefix scans use the
//! primary-key index through a half-open range on the key.

use async_trait::async_trait;
use chrono::Utc;
use memtier_core::error::PortError;
use memtier_core::memory::PersistencePort;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed key-value store.
pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    /// Open (or create) a database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful
    /// for tests); it is pinned to one connection so every query sees the
    /// same database.
    pub async fn new(path: &str) -> Result<Self, PortError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| PortError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let max_connections = if path.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| PortError::Storage(format!("Failed to open SQLite: {e}")))?;

        let backend = Self { pool };
        backend.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(backend)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, PortError> {
        let backend = Self { pool };
        backend.run_migrations().await?;
        Ok(backend)
    }

    async fn run_migrations(&self) -> Result<(), PortError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY NOT NULL,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Storage(format!("kv table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Smallest string greater than every string starting with `prefix`.
    fn prefix_upper_bound(prefix: &str) -> Option<String> {
        let mut chars: Vec<char> = prefix.chars().collect();
        while let Some(last) = chars.pop() {
            if let Some(next) = char::from_u32(last as u32 + 1) {
                chars.push(next);
                return Some(chars.into_iter().collect());
            }
        }
        None
    }
}

#[async_trait]
impl PersistencePort for SqliteKv {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn put(&self, key: &str, value: String) -> Result<(), PortError> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(&value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Storage(format!("INSERT failed: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PortError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortError::Storage(format!("SELECT failed: {e}")))?;

        row.map(|r| {
            r.try_get::<String, _>("value")
                .map_err(|e| PortError::Storage(format!("value column: {e}")))
        })
        .transpose()
    }

    async fn delete(&self, key: &str) -> Result<bool, PortError> {
        let result = sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Storage(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, PortError> {
        let rows = match Self::prefix_upper_bound(prefix) {
            Some(upper) => {
                sqlx::query("SELECT key, value FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key")
                    .bind(prefix)
                    .bind(upper)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT key, value FROM kv ORDER BY key")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| PortError::Storage(format!("Prefix scan: {e}")))?;

        rows.iter()
            .map(|row| -> Result<(String, String), PortError> {
                let key: String = row
                    .try_get("key")
                    .map_err(|e| PortError::Storage(format!("key column: {e}")))?;
                let value: String = row
                    .try_get("value")
                    .map_err(|e| PortError::Storage(format!("value column: {e}")))?;
                Ok((key, value))
            })
            .filter(|r| !matches!(r, Ok((key, _)) if !key.starts_with(prefix)))
            .collect()
    }
}
