//! Persistence port — generic durable key-value storage.
//!
//! The tiered store keeps ShortTerm and LongTerm entries, summaries and
//! tombstones behind this trait. Keys are plain strings that always start
//! with the owning scope, so backends never see cross-scope contention.
//!
//! Implementations: in-memory (testing), JSON-lines file, SQLite.

use crate::error::PortError;
use async_trait::async_trait;

/// Durable key-value store.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    /// The backend name (e.g., "sqlite", "file", "in_memory").
    fn name(&self) -> &str;

    /// Insert or replace a value.
    async fn put(&self, key: &str, value: String) -> std::result::Result<(), PortError>;

    async fn get(&self, key: &str) -> std::result::Result<Option<String>, PortError>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> std::result::Result<bool, PortError>;

    /// All `(key, value)` pairs whose key starts with `prefix`, sorted by key.
    async fn scan(&self, prefix: &str) -> std::result::Result<Vec<(String, String)>, PortError>;
}
