//! In-memory persistence — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use memtier_core::error::PortError;
use memtier_core::memory::PersistencePort;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A key-value store held in a `BTreeMap`.
/// Nothing survives the process; use it where durability isn't needed.
#[derive(Clone, Default)]
pub struct InMemoryKv {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Collect the `prefix` range of an ordered map.
pub(crate) fn scan_prefix(map: &BTreeMap<String, String>, prefix: &str) -> Vec<(String, String)> {
    map.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[async_trait]
impl PersistencePort for InMemoryKv {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn put(&self, key: &str, value: String) -> Result<(), PortError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PortError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, PortError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, String)>, PortError> {
        Ok(scan_prefix(&*self.entries.read().await, prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let kv = InMemoryKv::new();
        kv.put("a/1", "one".into()).await.unwrap();
        assert_eq!(kv.get("a/1").await.unwrap().as_deref(), Some("one"));

        assert!(kv.delete("a/1").await.unwrap());
        assert!(!kv.delete("a/1").await.unwrap());
        assert!(kv.get("a/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_replaces() {
        let kv = InMemoryKv::new();
        kv.put("k", "v1".into()).await.unwrap();
        kv.put("k", "v2".into()).await.unwrap();
        assert_eq!(kv.len().await, 1);
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn scan_only_matches_prefix() {
        let kv = InMemoryKv::new();
        kv.put("alpha/short_term/1", "x".into()).await.unwrap();
        kv.put("alpha/short_term/2", "y".into()).await.unwrap();
        kv.put("alpha/long_term/1", "z".into()).await.unwrap();
        kv.put("alphabet/short_term/1", "w".into()).await.unwrap();

        let hits = kv.scan("alpha/short_term/").await.unwrap();
        let keys: Vec<_> = hits.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["alpha/short_term/1", "alpha/short_term/2"]);
    }
}
