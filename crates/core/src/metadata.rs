//! Tagged metadata attached to memory entries.
//!
//! Metadata is an open map, but every value carries its variant tag so
//! consumers can validate what they read. The map is append-only: a key,
//! once set, is never overwritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single tagged metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    Text(String),
    Number(f64),
    Flag(bool),
    Timestamp(DateTime<Utc>),
    Tags(Vec<String>),
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Flag(b)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Number(n)
    }
}

impl From<DateTime<Utc>> for MetadataValue {
    fn from(t: DateTime<Utc>) -> Self {
        MetadataValue::Timestamp(t)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(tags: Vec<String>) -> Self {
        MetadataValue::Tags(tags)
    }
}

/// Append-only metadata map (author, source type, tags, ...).
///
/// Backed by a `BTreeMap` so serialization order is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value if the key is not already present.
    ///
    /// Returns `false` (leaving the existing value untouched) when the key
    /// already exists.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> bool {
        let key = key.into();
        if self.0.contains_key(&key) {
            return false;
        }
        self.0.insert(key, value.into());
        true
    }

    /// Builder-style [`append`](Self::append).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.append(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(MetadataValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(MetadataValue::Flag(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_never_overwrites() {
        let mut meta = Metadata::new();
        assert!(meta.append("author", "planner"));
        assert!(!meta.append("author", "critic"));
        assert_eq!(meta.text("author"), Some("planner"));
    }

    #[test]
    fn typed_accessors_check_variant() {
        let meta = Metadata::new().with("pinned", true).with("source", "tool");
        assert_eq!(meta.flag("pinned"), Some(true));
        assert_eq!(meta.flag("source"), None);
        assert_eq!(meta.text("pinned"), None);
    }

    #[test]
    fn serializes_with_variant_tags() {
        let meta = Metadata::new()
            .with("tags", vec!["rust".to_string()])
            .with("score", 0.5);
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains(r#""type":"tags""#));
        assert!(json.contains(r#""type":"number""#));

        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
