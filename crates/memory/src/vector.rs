//! Vector similarity and the per-scope vector index.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity
//! - Brute-force top-k search with a deterministic recency tiebreak
//!
//! Each scope has a fixed embedding dimension. Inserting or searching with a
//! vector of another length is a dimension mismatch and leaves the index
//! untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memtier_core::entry::AgentScope;
use memtier_core::error::{Error, Result};
use memtier_core::metadata::Metadata;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// A stored vector and the text it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Rank records by cosine similarity to `query`.
///
/// Sorted by descending score; ties go to the most recent `created_at`,
/// then the smaller id, so results are reproducible.
pub fn rank_by_similarity<'a>(
    records: impl IntoIterator<Item = &'a VectorRecord>,
    query: &[f32],
    k: usize,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = records
        .into_iter()
        .map(|r| SearchHit {
            id: r.id.clone(),
            text: r.text.clone(),
            score: cosine_similarity(&r.embedding, query),
            metadata: r.metadata.clone(),
            created_at: r.created_at,
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}

/// Per-scope similarity index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a record. Fails with `DimensionMismatch` when the
    /// embedding length differs from the index dimension.
    async fn insert(&self, scope: &AgentScope, record: VectorRecord) -> Result<()>;

    /// Top-k records by descending similarity.
    async fn search(&self, scope: &AgentScope, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Remove a record. Removing an unknown id is not an error.
    async fn delete(&self, scope: &AgentScope, id: &str) -> Result<()>;

    /// Number of records held for a scope.
    async fn len(&self, scope: &AgentScope) -> usize;

    /// Forget every record of a scope (the durable copy is untouched).
    async fn unload(&self, scope: &AgentScope);
}

/// Brute-force in-process index. Adequate for the few thousand long-term
/// memories a single agent accumulates.
///
/// Every scope shares the dimension of the embedder the index was built for.
pub struct InMemoryVectorIndex {
    dimension: usize,
    scopes: RwLock<HashMap<AgentScope, HashMap<String, VectorRecord>>>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            scopes: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn check_dimension(scope: &AgentScope, expected: usize, actual: usize) -> Result<()> {
        if expected != actual {
            return Err(Error::DimensionMismatch {
                scope: scope.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn insert(&self, scope: &AgentScope, record: VectorRecord) -> Result<()> {
        Self::check_dimension(scope, self.dimension, record.embedding.len())?;
        debug!(scope = %scope, id = %record.id, "Indexed vector");
        self.scopes
            .write()
            .await
            .entry(scope.clone())
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn search(&self, scope: &AgentScope, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        Self::check_dimension(scope, self.dimension, query.len())?;
        let scopes = self.scopes.read().await;
        let Some(records) = scopes.get(scope) else {
            return Ok(Vec::new());
        };
        Ok(rank_by_similarity(records.values(), query, k))
    }

    async fn delete(&self, scope: &AgentScope, id: &str) -> Result<()> {
        if let Some(records) = self.scopes.write().await.get_mut(scope) {
            records.remove(id);
        }
        Ok(())
    }

    async fn len(&self, scope: &AgentScope) -> usize {
        self.scopes
            .read()
            .await
            .get(scope)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    async fn unload(&self, scope: &AgentScope) {
        self.scopes.write().await.remove(scope);
    }
}
