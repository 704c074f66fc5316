//! Tiered store — Working, ShortTerm and LongTerm memory for every scope.
//!
//! | Tier | Medium | Lifetime |
//! |------|--------|----------|
//! | Working | process memory | until the session ends |
//! | ShortTerm | [`PersistencePort`] | `ttl`, then promoted or evicted |
//! | LongTerm | [`PersistencePort`] + [`VectorIndex`] | permanent |
//!
//! Summaries and eviction tombstones share the persistence port. Every key
//! starts with the (escaped) scope, so scopes never read each other's data.
//!
//! The store does not lock. Callers serialize writes per scope.

use crate::vector::{VectorIndex, VectorRecord};
use chrono::{DateTime, Utc};
use memtier_core::entry::{AgentScope, EntryFate, MemoryEntry, Tier, Tombstone};
use memtier_core::error::{Error, PortError, Result};
use memtier_core::memory::PersistencePort;
use memtier_core::provider::{EmbeddingPort, embed_checked, with_timeout};
use memtier_core::summary::Summary;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const SHORT_TERM: &str = "short_term";
const LONG_TERM: &str = "long_term";
const SUMMARY: &str = "summary";
const SUPERSEDED: &str = "superseded_summary";
const TOMBSTONE: &str = "tombstone";

/// Retention and deadline settings for the store.
#[derive(Debug, Clone)]
pub struct StorePolicy {
    pub short_term_ttl: chrono::Duration,
    pub promotion_access_threshold: u32,
    pub embedding_timeout: Duration,
    pub persistence_timeout: Duration,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            short_term_ttl: chrono::Duration::hours(1),
            promotion_access_threshold: 3,
            embedding_timeout: Duration::from_secs(5),
            persistence_timeout: Duration::from_secs(2),
        }
    }
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    /// Expired entries that were hard-deleted.
    pub evicted: Vec<String>,
    /// Expired entries that had enough accesses and moved to LongTerm.
    pub promoted: Vec<String>,
    /// Expired entries whose promotion failed; they stay ShortTerm and are
    /// retried on the next sweep.
    pub deferred: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.promoted.is_empty() && self.deferred.is_empty()
    }
}

/// Entry counts for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub working: usize,
    pub short_term: usize,
    pub long_term: usize,
    /// Summaries not yet folded into a higher-level summary.
    pub summaries: usize,
    pub superseded_summaries: usize,
    pub tombstones: usize,
}

/// Three-tier memory over a persistence port and a vector index.
pub struct TieredStore {
    persistence: Arc<dyn PersistencePort>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingPort>,
    working: RwLock<HashMap<AgentScope, Vec<MemoryEntry>>>,
    policy: StorePolicy,
}

impl TieredStore {
    pub fn new(
        persistence: Arc<dyn PersistencePort>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingPort>,
        policy: StorePolicy,
    ) -> Self {
        Self {
            persistence,
            index,
            embedder,
            working: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingPort> {
        &self.embedder
    }

    // ── Entries ──────────────────────────────────────────────────────────

    /// Store an entry in its tier.
    ///
    /// LongTerm entries without an embedding are embedded here, once. The
    /// vector index is written before the durable record so a dimension
    /// mismatch leaves nothing behind. Returns the entry as stored.
    pub async fn put(&self, mut entry: MemoryEntry) -> Result<MemoryEntry> {
        if entry.tier == Tier::LongTerm && entry.embedding.is_none() {
            entry.embedding = Some(self.embed(&entry.text).await?);
        }
        entry.validate()?;

        match entry.tier {
            Tier::Working => {
                let mut working = self.working.write().await;
                let entries = working.entry(entry.agent_scope.clone()).or_default();
                entries.retain(|e| e.id != entry.id);
                debug!(scope = %entry.agent_scope, id = %entry.id, "Stored working entry");
                entries.push(entry.clone());
            }
            Tier::ShortTerm => {
                self.write_record(&entry.agent_scope, SHORT_TERM, &entry.id, &entry)
                    .await?;
                debug!(scope = %entry.agent_scope, id = %entry.id, "Stored short-term entry");
            }
            Tier::LongTerm => {
                self.index
                    .insert(&entry.agent_scope, Self::vector_record(&entry)?)
                    .await?;
                if let Err(e) = self
                    .write_record(&entry.agent_scope, LONG_TERM, &entry.id, &entry)
                    .await
                {
                    self.index.delete(&entry.agent_scope, &entry.id).await?;
                    return Err(e);
                }
                debug!(scope = %entry.agent_scope, id = %entry.id, "Stored long-term entry");
            }
        }
        Ok(entry)
    }

    /// Look an entry up in any tier.
    pub async fn get(&self, scope: &AgentScope, id: &str) -> Result<Option<MemoryEntry>> {
        if let Some(entry) = self.working_entry(scope, id).await {
            return Ok(Some(entry));
        }
        for kind in [SHORT_TERM, LONG_TERM] {
            if let Some(entry) = self.read_record::<MemoryEntry>(scope, kind, id).await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Entries of one tier, most recent first.
    pub async fn get_recent(
        &self,
        scope: &AgentScope,
        tier: Tier,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let mut entries = self.all_in_tier(scope, tier).await?;
        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    /// Every entry of one tier, in storage order.
    pub async fn all_in_tier(&self, scope: &AgentScope, tier: Tier) -> Result<Vec<MemoryEntry>> {
        match tier {
            Tier::Working => Ok(self
                .working
                .read()
                .await
                .get(scope)
                .cloned()
                .unwrap_or_default()),
            Tier::ShortTerm => self.scan_records(scope, SHORT_TERM).await,
            Tier::LongTerm => self.scan_records(scope, LONG_TERM).await,
        }
    }

    /// Count one access for each id. Unknown ids are ignored.
    pub async fn record_access(&self, scope: &AgentScope, ids: &[String]) -> Result<()> {
        for id in ids {
            {
                let mut working = self.working.write().await;
                if let Some(entry) = working
                    .get_mut(scope)
                    .and_then(|entries| entries.iter_mut().find(|e| &e.id == id))
                {
                    entry.access_count = entry.access_count.saturating_add(1);
                    continue;
                }
            }
            for kind in [SHORT_TERM, LONG_TERM] {
                if let Some(mut entry) = self.read_record::<MemoryEntry>(scope, kind, id).await? {
                    entry.access_count = entry.access_count.saturating_add(1);
                    self.write_record(scope, kind, id, &entry).await?;
                    break;
                }
            }
        }
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Promote or evict every ShortTerm entry whose `expires_at` has passed.
    ///
    /// Entries accessed at least `promotion_access_threshold` times move to
    /// LongTerm; the rest are deleted and leave a tombstone. Cheap enough to
    /// run on every context request, and idempotent.
    pub async fn sweep_expired(&self, scope: &AgentScope, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for entry in self.scan_records::<MemoryEntry>(scope, SHORT_TERM).await? {
            if entry.tier != Tier::ShortTerm || entry.expires_at.is_none() {
                error!(scope = %scope, id = %entry.id, "Short-term record violates tier invariant");
                return Err(Error::Consistency(format!(
                    "record {} under short_term has tier {} and expires_at {:?}",
                    entry.id, entry.tier, entry.expires_at
                )));
            }
            if !entry.is_expired(now) {
                continue;
            }

            if entry.access_count >= self.policy.promotion_access_threshold {
                let id = entry.id.clone();
                match self.promote_to_long_term(entry).await {
                    Ok(_) => report.promoted.push(id),
                    Err(e) => {
                        warn!(scope = %scope, id = %id, error = %e, "Promotion failed, entry kept for next sweep");
                        report.deferred.push(id);
                    }
                }
            } else {
                let id = entry.id.clone();
                self.evict_record(entry, now).await?;
                report.evicted.push(id);
            }
        }

        if !report.is_empty() {
            info!(
                scope = %scope,
                evicted = report.evicted.len(),
                promoted = report.promoted.len(),
                deferred = report.deferred.len(),
                "Swept expired short-term entries"
            );
        }
        Ok(report)
    }

    /// Move an entry one step up the tiers.
    ///
    /// Only `Working -> ShortTerm` and `ShortTerm -> LongTerm` are allowed.
    pub async fn promote(
        &self,
        scope: &AgentScope,
        id: &str,
        from: Tier,
        to: Tier,
        now: DateTime<Utc>,
    ) -> Result<MemoryEntry> {
        match (from, to) {
            (Tier::Working, Tier::ShortTerm) => {
                let mut entry = self
                    .take_working(scope, id)
                    .await
                    .ok_or_else(|| Error::NotFound(id.to_string()))?;
                entry.tier = Tier::ShortTerm;
                entry.expires_at = Some(now + self.policy.short_term_ttl);
                if let Err(e) = self.write_record(scope, SHORT_TERM, id, &entry).await {
                    entry.tier = Tier::Working;
                    entry.expires_at = None;
                    self.working
                        .write()
                        .await
                        .entry(scope.clone())
                        .or_default()
                        .push(entry);
                    return Err(e);
                }
                debug!(scope = %scope, id = %id, "Promoted working entry to short-term");
                Ok(entry)
            }
            (Tier::ShortTerm, Tier::LongTerm) => {
                let entry = self
                    .read_record::<MemoryEntry>(scope, SHORT_TERM, id)
                    .await?
                    .ok_or_else(|| Error::NotFound(id.to_string()))?;
                self.promote_to_long_term(entry).await
            }
            _ => Err(Error::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            }),
        }
    }

    /// Administratively evict a ShortTerm entry before its TTL.
    pub async fn evict(&self, scope: &AgentScope, id: &str, now: DateTime<Utc>) -> Result<()> {
        match self.read_record::<MemoryEntry>(scope, SHORT_TERM, id).await? {
            Some(entry) => self.evict_record(entry, now).await,
            None => match self.get(scope, id).await? {
                Some(entry) => Err(Error::NotEvictable {
                    id: id.to_string(),
                    tier: entry.tier,
                }),
                None => Err(Error::NotFound(id.to_string())),
            },
        }
    }

    /// Drop every Working entry of a scope (end of session).
    pub async fn discard_working(&self, scope: &AgentScope, now: DateTime<Utc>) -> Vec<Tombstone> {
        let discarded = self.working.write().await.remove(scope).unwrap_or_default();
        if !discarded.is_empty() {
            debug!(scope = %scope, count = discarded.len(), "Discarded working memory");
        }
        discarded
            .into_iter()
            .map(|e| Tombstone {
                id: e.id,
                agent_scope: e.agent_scope,
                tier: Tier::Working,
                fate: EntryFate::Discarded,
                removed_at: now,
            })
            .collect()
    }

    /// Load a scope's LongTerm entries into the vector index.
    pub async fn hydrate(&self, scope: &AgentScope) -> Result<usize> {
        let mut loaded = 0;
        for entry in self.scan_records::<MemoryEntry>(scope, LONG_TERM).await? {
            match Self::vector_record(&entry) {
                Ok(record) => match self.index.insert(scope, record).await {
                    Ok(()) => loaded += 1,
                    Err(e) => warn!(scope = %scope, id = %entry.id, error = %e, "Skipping unindexable entry"),
                },
                Err(e) => warn!(scope = %scope, id = %entry.id, error = %e, "Skipping long-term entry"),
            }
        }
        debug!(scope = %scope, loaded, "Hydrated vector index");
        Ok(loaded)
    }

    // ── Summaries & tombstones ───────────────────────────────────────────

    /// Store a summary. The lower-level summaries it covers move to the
    /// superseded archive, so `summaries` only returns the current frontier.
    pub async fn put_summary(&self, summary: &Summary) -> Result<()> {
        summary.validate()?;
        let scope = &summary.agent_scope;
        self.write_record(scope, SUMMARY, &summary.id, summary).await?;
        if summary.level > 1 {
            for id in &summary.source_entry_ids {
                self.archive_summary(scope, id).await?;
            }
        }
        Ok(())
    }

    /// Looks in the current summaries first, then in the archive.
    pub async fn get_summary(&self, scope: &AgentScope, id: &str) -> Result<Option<Summary>> {
        match self.read_record(scope, SUMMARY, id).await? {
            Some(summary) => Ok(Some(summary)),
            None => self.read_record(scope, SUPERSEDED, id).await,
        }
    }

    /// Unsuperseded summaries of a scope, most recent first.
    pub async fn summaries(&self, scope: &AgentScope) -> Result<Vec<Summary>> {
        let mut summaries: Vec<Summary> = self.scan_records(scope, SUMMARY).await?;
        Self::sort_summaries(&mut summaries);
        Ok(summaries)
    }

    /// Every summary of a scope including superseded ones, most recent first.
    pub async fn all_summaries(&self, scope: &AgentScope) -> Result<Vec<Summary>> {
        let mut summaries: Vec<Summary> = self.scan_records(scope, SUMMARY).await?;
        let archived: Vec<Summary> = self.scan_records(scope, SUPERSEDED).await?;
        // An interrupted archive leaves a summary under both prefixes.
        for summary in archived {
            if !summaries.iter().any(|s| s.id == summary.id) {
                summaries.push(summary);
            }
        }
        Self::sort_summaries(&mut summaries);
        Ok(summaries)
    }

    pub async fn tombstone(&self, scope: &AgentScope, id: &str) -> Result<Option<Tombstone>> {
        self.read_record(scope, TOMBSTONE, id).await
    }

    pub async fn stats(&self, scope: &AgentScope) -> Result<TierStats> {
        Ok(TierStats {
            working: self
                .working
                .read()
                .await
                .get(scope)
                .map(Vec::len)
                .unwrap_or(0),
            short_term: self.kv_scan(&Self::prefix(scope, SHORT_TERM)).await?.len(),
            long_term: self.kv_scan(&Self::prefix(scope, LONG_TERM)).await?.len(),
            summaries: self.kv_scan(&Self::prefix(scope, SUMMARY)).await?.len(),
            superseded_summaries: self.kv_scan(&Self::prefix(scope, SUPERSEDED)).await?.len(),
            tombstones: self.kv_scan(&Self::prefix(scope, TOMBSTONE)).await?.len(),
        })
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Re-embed a ShortTerm entry and move it to LongTerm.
    ///
    /// Writes the LongTerm record, then the index, then deletes the
    /// ShortTerm record. Any failure undoes the earlier steps, so the entry
    /// is always in exactly one tier.
    async fn promote_to_long_term(&self, mut entry: MemoryEntry) -> Result<MemoryEntry> {
        let scope = entry.agent_scope.clone();
        let id = entry.id.clone();

        entry.embedding = Some(self.embed(&entry.text).await?);
        entry.tier = Tier::LongTerm;
        entry.expires_at = None;
        entry.validate()?;

        self.write_record(&scope, LONG_TERM, &id, &entry).await?;

        if let Err(e) = self.index.insert(&scope, Self::vector_record(&entry)?).await {
            self.kv_delete(&Self::key(&scope, LONG_TERM, &id)).await?;
            return Err(e);
        }

        if let Err(e) = self.kv_delete(&Self::key(&scope, SHORT_TERM, &id)).await {
            self.index.delete(&scope, &id).await?;
            self.kv_delete(&Self::key(&scope, LONG_TERM, &id)).await?;
            return Err(e);
        }

        info!(scope = %scope, id = %id, accesses = entry.access_count, "Promoted entry to long-term");
        Ok(entry)
    }

    /// Copy first, delete second: a crash in between leaves a duplicate
    /// that `all_summaries` collapses, never a lost summary.
    async fn archive_summary(&self, scope: &AgentScope, id: &str) -> Result<()> {
        let Some(source) = self.read_record::<Summary>(scope, SUMMARY, id).await? else {
            return Ok(());
        };
        self.write_record(scope, SUPERSEDED, id, &source).await?;
        self.kv_delete(&Self::key(scope, SUMMARY, id)).await?;
        debug!(scope = %scope, id = %id, level = source.level, "Archived superseded summary");
        Ok(())
    }

    fn sort_summaries(summaries: &mut [Summary]) {
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    async fn evict_record(&self, entry: MemoryEntry, now: DateTime<Utc>) -> Result<()> {
        let tombstone = Tombstone {
            id: entry.id.clone(),
            agent_scope: entry.agent_scope.clone(),
            tier: entry.tier,
            fate: EntryFate::Evicted,
            removed_at: now,
        };
        self.write_record(&entry.agent_scope, TOMBSTONE, &entry.id, &tombstone)
            .await?;
        self.kv_delete(&Self::key(&entry.agent_scope, SHORT_TERM, &entry.id))
            .await?;
        debug!(scope = %entry.agent_scope, id = %entry.id, "Evicted short-term entry");
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(embed_checked(self.embedder.as_ref(), text, self.policy.embedding_timeout).await?)
    }

    async fn working_entry(&self, scope: &AgentScope, id: &str) -> Option<MemoryEntry> {
        self.working
            .read()
            .await
            .get(scope)
            .and_then(|entries| entries.iter().find(|e| e.id == id).cloned())
    }

    async fn take_working(&self, scope: &AgentScope, id: &str) -> Option<MemoryEntry> {
        let mut working = self.working.write().await;
        let entries = working.get_mut(scope)?;
        let pos = entries.iter().position(|e| e.id == id)?;
        Some(entries.remove(pos))
    }

    fn vector_record(entry: &MemoryEntry) -> Result<VectorRecord> {
        let embedding = entry.embedding.clone().ok_or_else(|| {
            Error::Consistency(format!("long-term entry {} has no embedding", entry.id))
        })?;
        Ok(VectorRecord {
            id: entry.id.clone(),
            embedding,
            text: entry.text.clone(),
            metadata: entry.metadata.clone(),
            created_at: entry.created_at,
        })
    }

    /// Scope names are escaped so a `/` inside one cannot collide with
    /// another scope's key prefix.
    fn escape_scope(scope: &AgentScope) -> String {
        scope.as_str().replace('%', "%25").replace('/', "%2F")
    }

    fn prefix(scope: &AgentScope, kind: &str) -> String {
        format!("{}/{}/", Self::escape_scope(scope), kind)
    }

    fn key(scope: &AgentScope, kind: &str, id: &str) -> String {
        format!("{}{}", Self::prefix(scope, kind), id)
    }

    async fn write_record<T: serde::Serialize>(
        &self,
        scope: &AgentScope,
        kind: &str,
        id: &str,
        value: &T,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.kv_put(&Self::key(scope, kind, id), json).await
    }

    async fn read_record<T: DeserializeOwned>(
        &self,
        scope: &AgentScope,
        kind: &str,
        id: &str,
    ) -> Result<Option<T>> {
        match self.kv_get(&Self::key(scope, kind, id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn scan_records<T: DeserializeOwned>(
        &self,
        scope: &AgentScope,
        kind: &str,
    ) -> Result<Vec<T>> {
        let rows = self.kv_scan(&Self::prefix(scope, kind)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(key, json)| match serde_json::from_str(&json) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping corrupted record");
                    None
                }
            })
            .collect())
    }

    async fn kv_put(&self, key: &str, value: String) -> Result<()> {
        Ok(with_timeout(
            "persistence put",
            self.policy.persistence_timeout,
            self.persistence.put(key, value),
        )
        .await?)
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        Ok(with_timeout(
            "persistence get",
            self.policy.persistence_timeout,
            self.persistence.get(key),
        )
        .await?)
    }

    async fn kv_delete(&self, key: &str) -> Result<bool> {
        Ok(with_timeout(
            "persistence delete",
            self.policy.persistence_timeout,
            self.persistence.delete(key),
        )
        .await?)
    }

    async fn kv_scan(&self, prefix: &str) -> std::result::Result<Vec<(String, String)>, PortError> {
        with_timeout(
            "persistence scan",
            self.policy.persistence_timeout,
            self.persistence.scan(prefix),
        )
        .await
    }
}
