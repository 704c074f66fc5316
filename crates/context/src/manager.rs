//! Memory manager — the public entry point.
//!
//! Routes `store`, `get_context`, `trigger_summarization` and the
//! administrative tier calls to the tiered store, summarizer and assembler,
//! injecting configured defaults.
//!
//! # Concurrency
//!
//! Every scope has a reader-writer lock. Writes (store, promote, evict,
//! sweep, summarization) hold it exclusively. `get_context` gathers its
//! candidates under the shared side, so it sees every write committed
//! before it started and never an entry that is half evicted. Scopes never
//! contend with each other. A scope's lock is registered once and outlives
//! `close_scope`.
//!
//! Loading a scope's long-term index can fail. The scope stays usable:
//! `get_context` omits long-term candidates and retries the load on the
//! next call, and writes never wait on it.
//!
//! The expiry sweep runs on its own task: dropping a `get_context` future
//! cannot interrupt a promotion halfway.

use crate::assembler::{Candidate, ContextAssembler, Priority};
use crate::summarizer::Summarizer;
use crate::token::HeuristicCounter;
use chrono::{DateTime, Utc};
use memtier_config::{AppConfig, MemoryConfig, StorageBackend, StorageConfig};
use memtier_core::clock::{Clock, SystemClock};
use memtier_core::entry::{AgentScope, MemoryEntry, Tier, Tombstone};
use memtier_core::error::{Error, PortError, Result};
use memtier_core::memory::PersistencePort;
use memtier_core::metadata::Metadata;
use memtier_core::package::{BlockSource, ContextPackage, Degradation};
use memtier_core::provider::{EmbeddingPort, GenerationPort, embed_checked};
use memtier_core::summary::{Summary, SummarySource};
use memtier_core::tokenizer::TokenCounter;
use memtier_memory::{
    InMemoryKv, InMemoryVectorIndex, JsonlKv, SqliteKv, StorePolicy, SweepReport, TierStats,
    TieredStore, cosine_similarity,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// External collaborators the manager is built from.
pub struct ManagerPorts {
    pub persistence: Arc<dyn PersistencePort>,
    pub generator: Arc<dyn GenerationPort>,
    pub embedder: Arc<dyn EmbeddingPort>,
    pub counter: Arc<dyn TokenCounter>,
    pub clock: Arc<dyn Clock>,
}

/// Result of one `trigger_summarization` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummarizationReport {
    /// New summaries, lowest level first.
    pub created: Vec<Summary>,
    /// Ids left unsummarized because their window failed.
    pub retained_raw: Vec<String>,
}

/// Lock and index state of one scope.
#[derive(Default)]
struct ScopeState {
    lock: Arc<RwLock<()>>,
    /// Whether the long-term index holds the scope's persisted entries.
    hydrated: AtomicBool,
}

pub struct MemoryManager {
    store: Arc<TieredStore>,
    summarizer: Summarizer,
    assembler: ContextAssembler,
    clock: Arc<dyn Clock>,
    config: MemoryConfig,
    embedding_timeout: Duration,
    scopes: Mutex<HashMap<AgentScope, Arc<ScopeState>>>,
}

impl MemoryManager {
    /// Build a manager from configuration and explicit ports.
    pub fn new(config: &AppConfig, ports: ManagerPorts) -> Result<Self> {
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        let m = &config.memory;
        if ports.embedder.dimension() != m.embedding_dimension {
            return Err(Error::Config {
                message: format!(
                    "embedder {} returns {}-dimensional vectors but embedding_dimension is {}",
                    ports.embedder.name(),
                    ports.embedder.dimension(),
                    m.embedding_dimension
                ),
            });
        }

        let short_term_ttl =
            chrono::Duration::from_std(m.short_term_ttl()).map_err(|e| Error::Config {
                message: format!("short_term_ttl_seconds out of range: {e}"),
            })?;
        let policy = StorePolicy {
            short_term_ttl,
            promotion_access_threshold: m.promotion_access_threshold,
            embedding_timeout: config.timeouts.embedding(),
            persistence_timeout: config.timeouts.persistence(),
        };

        let index = Arc::new(InMemoryVectorIndex::new(m.embedding_dimension));
        let store = Arc::new(TieredStore::new(
            ports.persistence,
            index,
            ports.embedder,
            policy,
        ));

        Ok(Self {
            store,
            summarizer: Summarizer::new(
                ports.generator,
                m.window_size,
                m.overlap,
                config.timeouts.generation(),
            ),
            assembler: ContextAssembler::new(ports.counter, m.min_fragment_tokens, m.relevance_floor),
            clock: ports.clock,
            config: m.clone(),
            embedding_timeout: config.timeouts.embedding(),
            scopes: Mutex::new(HashMap::new()),
        })
    }

    /// Build a manager with the configured storage backend and providers,
    /// the heuristic token counter and the system clock.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let models = memtier_providers::build_from_config(config)?;
        let persistence = open_persistence(&config.storage).await?;
        Self::new(
            config,
            ManagerPorts {
                persistence,
                generator: models.generator,
                embedder: models.embedder,
                counter: Arc::new(HeuristicCounter::new(config.memory.chars_per_token)),
                clock: Arc::new(SystemClock),
            },
        )
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    // ── Scope lifecycle ──────────────────────────────────────────────────

    /// Load a scope's long-term memories into the vector index.
    /// `get_context` loads its scope on first use.
    pub async fn open_scope(&self, scope: &AgentScope) -> Result<()> {
        let state = self.scope_state(scope).await;
        self.ensure_hydrated(scope, &state).await
    }

    /// Discard the scope's working memory and unload its index. Durable
    /// tiers are untouched. Returns the discarded working ids.
    ///
    /// The scope keeps its lock, so callers already holding it stay
    /// serialized with later ones.
    pub async fn close_scope(&self, scope: &AgentScope) -> Result<Vec<String>> {
        let Some(state) = self.scopes.lock().await.get(scope).cloned() else {
            return Ok(Vec::new());
        };
        let _write = state.lock.write().await;
        let discarded = self.store.discard_working(scope, self.clock.now()).await;
        self.store.index().unload(scope).await;
        state.hydrated.store(false, Ordering::Release);
        info!(scope = %scope, discarded = discarded.len(), "Closed scope");
        Ok(discarded.into_iter().map(|t| t.id).collect())
    }

    async fn scope_state(&self, scope: &AgentScope) -> Arc<ScopeState> {
        self.scopes
            .lock()
            .await
            .entry(scope.clone())
            .or_default()
            .clone()
    }

    /// Load the scope's long-term index unless it is loaded already. A
    /// failed load leaves the scope unloaded and the next call retries.
    async fn ensure_hydrated(&self, scope: &AgentScope, state: &ScopeState) -> Result<()> {
        if state.hydrated.load(Ordering::Acquire) {
            return Ok(());
        }
        let _write = state.lock.write().await;
        if state.hydrated.load(Ordering::Acquire) {
            return Ok(());
        }
        let loaded = self.store.hydrate(scope).await?;
        state.hydrated.store(true, Ordering::Release);
        info!(scope = %scope, long_term = loaded, "Opened scope");
        Ok(())
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Store a new entry. `tier_hint` defaults to ShortTerm.
    pub async fn store(
        &self,
        scope: &AgentScope,
        text: impl Into<String>,
        metadata: Metadata,
        tier_hint: Option<Tier>,
    ) -> Result<MemoryEntry> {
        let tier = tier_hint.unwrap_or(Tier::ShortTerm);
        let state = self.scope_state(scope).await;

        let stored = {
            let _write = state.lock.write().await;
            let now = self.clock.now();
            let entry = match tier {
                Tier::Working => MemoryEntry::working(scope.clone(), text, now),
                Tier::ShortTerm => MemoryEntry::short_term(
                    scope.clone(),
                    text,
                    now,
                    now + self.store.policy().short_term_ttl,
                ),
                Tier::LongTerm => MemoryEntry {
                    tier: Tier::LongTerm,
                    ..MemoryEntry::working(scope.clone(), text, now)
                },
            }
            .with_metadata(metadata);
            self.store.put(entry).await?
        };
        debug!(scope = %scope, id = %stored.id, tier = %stored.tier, "Stored entry");

        if self.config.auto_summarize && tier != Tier::Working {
            self.maybe_auto_summarize(scope, &state.lock).await;
        }
        Ok(stored)
    }

    async fn maybe_auto_summarize(&self, scope: &AgentScope, lock: &RwLock<()>) {
        let uncovered = {
            let _read = lock.read().await;
            match self.uncovered_raw(scope).await {
                Ok(raw) => raw.len(),
                Err(e) => {
                    warn!(scope = %scope, error = %e, "Could not count unsummarized entries");
                    return;
                }
            }
        };
        if uncovered <= self.config.summarization_trigger_count {
            return;
        }
        info!(scope = %scope, uncovered, "Summarization threshold crossed");
        if let Err(e) = self.trigger_summarization(scope).await {
            warn!(scope = %scope, error = %e, "Automatic summarization failed");
        }
    }

    /// Move an entry one tier up (`Working -> ShortTerm -> LongTerm`).
    pub async fn promote(
        &self,
        scope: &AgentScope,
        id: &str,
        from: Tier,
        to: Tier,
    ) -> Result<MemoryEntry> {
        let state = self.scope_state(scope).await;
        let _write = state.lock.write().await;
        self.store.promote(scope, id, from, to, self.clock.now()).await
    }

    /// Evict a ShortTerm entry now, leaving a tombstone.
    pub async fn evict(&self, scope: &AgentScope, id: &str) -> Result<()> {
        let state = self.scope_state(scope).await;
        let _write = state.lock.write().await;
        self.store.evict(scope, id, self.clock.now()).await
    }

    /// Promote or evict every expired ShortTerm entry.
    pub async fn sweep_expired(&self, scope: &AgentScope) -> Result<SweepReport> {
        let state = self.scope_state(scope).await;
        self.run_sweep(scope, state.lock.clone()).await
    }

    /// End the scope's session: discard all Working entries.
    pub async fn end_session(&self, scope: &AgentScope) -> Result<Vec<String>> {
        let state = self.scope_state(scope).await;
        let _write = state.lock.write().await;
        let discarded = self.store.discard_working(scope, self.clock.now()).await;
        Ok(discarded.into_iter().map(|t| t.id).collect())
    }

    /// Runs on a spawned task that owns the write guard, so the sweep
    /// finishes even if the caller goes away.
    async fn run_sweep(&self, scope: &AgentScope, lock: Arc<RwLock<()>>) -> Result<SweepReport> {
        let store = self.store.clone();
        let scope = scope.clone();
        let now = self.clock.now();
        tokio::spawn(async move {
            let _write = lock.write_owned().await;
            store.sweep_expired(&scope, now).await
        })
        .await
        .map_err(|e| Error::Consistency(format!("sweep task failed: {e}")))?
    }

    // ── Summarization ────────────────────────────────────────────────────

    /// Summarize raw entries not yet covered by a level-1 summary, then
    /// escalate any level holding `summarization_trigger_count` or more
    /// unsuperseded summaries.
    pub async fn trigger_summarization(&self, scope: &AgentScope) -> Result<SummarizationReport> {
        let state = self.scope_state(scope).await;
        let _write = state.lock.write().await;
        let now = self.clock.now();
        let mut report = SummarizationReport::default();

        let raw: Vec<SummarySource> = self
            .uncovered_raw(scope)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
        self.summarize_and_store(scope, &raw, now, &mut report).await?;

        let threshold = self.config.summarization_trigger_count.max(2);
        let mut level = 1;
        loop {
            let pending: Vec<SummarySource> = self
                .unsuperseded_at(scope, level)
                .await?
                .into_iter()
                .map(Into::into)
                .collect();
            if pending.len() < threshold {
                break;
            }
            let produced = self.summarize_and_store(scope, &pending, now, &mut report).await?;
            if produced == 0 || produced >= pending.len() {
                break;
            }
            level += 1;
        }

        info!(
            scope = %scope,
            created = report.created.len(),
            retained_raw = report.retained_raw.len(),
            "Summarization complete"
        );
        Ok(report)
    }

    async fn summarize_and_store(
        &self,
        scope: &AgentScope,
        inputs: &[SummarySource],
        now: DateTime<Utc>,
        report: &mut SummarizationReport,
    ) -> Result<usize> {
        let outcome = self.summarizer.summarize(scope, inputs, now).await?;
        for id in outcome.failed_windows.into_iter().flatten() {
            if !report.retained_raw.contains(&id) {
                report.retained_raw.push(id);
            }
        }

        let produced = outcome.summaries.len();
        for mut summary in outcome.summaries {
            match embed_checked(
                self.store.embedder().as_ref(),
                &summary.text,
                self.embedding_timeout,
            )
            .await
            {
                Ok(vector) => summary.embedding = Some(vector),
                Err(e) => {
                    warn!(scope = %scope, id = %summary.id, error = %e, "Storing summary without embedding")
                }
            }
            self.store.put_summary(&summary).await?;
            report.created.push(summary);
        }
        Ok(produced)
    }

    /// Raw ShortTerm and LongTerm entries no level-1 summary covers,
    /// oldest first. Superseded level-1 summaries still count as coverage.
    async fn uncovered_raw(&self, scope: &AgentScope) -> Result<Vec<MemoryEntry>> {
        let covered: HashSet<String> = self
            .store
            .all_summaries(scope)
            .await?
            .into_iter()
            .filter(|s| s.level == 1)
            .flat_map(|s| s.source_entry_ids)
            .collect();

        let mut raw = self.store.all_in_tier(scope, Tier::ShortTerm).await?;
        raw.extend(self.store.all_in_tier(scope, Tier::LongTerm).await?);
        raw.retain(|e| !covered.contains(&e.id));
        raw.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(raw)
    }

    /// Level-`level` summaries not yet folded into a higher level, oldest first.
    async fn unsuperseded_at(&self, scope: &AgentScope, level: u32) -> Result<Vec<Summary>> {
        let mut pending: Vec<Summary> = self
            .store
            .summaries(scope)
            .await?
            .into_iter()
            .filter(|s| s.level == level)
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Assemble the context package for `query` within `budget` tokens
    /// (`token_budget_default` when `None`).
    ///
    /// Only fails on internal inconsistency or when the working tier itself
    /// is unreadable; every other failure degrades the package and is
    /// listed in `degraded`.
    pub async fn get_context(
        &self,
        scope: &AgentScope,
        query: &str,
        budget: Option<usize>,
    ) -> Result<ContextPackage> {
        let budget = budget.unwrap_or(self.config.token_budget_default);
        let state = self.scope_state(scope).await;
        let mut degraded = Vec::new();

        let index_loaded = match self.ensure_hydrated(scope, &state).await {
            Ok(()) => true,
            Err(e) => {
                warn!(scope = %scope, error = %e, "Long-term index not loaded");
                degraded.push(Degradation::LongTermOmitted {
                    reason: format!("long-term index not loaded: {e}"),
                });
                false
            }
        };

        let expired = match self.run_sweep(scope, state.lock.clone()).await {
            Ok(report) => report.evicted,
            Err(e @ Error::Consistency(_)) => {
                error!(scope = %scope, error = %e, "Sweep found inconsistent state");
                return Err(e);
            }
            Err(e) => {
                warn!(scope = %scope, error = %e, "Sweep skipped");
                degraded.push(Degradation::SweepSkipped {
                    reason: e.to_string(),
                });
                Vec::new()
            }
        };

        let candidates = {
            let _read = state.lock.read().await;
            self.gather(scope, query, index_loaded, &mut degraded).await?
        };

        let mut package = self.assembler.assemble(budget, candidates, &expired);
        package.degraded = degraded;

        let served: Vec<String> = package
            .ordered_blocks
            .iter()
            .filter(|b| b.source != BlockSource::Summary)
            .map(|b| b.source_id.clone())
            .collect();
        if !served.is_empty() {
            let _write = state.lock.write().await;
            if let Err(e) = self.store.record_access(scope, &served).await {
                warn!(scope = %scope, error = %e, "Access counts not updated");
            }
        }

        info!(
            scope = %scope,
            blocks = package.ordered_blocks.len(),
            dropped = package.dropped.len(),
            tokens = package.total_tokens,
            budget,
            degraded = package.degraded.len(),
            "Assembled context"
        );
        Ok(package)
    }

    /// Pull candidates from every tier concurrently. The index is only
    /// searched when `index_loaded`; the query is embedded either way so
    /// summaries can still be scored.
    async fn gather(
        &self,
        scope: &AgentScope,
        query: &str,
        index_loaded: bool,
        degraded: &mut Vec<Degradation>,
    ) -> Result<Vec<Candidate>> {
        let now = self.clock.now();
        let long_term = async {
            match embed_checked(self.store.embedder().as_ref(), query, self.embedding_timeout).await
            {
                Ok(q) if index_loaded => {
                    let hits = self
                        .store
                        .index()
                        .search(scope, &q, self.config.long_term_top_k)
                        .await;
                    (Some(q), Some(hits))
                }
                Ok(q) => (Some(q), None),
                Err(e) => (None, index_loaded.then(|| Err(Error::from(e)))),
            }
        };

        let (working, short_term, (query_vector, hits), summaries) = tokio::join!(
            self.store.all_in_tier(scope, Tier::Working),
            self.store
                .get_recent(scope, Tier::ShortTerm, self.config.short_term_candidates),
            long_term,
            self.store.summaries(scope),
        );

        let mut candidates: Vec<Candidate> = working?
            .into_iter()
            .map(|e| Candidate {
                source_id: e.id,
                source: BlockSource::Working,
                text: e.text,
                priority: Priority::Pinned,
                created_at: e.created_at,
            })
            .collect();

        match short_term {
            Ok(entries) => candidates.extend(entries.into_iter().map(|e| Candidate {
                priority: Priority::Recency(self.recency(e.created_at, now)),
                source_id: e.id,
                source: BlockSource::ShortTerm,
                text: e.text,
                created_at: e.created_at,
            })),
            Err(e @ Error::Consistency(_)) => return Err(e),
            Err(e) => {
                warn!(scope = %scope, error = %e, "Omitting short-term candidates");
                degraded.push(Degradation::ShortTermOmitted {
                    reason: e.to_string(),
                });
            }
        }

        match hits {
            Some(Ok(hits)) => candidates.extend(hits.into_iter().map(|h| Candidate {
                source_id: h.id,
                source: BlockSource::LongTerm,
                text: h.text,
                priority: Priority::Similarity(h.score),
                created_at: h.created_at,
            })),
            Some(Err(e)) => {
                warn!(scope = %scope, error = %e, "Omitting long-term candidates");
                degraded.push(Degradation::LongTermOmitted {
                    reason: e.to_string(),
                });
            }
            None => {}
        }

        match summaries {
            Ok(summaries) => {
                candidates.extend(self.summary_candidates(summaries, query_vector.as_deref(), degraded))
            }
            Err(e @ Error::Consistency(_)) => return Err(e),
            Err(e) => {
                warn!(scope = %scope, error = %e, "Omitting summaries");
                degraded.push(Degradation::SummariesOmitted {
                    reason: e.to_string(),
                });
            }
        }

        Ok(candidates)
    }

    /// `1 - age / ttl`, clamped to `[0, 1]`.
    fn recency(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let ttl = self.config.short_term_ttl_seconds as f64;
        let age = (now - created_at).num_milliseconds() as f64 / 1000.0;
        (1.0 - age / ttl).clamp(0.0, 1.0)
    }

    /// The most recent unsuperseded summaries, scored against the query.
    fn summary_candidates(
        &self,
        summaries: Vec<Summary>,
        query: Option<&[f32]>,
        degraded: &mut Vec<Degradation>,
    ) -> Vec<Candidate> {
        let boost = self.config.summary_priority_boost;

        let mut unscored = 0usize;
        let candidates: Vec<Candidate> = summaries
            .into_iter()
            .take(self.config.summary_candidates)
            .map(|s| {
                let priority = match (query, s.embedding.as_deref()) {
                    (Some(q), Some(e)) if q.len() == e.len() => Priority::Boosted {
                        similarity: cosine_similarity(q, e),
                        boost,
                    },
                    _ => {
                        unscored += 1;
                        Priority::Unscored
                    }
                };
                Candidate {
                    source_id: s.id,
                    source: BlockSource::Summary,
                    text: s.text,
                    priority,
                    created_at: s.created_at,
                }
            })
            .collect();

        if unscored > 0 {
            degraded.push(Degradation::SummariesUnscored {
                reason: format!("{unscored} summaries ranked at the relevance floor"),
            });
        }
        candidates
    }

    /// Read one entry from any tier. Counts as an access.
    pub async fn get_entry(&self, scope: &AgentScope, id: &str) -> Result<Option<MemoryEntry>> {
        let state = self.scope_state(scope).await;
        let _write = state.lock.write().await;
        let Some(mut entry) = self.store.get(scope, id).await? else {
            return Ok(None);
        };
        self.store
            .record_access(scope, std::slice::from_ref(&entry.id))
            .await?;
        entry.access_count = entry.access_count.saturating_add(1);
        Ok(Some(entry))
    }

    pub async fn summaries(&self, scope: &AgentScope) -> Result<Vec<Summary>> {
        let state = self.scope_state(scope).await;
        let _read = state.lock.read().await;
        self.store.summaries(scope).await
    }

    /// A summary by id, superseded ones included.
    pub async fn get_summary(&self, scope: &AgentScope, id: &str) -> Result<Option<Summary>> {
        let state = self.scope_state(scope).await;
        let _read = state.lock.read().await;
        self.store.get_summary(scope, id).await
    }

    pub async fn tombstone(&self, scope: &AgentScope, id: &str) -> Result<Option<Tombstone>> {
        let state = self.scope_state(scope).await;
        let _read = state.lock.read().await;
        self.store.tombstone(scope, id).await
    }

    pub async fn stats(&self, scope: &AgentScope) -> Result<TierStats> {
        let state = self.scope_state(scope).await;
        let _read = state.lock.read().await;
        self.store.stats(scope).await
    }
}

/// Open the configured durable backend.
async fn open_persistence(storage: &StorageConfig) -> Result<Arc<dyn PersistencePort>> {
    let persistence: Arc<dyn PersistencePort> = match storage.backend {
        StorageBackend::Memory => Arc::new(InMemoryKv::new()),
        StorageBackend::File => Arc::new(JsonlKv::new(storage.resolved_path())),
        StorageBackend::Sqlite => {
            let path = storage.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PortError::Storage(format!("Failed to create {}: {e}", parent.display()))
                })?;
            }
            Arc::new(SqliteKv::new(&format!("sqlite://{}", path.display())).await?)
        }
    };
    debug!(backend = persistence.name(), "Persistence ready");
    Ok(persistence)
}
