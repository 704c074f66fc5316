//! End-to-end tests for the memtier memory manager.
//!
//! These drive `MemoryManager` through its public API with scripted model
//! ports and a manual clock, from `store` through sweeping, summarization
//! and context assembly.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use memtier_config::{AppConfig, MemoryConfig, StorageBackend};
use memtier_context::{HeuristicCounter, ManagerPorts, MemoryManager};
use memtier_core::clock::ManualClock;
use memtier_core::entry::{AgentScope, EntryFate, Tier};
use memtier_core::error::{Error, PortError};
use memtier_core::metadata::Metadata;
use memtier_core::package::{Degradation, DropReason};
use memtier_core::provider::{EmbeddingPort, GenerationPort};
use memtier_memory::InMemoryKv;

// ── Mock Ports ───────────────────────────────────────────────────────────

/// Answers every prompt with a numbered digest and counts the calls.
struct ScriptedGenerator {
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl GenerationPort for ScriptedGenerator {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn generate(&self, prompt: &str, _system: &str, _timeout: Duration) -> Result<String, PortError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let items = prompt.lines().filter(|l| l.starts_with("- ")).count();
        Ok(format!("Digest {n} covering {items} items."))
    }
}

/// Provider that is always down.
struct FailingGenerator;

#[async_trait::async_trait]
impl GenerationPort for FailingGenerator {
    fn name(&self) -> &str {
        "e2e_failing"
    }

    async fn generate(&self, _prompt: &str, _system: &str, _timeout: Duration) -> Result<String, PortError> {
        Err(PortError::Provider("503 Service Unavailable".into()))
    }
}

/// Four-dimensional keyword embedder: deterministic and easy to reason about.
struct KeywordEmbedder {
    down: bool,
}

const KEYWORDS: [&str; 3] = ["billing", "deploy", "weather"];

#[async_trait::async_trait]
impl EmbeddingPort for KeywordEmbedder {
    fn name(&self) -> &str {
        "e2e_keywords"
    }

    fn dimension(&self) -> usize {
        4
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PortError> {
        if self.down {
            return Err(PortError::Timeout {
                operation: "embed".into(),
                timeout_ms: 5000,
            });
        }
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = KEYWORDS
            .iter()
            .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
            .collect();
        v.push(0.1);
        Ok(v)
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Setup {
    manager: MemoryManager,
    clock: Arc<ManualClock>,
    generator: Arc<ScriptedGenerator>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn base_config(tweak: impl FnOnce(&mut MemoryConfig)) -> AppConfig {
    let mut config = AppConfig::default();
    config.memory.embedding_dimension = 4;
    config.memory.auto_summarize = false;
    config.memory.relevance_floor = 0.0;
    config.memory.short_term_ttl_seconds = 300;
    tweak(&mut config.memory);
    config
}

fn setup_with(
    config: AppConfig,
    generator: Option<Arc<dyn GenerationPort>>,
    embedder_down: bool,
) -> Setup {
    let clock = Arc::new(ManualClock::new(t0()));
    let scripted = Arc::new(ScriptedGenerator::new());
    let generator = generator.unwrap_or_else(|| scripted.clone() as Arc<dyn GenerationPort>);
    let manager = MemoryManager::new(
        &config,
        ManagerPorts {
            persistence: Arc::new(InMemoryKv::new()),
            generator,
            embedder: Arc::new(KeywordEmbedder { down: embedder_down }),
            counter: Arc::new(HeuristicCounter::new(4)),
            clock: clock.clone(),
        },
    )
    .expect("valid config");
    Setup {
        manager,
        clock,
        generator: scripted,
    }
}

fn setup(tweak: impl FnOnce(&mut MemoryConfig)) -> Setup {
    setup_with(base_config(tweak), None, false)
}

fn scope() -> AgentScope {
    AgentScope::new("e2e-agent")
}

/// Text the heuristic counter scores at exactly `tokens` tokens.
fn text_of(tokens: usize, tag: &str) -> String {
    let mut text = format!("{tag} ");
    while text.len() < tokens * 4 {
        text.push('x');
    }
    text
}

// ═══════════════════════════════════════════════════════════════════════
// Scenarios
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn e2e_working_entries_fit_the_budget() {
    let s = setup(|_| {});
    let mut ids = Vec::new();
    for i in 0..3 {
        let entry = s
            .manager
            .store(&scope(), text_of(100, &format!("step{i}")), Metadata::new(), Some(Tier::Working))
            .await
            .unwrap();
        ids.push(entry.id);
    }

    let pkg = s.manager.get_context(&scope(), "what next", Some(1000)).await.unwrap();
    assert_eq!(pkg.ordered_blocks.len(), 3);
    assert!(pkg.dropped.is_empty());
    assert_eq!(pkg.total_tokens, 300);
    for id in &ids {
        assert!(pkg.contains(id));
    }
}

#[tokio::test]
async fn e2e_oversized_entry_is_truncated_when_fragment_is_allowed() {
    let s = setup(|m| m.min_fragment_tokens = 50);
    let entry = s
        .manager
        .store(&scope(), text_of(2000, "transcript"), Metadata::new(), None)
        .await
        .unwrap();

    let pkg = s.manager.get_context(&scope(), "summary please", Some(500)).await.unwrap();
    assert_eq!(pkg.ordered_blocks.len(), 1);
    let block = &pkg.ordered_blocks[0];
    assert_eq!(block.source_id, entry.id);
    assert!(block.truncated);
    assert_eq!(block.token_count, 500);
    assert_eq!(pkg.total_tokens, 500);
    assert!(pkg.dropped.is_empty());
}

#[tokio::test]
async fn e2e_oversized_entry_is_dropped_when_fragment_too_small() {
    let s = setup(|m| m.min_fragment_tokens = 600);
    let entry = s
        .manager
        .store(&scope(), text_of(2000, "transcript"), Metadata::new(), None)
        .await
        .unwrap();

    let pkg = s.manager.get_context(&scope(), "summary please", Some(500)).await.unwrap();
    assert!(pkg.ordered_blocks.is_empty());
    assert_eq!(pkg.total_tokens, 0);
    assert_eq!(
        pkg.dropped_with(DropReason::OverBudget).collect::<Vec<_>>(),
        vec![entry.id.as_str()]
    );
}

#[tokio::test]
async fn e2e_unaccessed_entry_expires_instead_of_promoting() {
    let s = setup(|_| {});
    let entry = s
        .manager
        .store(&scope(), "It might rain in the afternoon, weather says.", Metadata::new(), None)
        .await
        .unwrap();

    s.clock.advance(chrono::Duration::seconds(301));
    let pkg = s.manager.get_context(&scope(), "weather", None).await.unwrap();

    assert!(!pkg.contains(&entry.id));
    assert_eq!(pkg.dropped_with(DropReason::Expired).collect::<Vec<_>>(), vec![entry.id.as_str()]);
    let tombstone = s.manager.tombstone(&scope(), &entry.id).await.unwrap().unwrap();
    assert_eq!(tombstone.fate, EntryFate::Evicted);
    assert_eq!(tombstone.tier, Tier::ShortTerm);

    let stats = s.manager.stats(&scope()).await.unwrap();
    assert_eq!((stats.short_term, stats.long_term), (0, 0));
}

#[tokio::test]
async fn e2e_ten_entries_make_three_overlapping_summaries() {
    let s = setup(|m| {
        m.window_size = 4;
        m.overlap = 1;
    });
    let mut ids = Vec::new();
    for i in 0..10 {
        let entry = s
            .manager
            .store(&scope(), format!("Observation {i}."), Metadata::new(), None)
            .await
            .unwrap();
        ids.push(entry.id);
        s.clock.advance(chrono::Duration::seconds(1));
    }

    let report = s.manager.trigger_summarization(&scope()).await.unwrap();
    assert_eq!(report.created.len(), 3);
    assert!(report.retained_raw.is_empty());
    assert_eq!(s.generator.calls(), 3);

    let mut windows: Vec<Vec<String>> = report
        .created
        .iter()
        .map(|summary| {
            assert_eq!(summary.level, 1);
            assert_eq!(summary.source_entry_ids.len(), 4);
            summary.source_entry_ids.clone()
        })
        .collect();
    windows.sort_by_key(|w| ids.iter().position(|id| id == &w[0]));
    assert_eq!(windows[0], ids[0..4].to_vec());
    assert_eq!(windows[1], ids[3..7].to_vec());
    assert_eq!(windows[2], ids[6..10].to_vec());

    // Summarization never deletes its sources
    assert_eq!(s.manager.stats(&scope()).await.unwrap().short_term, 10);
}

// ═══════════════════════════════════════════════════════════════════════
// Properties
// ═══════════════════════════════════════════════════════════════════════

async fn mixed_scope(s: &Setup) -> Vec<String> {
    let mut ids = Vec::new();
    for (i, tokens) in [30, 80, 5, 120, 45, 200].into_iter().enumerate() {
        let tier = match i % 3 {
            0 => Tier::Working,
            1 => Tier::ShortTerm,
            _ => Tier::LongTerm,
        };
        let tag = KEYWORDS[i % KEYWORDS.len()];
        let entry = s
            .manager
            .store(&scope(), text_of(tokens, tag), Metadata::new(), Some(tier))
            .await
            .unwrap();
        ids.push(entry.id);
        s.clock.advance(chrono::Duration::seconds(10));
    }
    ids
}

#[tokio::test]
async fn e2e_budget_is_never_exceeded() {
    let s = setup(|m| {
        m.min_fragment_tokens = 10;
        m.relevance_floor = -1.0;
    });
    mixed_scope(&s).await;

    for budget in [0, 1, 9, 10, 64, 150, 333, 1000] {
        let pkg = s.manager.get_context(&scope(), "billing deploy", Some(budget)).await.unwrap();
        let sum: usize = pkg.ordered_blocks.iter().map(|b| b.token_count).sum();
        assert_eq!(sum, pkg.total_tokens);
        assert!(pkg.total_tokens <= budget, "budget {budget} exceeded: {}", pkg.total_tokens);
    }
}

#[tokio::test]
async fn e2e_every_candidate_is_included_or_explained() {
    let s = setup(|m| m.relevance_floor = 0.5);
    let ids = mixed_scope(&s).await;

    let pkg = s.manager.get_context(&scope(), "billing", Some(150)).await.unwrap();
    for id in &ids {
        let placed = pkg.contains(id) || pkg.dropped.iter().any(|d| &d.source_id == id);
        assert!(placed, "{id} silently lost");
    }
    assert!(pkg.dropped_with(DropReason::LowRelevance).count() > 0);
}

#[tokio::test]
async fn e2e_assembly_is_deterministic() {
    let s = setup(|m| m.relevance_floor = -1.0);
    mixed_scope(&s).await;

    let first = s.manager.get_context(&scope(), "deploy", Some(200)).await.unwrap();
    let second = s.manager.get_context(&scope(), "deploy", Some(200)).await.unwrap();
    assert_eq!(first.ordered_blocks, second.ordered_blocks);
    assert_eq!(first.dropped, second.dropped);
}

#[tokio::test]
async fn e2e_tiers_only_move_up() {
    let s = setup(|_| {});
    let lt = s
        .manager
        .store(&scope(), "billing is monthly", Metadata::new(), Some(Tier::LongTerm))
        .await
        .unwrap();
    let err = s
        .manager
        .promote(&scope(), &lt.id, Tier::LongTerm, Tier::ShortTerm)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    let w = s
        .manager
        .store(&scope(), "scratch", Metadata::new(), Some(Tier::Working))
        .await
        .unwrap();
    let err = s
        .manager
        .promote(&scope(), &w.id, Tier::Working, Tier::LongTerm)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    let st = s
        .manager
        .promote(&scope(), &w.id, Tier::Working, Tier::ShortTerm)
        .await
        .unwrap();
    assert_eq!(st.tier, Tier::ShortTerm);
    assert_eq!(st.expires_at, Some(t0() + chrono::Duration::seconds(300)));

    let lt = s
        .manager
        .promote(&scope(), &w.id, Tier::ShortTerm, Tier::LongTerm)
        .await
        .unwrap();
    assert_eq!(lt.tier, Tier::LongTerm);
    assert!(lt.embedding.is_some());
}

#[tokio::test]
async fn e2e_summary_sources_always_resolve() {
    let s = setup(|m| {
        m.window_size = 2;
        m.overlap = 0;
    });
    for i in 0..4 {
        s.manager
            .store(&scope(), format!("Deploy note {i}."), Metadata::new(), None)
            .await
            .unwrap();
    }
    let report = s.manager.trigger_summarization(&scope()).await.unwrap();
    assert_eq!(report.created.len(), 2);

    // Every source expires and is evicted
    s.clock.advance(chrono::Duration::seconds(600));
    let sweep = s.manager.sweep_expired(&scope()).await.unwrap();
    assert_eq!(sweep.evicted.len(), 4);

    for summary in s.manager.summaries(&scope()).await.unwrap() {
        for id in &summary.source_entry_ids {
            let tombstoned = s.manager.tombstone(&scope(), id).await.unwrap().is_some();
            let live = s.manager.get_entry(&scope(), id).await.unwrap().is_some();
            assert!(tombstoned || live, "{id} does not resolve");
        }
    }
}

#[tokio::test]
async fn e2e_sweep_is_idempotent() {
    let s = setup(|m| m.promotion_access_threshold = 1);
    let kept = s
        .manager
        .store(&scope(), "billing cycle starts on the 1st", Metadata::new(), None)
        .await
        .unwrap();
    s.manager
        .store(&scope(), "passing remark", Metadata::new(), None)
        .await
        .unwrap();
    s.manager.get_entry(&scope(), &kept.id).await.unwrap();

    s.clock.advance(chrono::Duration::seconds(301));
    let first = s.manager.sweep_expired(&scope()).await.unwrap();
    assert_eq!(first.promoted, vec![kept.id.clone()]);
    assert_eq!(first.evicted.len(), 1);

    let second = s.manager.sweep_expired(&scope()).await.unwrap();
    assert!(second.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
// Degradation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn e2e_failed_summarization_keeps_entries_raw() {
    let s = setup_with(base_config(|_| {}), Some(Arc::new(FailingGenerator)), false);
    let mut ids = Vec::new();
    for i in 0..3 {
        let entry = s
            .manager
            .store(&scope(), format!("Fact {i}."), Metadata::new(), None)
            .await
            .unwrap();
        ids.push(entry.id);
    }

    let report = s.manager.trigger_summarization(&scope()).await.unwrap();
    assert!(report.created.is_empty());
    let mut retained = report.retained_raw.clone();
    retained.sort();
    ids.sort();
    assert_eq!(retained, ids);

    let pkg = s.manager.get_context(&scope(), "facts", None).await.unwrap();
    for id in &ids {
        assert!(pkg.contains(id));
    }
}

#[tokio::test]
async fn e2e_embedding_outage_still_serves_recent_memory() {
    let s = setup_with(base_config(|_| {}), None, true);
    let w = s
        .manager
        .store(&scope(), "current goal: fix billing", Metadata::new(), Some(Tier::Working))
        .await
        .unwrap();
    let st = s
        .manager
        .store(&scope(), "user mentioned an invoice", Metadata::new(), None)
        .await
        .unwrap();
    s.manager.trigger_summarization(&scope()).await.unwrap();

    let pkg = s.manager.get_context(&scope(), "billing", None).await.unwrap();
    assert!(pkg.contains(&w.id));
    assert!(pkg.contains(&st.id));
    assert!(pkg.degraded.iter().any(|d| matches!(d, Degradation::LongTermOmitted { .. })));
    assert!(pkg.degraded.iter().any(|d| matches!(d, Degradation::SummariesUnscored { .. })));
}

#[tokio::test]
async fn e2e_scopes_are_isolated() {
    let s = setup(|m| m.relevance_floor = -1.0);
    let other = AgentScope::new("someone-else");
    s.manager
        .store(&other, "billing secret", Metadata::new(), Some(Tier::LongTerm))
        .await
        .unwrap();
    s.manager
        .store(&other, "recent chatter", Metadata::new(), None)
        .await
        .unwrap();

    let pkg = s.manager.get_context(&scope(), "billing", None).await.unwrap();
    assert!(pkg.ordered_blocks.is_empty());
    assert!(pkg.dropped.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
// Durable backends
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn e2e_file_backend_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.backend = StorageBackend::File;
    config.storage.path = Some(dir.path().join("memory.jsonl"));
    config.memory.auto_summarize = false;

    let fact_id = {
        let manager = MemoryManager::from_config(&config).await.unwrap();
        manager
            .store(&scope(), "recent chat line", Metadata::new(), None)
            .await
            .unwrap();
        manager
            .store(&scope(), "The billing cycle starts on the first.", Metadata::new(), Some(Tier::LongTerm))
            .await
            .unwrap()
            .id
    };

    let manager = MemoryManager::from_config(&config).await.unwrap();
    let stats = manager.stats(&scope()).await.unwrap();
    assert_eq!((stats.short_term, stats.long_term), (1, 1));

    config.memory.relevance_floor = -1.0;
    let manager = MemoryManager::from_config(&config).await.unwrap();
    let pkg = manager.get_context(&scope(), "billing cycle", None).await.unwrap();
    assert!(pkg.contains(&fact_id));
}

#[tokio::test]
async fn e2e_sqlite_backend_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.backend = StorageBackend::Sqlite;
    config.storage.path = Some(dir.path().join("nested").join("memory.sqlite"));
    config.memory.auto_summarize = false;

    let manager = MemoryManager::from_config(&config).await.unwrap();
    let entry = manager
        .store(&scope(), "persist me", Metadata::new().with("source", "e2e"), None)
        .await
        .unwrap();
    let loaded = manager.get_entry(&scope(), &entry.id).await.unwrap().unwrap();
    assert_eq!(loaded.text, "persist me");
    assert_eq!(loaded.metadata.text("source"), Some("e2e"));
    assert_eq!(loaded.access_count, 1);
}
