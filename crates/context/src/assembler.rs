//! Context assembly — priority ordering and budget-aware packing.
//!
//! Candidates from every tier are scored onto one scale:
//!
//! | Source | Priority |
//! |--------|----------|
//! | Working | pinned above everything |
//! | ShortTerm | recency, `1 - age / ttl` in `[0, 1]` |
//! | LongTerm | cosine similarity to the query |
//! | Summary | similarity × boost (denser per token) |
//!
//! # Packing
//!
//! Candidates are taken greedily in priority order. One that does not fit
//! is truncated to the remaining budget when at least `min_fragment_tokens`
//! of it would survive, and dropped `OVER_BUDGET` otherwise; packing then
//! moves on to the next candidate ("first fit, then spill").
//!
//! # Determinism
//!
//! Identical inputs always produce identical packages: ties on priority are
//! broken by newer `created_at`, then by id.

use chrono::{DateTime, Utc};
use memtier_core::package::{BlockSource, ContextBlock, ContextPackage, DropReason, DroppedCandidate};
use memtier_core::tokenizer::{TokenCounter, count_or_max};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

// ── Types ─────────────────────────────────────────────────────────────────

/// How a candidate earned its place in line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Priority {
    /// Live task state; always first.
    Pinned,
    /// Recency in `[0, 1]`, 1 = just written.
    Recency(f64),
    /// Cosine similarity to the query.
    Similarity(f32),
    /// Similarity scaled by a density boost.
    Boosted { similarity: f32, boost: f32 },
    /// Relevance could not be computed; ranks at the relevance floor.
    Unscored,
}

impl Priority {
    /// Position on the shared scale.
    pub fn rank(&self, relevance_floor: f32) -> f64 {
        match *self {
            Priority::Pinned => f64::INFINITY,
            Priority::Recency(r) => r,
            Priority::Similarity(s) => f64::from(s),
            Priority::Boosted { similarity, boost } => f64::from(similarity) * f64::from(boost),
            Priority::Unscored => f64::from(relevance_floor),
        }
    }

    /// The raw similarity gated by the relevance floor, if any.
    fn similarity(&self) -> Option<f32> {
        match *self {
            Priority::Similarity(s) | Priority::Boosted { similarity: s, .. } => Some(s),
            _ => None,
        }
    }
}

/// One piece of memory competing for the budget.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub source_id: String,
    pub source: BlockSource,
    pub text: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// Stateless packer. Create one and reuse it.
pub struct ContextAssembler {
    counter: Arc<dyn TokenCounter>,
    min_fragment_tokens: usize,
    relevance_floor: f32,
}

impl ContextAssembler {
    pub fn new(counter: Arc<dyn TokenCounter>, min_fragment_tokens: usize, relevance_floor: f32) -> Self {
        Self {
            counter,
            min_fragment_tokens,
            relevance_floor,
        }
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Pack `candidates` into at most `budget` tokens.
    ///
    /// `expired` ids are recorded as `EXPIRED` drops ahead of everything
    /// else. Every candidate ends up exactly once in either `ordered_blocks`
    /// or `dropped`.
    pub fn assemble(&self, budget: usize, candidates: Vec<Candidate>, expired: &[String]) -> ContextPackage {
        let mut package = ContextPackage::empty(budget);
        let mut seen: HashSet<String> = HashSet::new();

        for id in expired {
            if seen.insert(id.clone()) {
                package.dropped.push(DroppedCandidate {
                    source_id: id.clone(),
                    reason: DropReason::Expired,
                });
            }
        }

        // ── Relevance floor ────────────────────────────────────────────────
        let mut eligible = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !seen.insert(candidate.source_id.clone()) {
                continue;
            }
            match candidate.priority.similarity() {
                Some(s) if s < self.relevance_floor => package.dropped.push(DroppedCandidate {
                    source_id: candidate.source_id,
                    reason: DropReason::LowRelevance,
                }),
                _ => eligible.push(candidate),
            }
        }

        // ── Priority order ─────────────────────────────────────────────────
        let floor = self.relevance_floor;
        eligible.sort_by(|a, b| Self::compare(a, b, floor));

        // ── Greedy packing ─────────────────────────────────────────────────
        let mut remaining = budget;
        for candidate in eligible {
            match self.fit(&candidate.text, remaining) {
                Some((text, token_count, truncated)) => {
                    remaining -= token_count;
                    package.ordered_blocks.push(ContextBlock {
                        source_id: candidate.source_id,
                        source: candidate.source,
                        text,
                        token_count,
                        truncated,
                    });
                }
                None => package.dropped.push(DroppedCandidate {
                    source_id: candidate.source_id,
                    reason: DropReason::OverBudget,
                }),
            }
        }

        package.total_tokens = budget - remaining;
        debug!(
            blocks = package.ordered_blocks.len(),
            dropped = package.dropped.len(),
            tokens = package.total_tokens,
            budget,
            "Packed context"
        );
        package
    }

    /// Highest priority first; newer first; then by id.
    fn compare(a: &Candidate, b: &Candidate, floor: f32) -> Ordering {
        b.priority
            .rank(floor)
            .total_cmp(&a.priority.rank(floor))
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.source_id.cmp(&b.source_id))
    }

    /// The text to include for a candidate and its token count, or `None`
    /// if it has to be dropped.
    fn fit(&self, text: &str, remaining: usize) -> Option<(String, usize, bool)> {
        let tokens = count_or_max(self.counter.as_ref(), text);
        // Text the counter cannot encode never fits, not even truncated.
        if tokens == usize::MAX {
            return None;
        }
        if tokens <= remaining {
            return Some((text.to_string(), tokens, false));
        }
        if remaining == 0 || remaining < self.min_fragment_tokens {
            return None;
        }
        crate::token::truncate_to_tokens(self.counter.as_ref(), text, remaining)
            .filter(|(_, n)| *n > 0 && *n >= self.min_fragment_tokens)
            .map(|(fragment, n)| (fragment, n, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::HeuristicCounter;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn assembler(min_fragment: usize) -> ContextAssembler {
        ContextAssembler::new(Arc::new(HeuristicCounter::default()), min_fragment, 0.2)
    }

    /// A candidate whose text is exactly `tokens` heuristic tokens.
    fn candidate(id: &str, source: BlockSource, tokens: usize, priority: Priority, at: i64) -> Candidate {
        Candidate {
            source_id: id.into(),
            source,
            text: "x".repeat(tokens * 4),
            priority,
            created_at: t(at),
        }
    }

    fn ids(package: &ContextPackage) -> Vec<&str> {
        package.ordered_blocks.iter().map(|b| b.source_id.as_str()).collect()
    }

    #[test]
    fn everything_fits() {
        let pkg = assembler(50).assemble(
            1000,
            vec![
                candidate("w1", BlockSource::Working, 100, Priority::Pinned, 0),
                candidate("w2", BlockSource::Working, 100, Priority::Pinned, 1),
                candidate("w3", BlockSource::Working, 100, Priority::Pinned, 2),
            ],
            &[],
        );
        assert_eq!(pkg.total_tokens, 300);
        assert!(pkg.dropped.is_empty());
        assert_eq!(ids(&pkg), vec!["w3", "w2", "w1"]);
    }

    #[test]
    fn priority_order_across_sources() {
        let pkg = assembler(50).assemble(
            10_000,
            vec![
                candidate("lt", BlockSource::LongTerm, 10, Priority::Similarity(0.9), 0),
                candidate("st", BlockSource::ShortTerm, 10, Priority::Recency(0.5), 0),
                candidate(
                    "sum",
                    BlockSource::Summary,
                    10,
                    Priority::Boosted { similarity: 0.8, boost: 1.2 },
                    0,
                ),
                candidate("w", BlockSource::Working, 10, Priority::Pinned, 0),
            ],
            &[],
        );
        // 0.8 * 1.2 = 0.96 beats a raw 0.9 hit
        assert_eq!(ids(&pkg), vec!["w", "sum", "lt", "st"]);
    }

    #[test]
    fn ties_break_by_recency_then_id() {
        let pkg = assembler(50).assemble(
            10_000,
            vec![
                candidate("b", BlockSource::LongTerm, 1, Priority::Similarity(0.5), 5),
                candidate("a", BlockSource::LongTerm, 1, Priority::Similarity(0.5), 5),
                candidate("c", BlockSource::LongTerm, 1, Priority::Similarity(0.5), 9),
            ],
            &[],
        );
        assert_eq!(ids(&pkg), vec!["c", "a", "b"]);
    }

    #[test]
    fn oversized_candidate_is_truncated() {
        let pkg = assembler(50).assemble(
            500,
            vec![candidate("big", BlockSource::ShortTerm, 2000, Priority::Recency(1.0), 0)],
            &[],
        );
        assert_eq!(pkg.ordered_blocks.len(), 1);
        let block = &pkg.ordered_blocks[0];
        assert!(block.truncated);
        assert_eq!(block.token_count, 500);
        assert_eq!(pkg.total_tokens, 500);
        assert!(pkg.dropped.is_empty());
    }

    #[test]
    fn oversized_candidate_is_dropped_below_min_fragment() {
        let pkg = assembler(600).assemble(
            500,
            vec![candidate("big", BlockSource::ShortTerm, 2000, Priority::Recency(1.0), 0)],
            &[],
        );
        assert!(pkg.ordered_blocks.is_empty());
        assert_eq!(pkg.total_tokens, 0);
        assert_eq!(pkg.dropped_with(DropReason::OverBudget).collect::<Vec<_>>(), vec!["big"]);
    }

    #[test]
    fn spill_moves_on_to_smaller_candidates() {
        // 80 fit, 30 left: the 100-token one is below min fragment (50) and
        // dropped, the 20-token one still fits.
        let pkg = assembler(50).assemble(
            110,
            vec![
                candidate("first", BlockSource::Working, 80, Priority::Pinned, 0),
                candidate("big", BlockSource::ShortTerm, 100, Priority::Recency(0.9), 0),
                candidate("small", BlockSource::ShortTerm, 20, Priority::Recency(0.1), 0),
            ],
            &[],
        );
        assert_eq!(ids(&pkg), vec!["first", "small"]);
        assert_eq!(pkg.total_tokens, 100);
        assert_eq!(pkg.dropped_with(DropReason::OverBudget).collect::<Vec<_>>(), vec!["big"]);
    }

    #[test]
    fn low_relevance_is_excluded_before_packing() {
        let pkg = assembler(50).assemble(
            10_000,
            vec![
                candidate("near", BlockSource::LongTerm, 5, Priority::Similarity(0.7), 0),
                candidate("far", BlockSource::LongTerm, 5, Priority::Similarity(0.1), 0),
                // boosted score is above the floor but raw similarity is not
                candidate(
                    "weak-sum",
                    BlockSource::Summary,
                    5,
                    Priority::Boosted { similarity: 0.19, boost: 2.0 },
                    0,
                ),
                candidate("unscored", BlockSource::Summary, 5, Priority::Unscored, 0),
            ],
            &[],
        );
        assert_eq!(ids(&pkg), vec!["near", "unscored"]);
        let mut low: Vec<_> = pkg.dropped_with(DropReason::LowRelevance).collect();
        low.sort();
        assert_eq!(low, vec!["far", "weak-sum"]);
    }

    #[test]
    fn expired_ids_are_recorded_once() {
        let pkg = assembler(50).assemble(
            100,
            vec![candidate("gone", BlockSource::ShortTerm, 5, Priority::Recency(0.0), 0)],
            &["gone".to_string()],
        );
        assert!(pkg.ordered_blocks.is_empty());
        assert_eq!(pkg.dropped.len(), 1);
        assert_eq!(pkg.dropped[0].reason, DropReason::Expired);
    }

    #[test]
    fn zero_budget_drops_everything() {
        let pkg = assembler(0).assemble(
            0,
            vec![candidate("w", BlockSource::Working, 3, Priority::Pinned, 0)],
            &[],
        );
        assert_eq!(pkg.total_tokens, 0);
        assert_eq!(pkg.dropped.len(), 1);
    }

    #[test]
    fn unencodable_text_never_fits() {
        struct Refuses;
        impl TokenCounter for Refuses {
            fn family(&self) -> &str {
                "refuses"
            }
            fn count_tokens(
                &self,
                _text: &str,
            ) -> Result<usize, memtier_core::error::TokenizationError> {
                Err(memtier_core::error::TokenizationError {
                    family: "refuses".into(),
                    reason: "invalid sequence".into(),
                })
            }
        }

        let asm = ContextAssembler::new(Arc::new(Refuses), 1, 0.0);
        let pkg = asm.assemble(
            1000,
            vec![candidate("w", BlockSource::Working, 3, Priority::Pinned, 0)],
            &[],
        );
        assert!(pkg.ordered_blocks.is_empty());
        assert_eq!(pkg.dropped_with(DropReason::OverBudget).count(), 1);
    }

    #[test]
    fn deterministic_assembly() {
        let make = || {
            (0..20)
                .map(|i| {
                    candidate(
                        &format!("c{i:02}"),
                        BlockSource::LongTerm,
                        7 + i % 5,
                        Priority::Similarity(0.3 + (i % 4) as f32 * 0.1),
                        i as i64 % 3,
                    )
                })
                .collect::<Vec<_>>()
        };
        let asm = assembler(5);
        let first = asm.assemble(90, make(), &[]);
        let second = asm.assemble(90, make(), &[]);
        assert_eq!(first, second);
        assert!(first.total_tokens <= 90);
        assert_eq!(first.ordered_blocks.len() + first.dropped.len(), 20);
    }

    /// Counts like the heuristic but fails on anything longer than 40 chars.
    struct ShortOnly;

    impl TokenCounter for ShortOnly {
        fn family(&self) -> &str {
            "short-only"
        }

        fn count_tokens(&self, text: &str) -> Result<usize, memtier_core::error::TokenizationError> {
            if text.chars().count() > 40 {
                return Err(memtier_core::error::TokenizationError {
                    family: "short-only".into(),
                    reason: "text too long".into(),
                });
            }
            Ok(text.chars().count().div_ceil(4))
        }
    }

    #[test]
    fn unencodable_candidate_is_dropped_not_truncated() {
        let asm = ContextAssembler::new(Arc::new(ShortOnly), 2, 0.2);
        let pkg = asm.assemble(
            50,
            vec![
                candidate("long", BlockSource::Working, 25, Priority::Pinned, 0),
                candidate("short", BlockSource::ShortTerm, 5, Priority::Recency(0.5), 0),
            ],
            &[],
        );
        assert_eq!(ids(&pkg), vec!["short"]);
        assert_eq!(pkg.dropped_with(DropReason::OverBudget).collect::<Vec<_>>(), vec!["long"]);
        assert_eq!(pkg.total_tokens, 5);
    }
}
