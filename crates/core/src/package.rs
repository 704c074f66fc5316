//! The context package returned for every inference call.
//!
//! Packages are ephemeral: built fresh per `get_context` call and never
//! persisted, though they serialize cleanly for logging.

use serde::{Deserialize, Serialize};

/// Where a context block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSource {
    Working,
    ShortTerm,
    LongTerm,
    Summary,
}

/// One included block, in priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub source_id: String,
    pub source: BlockSource,
    pub text: String,
    pub token_count: usize,
    /// Set when the block is a prefix of its source, cut to fit the budget.
    #[serde(default)]
    pub truncated: bool,
}

/// Why a candidate did not make it into the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropReason {
    OverBudget,
    LowRelevance,
    Expired,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DropReason::OverBudget => "OVER_BUDGET",
            DropReason::LowRelevance => "LOW_RELEVANCE",
            DropReason::Expired => "EXPIRED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedCandidate {
    pub source_id: String,
    pub reason: DropReason,
}

/// A degraded-but-useful path taken while building the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// The query could not be embedded or the long-term index was unavailable.
    LongTermOmitted { reason: String },
    /// Recent short-term entries could not be read.
    ShortTermOmitted { reason: String },
    /// Summaries were ranked without similarity scores.
    SummariesUnscored { reason: String },
    /// Summaries could not be read.
    SummariesOmitted { reason: String },
    /// The opportunistic sweep failed; expired entries may linger.
    SweepSkipped { reason: String },
}

/// Bounded, prioritized bundle of text for one inference call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPackage {
    pub ordered_blocks: Vec<ContextBlock>,
    /// Sum of `ordered_blocks[*].token_count`; never above `budget`.
    pub total_tokens: usize,
    pub budget: usize,
    pub dropped: Vec<DroppedCandidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<Degradation>,
}

impl ContextPackage {
    pub fn empty(budget: usize) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    /// Concatenate the included blocks, highest priority first.
    pub fn render(&self) -> String {
        self.ordered_blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn dropped_with(&self, reason: DropReason) -> impl Iterator<Item = &str> {
        self.dropped
            .iter()
            .filter(move |d| d.reason == reason)
            .map(|d| d.source_id.as_str())
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.ordered_blocks.iter().any(|b| b.source_id == source_id)
    }

    pub fn utilization_pct(&self) -> f32 {
        if self.budget == 0 {
            return 0.0;
        }
        (self.total_tokens as f32 / self.budget as f32) * 100.0
    }
}
