//! Memory entries and the tier state machine.
//!
//! An entry moves one way through the tiers:
//!
//! ```text
//! Working ──► ShortTerm ──► LongTerm
//!    │            │
//!    ▼            ▼
//! Discarded    Evicted
//! ```
//!
//! There is no demotion. `Discarded` (end of session) and `Evicted`
//! (TTL expiry) are terminal and only leave a [`Tombstone`] behind.

use crate::error::{Error, Result};
use crate::metadata::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The namespace that owns a set of memories, typically one per agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentScope(pub String);

impl AgentScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentScope {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Retention tier of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Ephemeral, in-process, tied to the live task.
    Working,
    /// Durable, bounded by a TTL.
    ShortTerm,
    /// Durable, permanent, indexed by embedding.
    LongTerm,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Working => "working",
            Tier::ShortTerm => "short_term",
            Tier::LongTerm => "long_term",
        }
    }

    /// Whether `self -> to` is an allowed promotion.
    pub fn can_promote_to(&self, to: Tier) -> bool {
        matches!(
            (self, to),
            (Tier::Working, Tier::ShortTerm) | (Tier::ShortTerm, Tier::LongTerm)
        )
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "working" => Ok(Tier::Working),
            "short_term" | "short-term" | "short" => Ok(Tier::ShortTerm),
            "long_term" | "long-term" | "long" => Ok(Tier::LongTerm),
            other => Err(Error::Config {
                message: format!("unknown tier '{other}'"),
            }),
        }
    }
}

/// A single unit of storable knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique, immutable identifier
    pub id: String,

    /// Owning scope
    pub agent_scope: AgentScope,

    /// Current tier (changes only through promotion)
    pub tier: Tier,

    /// Raw content; never edited in place
    pub text: String,

    /// Embedding, present for LongTerm entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Append-only tagged metadata
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Expiry, set only for ShortTerm entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// How many times the entry has been served or read
    #[serde(default)]
    pub access_count: u32,
}

impl MemoryEntry {
    /// Create a Working-tier entry with a fresh id.
    pub fn working(scope: AgentScope, text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_scope: scope,
            tier: Tier::Working,
            text: text.into(),
            embedding: None,
            metadata: Metadata::new(),
            created_at: now,
            expires_at: None,
            access_count: 0,
        }
    }

    /// Create a ShortTerm entry that expires at `expires_at`.
    pub fn short_term(
        scope: AgentScope,
        text: impl Into<String>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tier: Tier::ShortTerm,
            expires_at: Some(expires_at),
            ..Self::working(scope, text, now)
        }
    }

    /// Create a LongTerm entry carrying its embedding.
    pub fn long_term(
        scope: AgentScope,
        text: impl Into<String>,
        now: DateTime<Utc>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            tier: Tier::LongTerm,
            embedding: Some(embedding),
            ..Self::working(scope, text, now)
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Check the tier / expiry / embedding invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Consistency("memory entry has an empty id".into()));
        }
        if self.agent_scope.0.is_empty() {
            return Err(Error::Consistency(format!(
                "memory entry {} has an empty scope",
                self.id
            )));
        }
        match (self.tier, self.expires_at) {
            (Tier::ShortTerm, None) => Err(Error::Consistency(format!(
                "short-term entry {} has no expires_at",
                self.id
            ))),
            (Tier::Working | Tier::LongTerm, Some(_)) => Err(Error::Consistency(format!(
                "{} entry {} carries an expires_at",
                self.tier, self.id
            ))),
            _ if self.tier == Tier::LongTerm && self.embedding.is_none() => Err(
                Error::Consistency(format!("long-term entry {} has no embedding", self.id)),
            ),
            _ => Ok(()),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// How an entry left the tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryFate {
    /// ShortTerm TTL passed without enough accesses.
    Evicted,
    /// Working entry dropped at end of session.
    Discarded,
}

/// Record kept for an entry that no longer lives in any tier, so that
/// summary provenance can still be resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: String,
    pub agent_scope: AgentScope,
    pub tier: Tier,
    pub fate: EntryFate,
    pub removed_at: DateTime<Utc>,
}
