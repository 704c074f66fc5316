//! Summaries — derived compressions of entries or lower-level summaries.

use crate::entry::{AgentScope, MemoryEntry};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A compression of one or more entries (level 1) or of level N-1
/// summaries (level N). Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub agent_scope: AgentScope,
    /// Provenance chain, in input order. Never empty.
    pub source_entry_ids: Vec<String>,
    /// Number of summarization passes that produced this summary (>= 1).
    pub level: u32,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Embedding of `text`, used to score the summary against a query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Summary {
    pub fn new(
        scope: AgentScope,
        source_entry_ids: Vec<String>,
        level: u32,
        text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_scope: scope,
            source_entry_ids,
            level,
            text: text.into(),
            created_at: now,
            embedding: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_entry_ids.is_empty() {
            return Err(Error::Consistency(format!(
                "summary {} has no source entries",
                self.id
            )));
        }
        if self.level == 0 {
            return Err(Error::Consistency(format!(
                "summary {} has level 0",
                self.id
            )));
        }
        Ok(())
    }
}

/// Anything the summarizer can take as input.
#[derive(Debug, Clone, PartialEq)]
pub enum SummarySource {
    Entry(MemoryEntry),
    Summary(Summary),
}

impl SummarySource {
    pub fn id(&self) -> &str {
        match self {
            SummarySource::Entry(e) => &e.id,
            SummarySource::Summary(s) => &s.id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            SummarySource::Entry(e) => &e.text,
            SummarySource::Summary(s) => &s.text,
        }
    }

    /// Raw entries are level 0.
    pub fn level(&self) -> u32 {
        match self {
            SummarySource::Entry(_) => 0,
            SummarySource::Summary(s) => s.level,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            SummarySource::Entry(e) => e.created_at,
            SummarySource::Summary(s) => s.created_at,
        }
    }
}

impl From<MemoryEntry> for SummarySource {
    fn from(e: MemoryEntry) -> Self {
        SummarySource::Entry(e)
    }
}

impl From<Summary> for SummarySource {
    fn from(s: Summary) -> Self {
        SummarySource::Summary(s)
    }
}
