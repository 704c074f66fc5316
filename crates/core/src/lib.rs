//! # memtier Core
//!
//! Domain types, ports, and error definitions for the memtier agent memory
//! manager. This crate has **zero backend dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: text generation, embedding,
//! durable storage, token counting and time. Implementations live in their
//! respective crates. This enables:
//! - Swapping backends via configuration
//! - Easy testing with scripted/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod clock;
pub mod entry;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod package;
pub mod provider;
pub mod summary;
pub mod tokenizer;

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{AgentScope, EntryFate, MemoryEntry, Tier, Tombstone};
pub use error::{Error, PortError, Result, TokenizationError};
pub use memory::PersistencePort;
pub use metadata::{Metadata, MetadataValue};
pub use package::{
    BlockSource, ContextBlock, ContextPackage, Degradation, DropReason, DroppedCandidate,
};
pub use provider::{EmbeddingPort, GenerationPort, embed_checked, with_timeout};
pub use summary::{Summary, SummarySource};
pub use tokenizer::{TokenCounter, count_or_max};
