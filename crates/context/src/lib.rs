//! Context assembly for small-window agents.
//!
//! Data flows one way per call:
//!
//! ```text
//! MemoryManager::get_context(scope, query, budget)
//!   -> sweep expired short-term entries
//!   -> gather candidates (working, recent short-term, long-term hits, summaries)
//!   -> score with the TokenCounter, prioritize, pack greedily
//!   -> ContextPackage { ordered_blocks, dropped, degraded }
//! ```
//!
//! | Module | Role |
//! |--------|------|
//! | [`token`] | Token counters and budget-aware truncation |
//! | [`summarizer`] | Sliding-window summarization over the generation port |
//! | [`assembler`] | Priority ordering and first-fit-then-spill packing |
//! | [`manager`] | Facade: per-scope locking, tier lifecycle, wiring from config |

pub mod assembler;
pub mod manager;
pub mod summarizer;
pub mod token;

pub use assembler::{Candidate, ContextAssembler, Priority};
pub use manager::{ManagerPorts, MemoryManager, SummarizationReport};
pub use summarizer::{SummarizeOutcome, Summarizer, window_ranges};
pub use token::{HeuristicCounter, truncate_to_tokens};

#[cfg(feature = "hf-tokenizer")]
pub use token::HfTokenizerCounter;
