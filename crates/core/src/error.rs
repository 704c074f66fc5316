//! Error types for the memtier domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Port adapters report [`PortError`]; token counters report
//! [`TokenizationError`]; everything surfaces to callers as [`Error`].

use crate::entry::Tier;
use thiserror::Error;

/// The top-level error type for all memtier operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Port errors ---
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    // --- Tokenizer errors ---
    #[error("Tokenization error: {0}")]
    Tokenization(#[from] TokenizationError),

    // --- Vector index ---
    #[error("Embedding dimension mismatch in scope {scope}: expected {expected}, got {actual}")]
    DimensionMismatch {
        scope: String,
        expected: usize,
        actual: usize,
    },

    // --- Tier state machine ---
    #[error("Invalid tier transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: Tier, to: Tier },

    #[error("Cannot evict {id}: it lives in {tier}, only short_term entries expire")]
    NotEvictable { id: String, tier: Tier },

    #[error("Entry not found: {0}")]
    NotFound(String),

    // --- Internal invariants ---
    #[error("Consistency violation: {0}")]
    Consistency(String),

    // --- Configuration ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is a timeout from one of the external ports.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Port(PortError::Timeout { .. }))
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by the generation, embedding and persistence ports.
#[derive(Debug, Clone, Error)]
pub enum PortError {
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Provider failed: {0}")]
    Provider(String),

    #[error("Embedding has dimension {actual}, expected {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("Storage failed: {0}")]
    Storage(String),
}

/// Text could not be scored by a token counter.
#[derive(Debug, Clone, Error)]
#[error("{family} tokenizer could not encode text: {reason}")]
pub struct TokenizationError {
    pub family: String,
    pub reason: String,
}
