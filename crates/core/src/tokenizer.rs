//! Token counting port.
//!
//! Counts are deterministic per model family, but families disagree with
//! each other; an agent must use one counter consistently.

use crate::error::TokenizationError;
use tracing::warn;

/// Converts text into a token count for budgeting.
pub trait TokenCounter: Send + Sync {
    /// Model family this counter matches (e.g. "heuristic", "llama3").
    fn family(&self) -> &str;

    fn count_tokens(&self, text: &str) -> std::result::Result<usize, TokenizationError>;
}

/// Count tokens, treating unencodable text as maximal length.
///
/// A candidate scored this way can never fit a budget, so it is dropped
/// rather than crashing the caller.
pub fn count_or_max(counter: &dyn TokenCounter, text: &str) -> usize {
    match counter.count_tokens(text) {
        Ok(n) => n,
        Err(e) => {
            warn!(family = counter.family(), error = %e, "Token count failed, assuming maximal length");
            usize::MAX
        }
    }
}
