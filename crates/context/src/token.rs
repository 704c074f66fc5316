//! Token counters and budget-aware truncation.
//!
//! [`HeuristicCounter`] uses a character ratio: ~4 characters per token is
//! within ~10% of BPE tokenizers on English text and needs no vocabulary.
//! With the `hf-tokenizer` feature, [`HfTokenizerCounter`] counts exactly
//! with a HuggingFace `tokenizer.json`.

use memtier_core::error::TokenizationError;
use memtier_core::tokenizer::{TokenCounter, count_or_max};

/// Character-ratio estimator. Rounds up.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicCounter {
    chars_per_token: usize,
}

impl HeuristicCounter {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for HeuristicCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for HeuristicCounter {
    fn family(&self) -> &str {
        "heuristic"
    }

    fn count_tokens(&self, text: &str) -> Result<usize, TokenizationError> {
        Ok(text.chars().count().div_ceil(self.chars_per_token))
    }
}

/// Exact counts from a HuggingFace tokenizer definition.
#[cfg(feature = "hf-tokenizer")]
pub struct HfTokenizerCounter {
    family: String,
    tokenizer: tokenizers::Tokenizer,
}

#[cfg(feature = "hf-tokenizer")]
impl HfTokenizerCounter {
    /// Load `tokenizer.json` for the model family `family`.
    pub fn from_file(
        family: impl Into<String>,
        path: &std::path::Path,
    ) -> Result<Self, TokenizationError> {
        let family = family.into();
        let tokenizer =
            tokenizers::Tokenizer::from_file(path).map_err(|e| TokenizationError {
                family: family.clone(),
                reason: format!("failed to load {}: {e}", path.display()),
            })?;
        Ok(Self { family, tokenizer })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl TokenCounter for HfTokenizerCounter {
    fn family(&self) -> &str {
        &self.family
    }

    fn count_tokens(&self, text: &str) -> Result<usize, TokenizationError> {
        self.tokenizer
            .encode(text, false)
            .map(|encoding| encoding.len())
            .map_err(|e| TokenizationError {
                family: self.family.clone(),
                reason: e.to_string(),
            })
    }
}

/// Longest prefix of `text`, cut on a character boundary, whose count is at
/// most `max_tokens`. Returns the prefix and its count, or `None` when even
/// one character does not fit.
///
/// Binary search over character boundaries; assumes the count of a prefix
/// never exceeds the count of a longer prefix.
pub fn truncate_to_tokens(
    counter: &dyn TokenCounter,
    text: &str,
    max_tokens: usize,
) -> Option<(String, usize)> {
    if text.is_empty() {
        return None;
    }
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .skip(1)
        .chain(std::iter::once(text.len()))
        .collect();

    // Invariant: boundaries[..lo] fit, boundaries[hi..] do not.
    let (mut lo, mut hi) = (0, boundaries.len());
    let mut best = None;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let prefix = &text[..boundaries[mid]];
        let tokens = count_or_max(counter, prefix);
        if tokens <= max_tokens {
            best = Some((boundaries[mid], tokens));
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    best.map(|(end, tokens)| (text[..end].to_string(), tokens))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(HeuristicCounter::default().count_tokens("").unwrap(), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(HeuristicCounter::default().count_tokens("test").unwrap(), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(HeuristicCounter::default().count_tokens("hello").unwrap(), 2);
    }

    #[test]
    fn counts_characters_not_bytes() {
        // 4 characters, 8 bytes
        assert_eq!(HeuristicCounter::default().count_tokens("éééé").unwrap(), 1);
    }

    #[test]
    fn ratio_is_configurable() {
        let text = "a".repeat(100);
        assert_eq!(HeuristicCounter::new(4).count_tokens(&text).unwrap(), 25);
        assert_eq!(HeuristicCounter::new(3).count_tokens(&text).unwrap(), 34);
        // zero is clamped to one char per token
        assert_eq!(HeuristicCounter::new(0).count_tokens(&text).unwrap(), 100);
    }

    #[test]
    fn truncation_fits_exactly() {
        let counter = HeuristicCounter::default();
        let text = "a".repeat(400); // 100 tokens
        let (prefix, tokens) = truncate_to_tokens(&counter, &text, 30).unwrap();
        assert_eq!(tokens, 30);
        assert_eq!(prefix.len(), 120);
    }

    #[test]
    fn truncation_of_fitting_text_keeps_everything() {
        let counter = HeuristicCounter::default();
        let (prefix, tokens) = truncate_to_tokens(&counter, "short", 10).unwrap();
        assert_eq!(prefix, "short");
        assert_eq!(tokens, 2);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let counter = HeuristicCounter::new(1);
        let (prefix, tokens) = truncate_to_tokens(&counter, "héllo wörld", 7).unwrap();
        assert_eq!(prefix, "héllo w");
        assert_eq!(tokens, 7);
    }

    #[test]
    fn zero_budget_yields_nothing() {
        let counter = HeuristicCounter::default();
        assert!(truncate_to_tokens(&counter, "anything", 0).is_none());
        assert!(truncate_to_tokens(&counter, "", 5).is_none());
    }
}
