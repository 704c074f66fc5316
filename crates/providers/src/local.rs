//! Offline model ports — no network, no API keys, no model weights.
//!
//! - [`HashingEmbedder`]: feature-hashed bag of words, L2-normalised. Texts
//!   sharing vocabulary land close together under cosine similarity, which
//!   is all the long-term tier needs to rank recall sensibly.
//! - [`ExtractiveGenerator`]: answers a summarization prompt with the lead
//!   sentence of every item it lists.
//!
//! Both are deterministic, so they double as fixtures for tests and demos.

use async_trait::async_trait;
use memtier_core::error::PortError;
use memtier_core::provider::{EmbeddingPort, GenerationPort};
use std::time::Duration;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

/// Bag-of-words embedder using the hashing trick.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Embed synchronously. Empty or symbol-only text yields the zero vector.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = fnv1a(word.to_lowercase().as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            // High bit picks the sign so collisions tend to cancel.
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingPort for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PortError> {
        Ok(self.embed_text(text))
    }
}

/// Summarizes by keeping the first sentence of each item in the prompt.
///
/// Items are the prompt's lines starting with `- `; when there are none,
/// every non-empty line counts as an item.
pub struct ExtractiveGenerator {
    max_chars: usize,
}

impl ExtractiveGenerator {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    fn lead_sentence(line: &str) -> &str {
        let line = line.trim();
        match line.find(['.', '!', '?']) {
            Some(end) => &line[..=end],
            None => line,
        }
    }

    /// Build the extract for `prompt`.
    pub fn extract(&self, prompt: &str) -> String {
        let bulleted: Vec<&str> = prompt
            .lines()
            .filter_map(|l| l.trim_start().strip_prefix("- "))
            .collect();
        let items: Vec<&str> = if bulleted.is_empty() {
            prompt.lines().filter(|l| !l.trim().is_empty()).collect()
        } else {
            bulleted
        };

        let mut out = String::new();
        for sentence in items.into_iter().map(Self::lead_sentence) {
            if sentence.is_empty() {
                continue;
            }
            let extra = if out.is_empty() { 0 } else { 1 } + sentence.chars().count();
            if !out.is_empty() && out.chars().count() + extra > self.max_chars {
                break;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(sentence);
        }
        out
    }
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[async_trait]
impl GenerationPort for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn generate(
        &self,
        prompt: &str,
        _system: &str,
        _timeout: Duration,
    ) -> Result<String, PortError> {
        let summary = self.extract(prompt);
        if summary.is_empty() {
            return Err(PortError::Provider("nothing to summarize".into()));
        }
        Ok(summary)
    }
}
