//! Sliding-window summarization.
//!
//! The input sequence is cut into windows of `window_size` items advancing
//! by `window_size - overlap`, so neighbouring windows share `overlap` items
//! of context. Every window goes through the generation port once, and all
//! windows run concurrently.
//!
//! A window whose generation fails or times out produces no summary; its
//! items stay raw and keep competing for context on their own.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use memtier_core::entry::AgentScope;
use memtier_core::error::{Error, Result};
use memtier_core::provider::{GenerationPort, with_timeout};
use memtier_core::summary::{Summary, SummarySource};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SUMMARY_SYSTEM: &str = "You compress an AI agent's memory. Reply with the summary only: \
     keep names, numbers, decisions and open questions; drop pleasantries.";

/// Window boundaries over `len` items.
///
/// `len <= window_size` gives one window over everything. Otherwise windows
/// start at `0, step, 2*step, ...` and stop after the first one reaching the
/// end, e.g. 10 items, window 4, overlap 1: `[0..4, 3..7, 6..10]`.
pub fn window_ranges(len: usize, window_size: usize, overlap: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    if len <= window_size || window_size == 0 {
        return vec![0..len];
    }

    let step = window_size.saturating_sub(overlap).max(1);
    let mut ranges = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + window_size).min(len);
        ranges.push(start..end);
        if end == len {
            break;
        }
        start += step;
    }
    ranges
}

/// What one summarization pass produced.
#[derive(Debug, Default)]
pub struct SummarizeOutcome {
    pub summaries: Vec<Summary>,
    /// Member ids of windows whose generation failed; those items stay raw.
    pub failed_windows: Vec<Vec<String>>,
}

pub struct Summarizer {
    generator: Arc<dyn GenerationPort>,
    window_size: usize,
    overlap: usize,
    timeout: Duration,
}

impl Summarizer {
    pub fn new(
        generator: Arc<dyn GenerationPort>,
        window_size: usize,
        overlap: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            window_size,
            overlap,
            timeout,
        }
    }

    /// Summarize `inputs` (chronological, all of one level) into summaries
    /// one level up.
    pub async fn summarize(
        &self,
        scope: &AgentScope,
        inputs: &[SummarySource],
        now: DateTime<Utc>,
    ) -> Result<SummarizeOutcome> {
        let Some(first) = inputs.first() else {
            return Ok(SummarizeOutcome::default());
        };
        let input_level = first.level();
        if let Some(odd) = inputs.iter().find(|i| i.level() != input_level) {
            return Err(Error::Consistency(format!(
                "summarizer input mixes level {input_level} with level {} ({})",
                odd.level(),
                odd.id()
            )));
        }
        let level = input_level + 1;

        let windows = window_ranges(inputs.len(), self.window_size, self.overlap);
        debug!(scope = %scope, items = inputs.len(), windows = windows.len(), level, "Summarizing");

        let generations = windows.iter().map(|range| {
            let prompt = Self::prompt(&inputs[range.clone()]);
            async move {
                with_timeout(
                    "generate",
                    self.timeout,
                    self.generator.generate(&prompt, SUMMARY_SYSTEM, self.timeout),
                )
                .await
            }
        });
        let results = join_all(generations).await;

        let mut outcome = SummarizeOutcome::default();
        for (range, result) in windows.into_iter().zip(results) {
            let ids: Vec<String> = inputs[range].iter().map(|i| i.id().to_string()).collect();
            match result {
                Ok(text) if !text.trim().is_empty() => {
                    outcome
                        .summaries
                        .push(Summary::new(scope.clone(), ids, level, text.trim(), now));
                }
                Ok(_) => {
                    warn!(scope = %scope, generator = self.generator.name(), "Empty summary, keeping window raw");
                    outcome.failed_windows.push(ids);
                }
                Err(e) => {
                    warn!(scope = %scope, generator = self.generator.name(), error = %e, "Summary window failed, keeping window raw");
                    outcome.failed_windows.push(ids);
                }
            }
        }
        Ok(outcome)
    }

    fn prompt(window: &[SummarySource]) -> String {
        let mut prompt = String::from("Summarize the following memory items in a few sentences:\n\n");
        for item in window {
            prompt.push_str("- ");
            prompt.push_str(&item.text().split_whitespace().collect::<Vec<_>>().join(" "));
            prompt.push('\n');
        }
        prompt
    }
}
