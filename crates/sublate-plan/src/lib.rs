#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Batching planner for the translation pipeline core (spec.md §4.3,
//! component C3).
//!
//! [`plan`] partitions a [`Document`] into [`Batch`]es a provider can
//! translate independently, greedily filling each batch up to a token
//! budget and attaching read-only context windows from neighboring
//! entries.

use sublate_core::{Batch, Document, Workflow};
use sublate_error::PlanError;

/// Planning knobs (spec.md §4.3). `token_budget` and `context_size` are
/// per-request; `max_entries_per_batch` and `single_batch_mode` default to
/// the values spec.md names but are overridable by configuration.
#[derive(Debug, Clone, Copy)]
pub struct PlanOptions {
    /// Maximum estimated tokens per batch's entries (excludes context).
    pub token_budget: u32,
    /// Entries of context sent before/after each batch, `0..=10`.
    pub context_size: usize,
    /// Hard cap on entries per batch regardless of token budget.
    pub max_entries_per_batch: usize,
    /// Emit exactly one batch covering the whole document, or fail.
    pub single_batch_mode: bool,
}

impl PlanOptions {
    /// Defaults: `max_entries_per_batch = 50`, no context, multi-batch.
    #[must_use]
    pub fn new(token_budget: u32) -> Self {
        Self {
            token_budget,
            context_size: 0,
            max_entries_per_batch: 50,
            single_batch_mode: false,
        }
    }

    /// Attach `context_size` entries of read-only context to each batch.
    #[must_use]
    pub fn with_context_size(mut self, context_size: usize) -> Self {
        self.context_size = context_size;
        self
    }

    /// Override the per-batch entry cap.
    #[must_use]
    pub fn with_max_entries_per_batch(mut self, max_entries_per_batch: usize) -> Self {
        self.max_entries_per_batch = max_entries_per_batch;
        self
    }

    /// Require a single batch covering the entire document.
    #[must_use]
    pub fn single_batch(mut self) -> Self {
        self.single_batch_mode = true;
        self
    }
}

/// Deterministic token estimate: character count divided by 3.5, rounded
/// up (spec.md §4.3).
#[must_use]
pub fn token_estimate(text: &str) -> u32 {
    let chars = text.chars().count() as f64;
    (chars / 3.5).ceil() as u32
}

/// Partition `document` into batches per `workflow` and `options`
/// (spec.md §4.3). `workflow` does not affect partitioning today — it
/// governs wire shape at dispatch time (C4) — but is threaded through so
/// future workflow-specific sizing has a seam without changing the
/// signature.
///
/// # Errors
///
/// Returns [`PlanError::SinglePassTooLarge`] if `options.single_batch_mode`
/// is set and the whole document exceeds `options.token_budget`.
pub fn plan(
    document: &Document,
    _workflow: Workflow,
    options: PlanOptions,
) -> Result<Vec<Batch>, PlanError> {
    if document.entries.is_empty() {
        return Ok(Vec::new());
    }

    if options.single_batch_mode {
        return plan_single_batch(document, options);
    }

    let ranges = greedy_ranges(document, options);
    Ok(ranges
        .into_iter()
        .enumerate()
        .map(|(id, range)| build_batch(document, id as u32, range, options.context_size))
        .collect())
}

fn plan_single_batch(document: &Document, options: PlanOptions) -> Result<Vec<Batch>, PlanError> {
    let needed: u64 = document
        .entries
        .iter()
        .map(|e| u64::from(token_estimate(&e.text)))
        .sum();
    if needed > u64::from(options.token_budget) {
        return Err(PlanError::SinglePassTooLarge {
            needed,
            budget: u64::from(options.token_budget),
        });
    }
    Ok(vec![build_batch(
        document,
        0,
        0..document.entries.len(),
        0,
    )])
}

/// Greedy fill: accumulate positions until the next entry would overflow
/// the token budget or the batch hits `max_entries_per_batch`, per
/// spec.md §4.3. A single entry that alone exceeds the budget still gets
/// its own batch — entries are never split.
fn greedy_ranges(document: &Document, options: PlanOptions) -> Vec<std::ops::Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0usize;
    let mut batch_tokens: u32 = 0;
    let mut batch_len = 0usize;

    for (pos, entry) in document.entries.iter().enumerate() {
        let est = token_estimate(&entry.text);
        let would_overflow_budget = batch_len > 0 && batch_tokens.saturating_add(est) > options.token_budget;
        let would_overflow_len = batch_len >= options.max_entries_per_batch;
        if would_overflow_budget || would_overflow_len {
            ranges.push(start..pos);
            start = pos;
            batch_tokens = 0;
            batch_len = 0;
        }
        batch_tokens = batch_tokens.saturating_add(est);
        batch_len += 1;
    }
    ranges.push(start..document.entries.len());
    ranges
}

fn build_batch(
    document: &Document,
    id: u32,
    range: std::ops::Range<usize>,
    context_size: usize,
) -> Batch {
    let entry_indices: Vec<u32> = document.entries[range.clone()].iter().map(|e| e.index).collect();
    let token_estimate_total: u32 = document.entries[range.clone()]
        .iter()
        .map(|e| token_estimate(&e.text))
        .sum();

    let before_start = range.start.saturating_sub(context_size);
    let context_before: Vec<u32> = document.entries[before_start..range.start]
        .iter()
        .map(|e| e.index)
        .collect();

    let after_end = (range.end + context_size).min(document.entries.len());
    let context_after: Vec<u32> = document.entries[range.end..after_end]
        .iter()
        .map(|e| e.index)
        .collect();

    Batch {
        id,
        entry_indices,
        context_before,
        context_after,
        token_estimate: token_estimate_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use sublate_core::{Document, Entry, Format};

    fn doc_with(entries: &[&str]) -> Document {
        let mut d = Document::new(Format::Srt, "");
        for (i, text) in entries.iter().enumerate() {
            d.push_entry(
                Entry::new(
                    i as u32 + 1,
                    Duration::from_secs(i as u64),
                    Duration::from_secs(i as u64 + 1),
                    *text,
                )
                .unwrap(),
            )
            .unwrap();
        }
        d
    }

    #[test]
    fn empty_document_plans_to_no_batches() {
        let d = Document::new(Format::Srt, "");
        let batches = plan(&d, Workflow::Structured, PlanOptions::new(1000)).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(token_estimate("abc"), 1); // 3/3.5 -> ceil 1
        assert_eq!(token_estimate("abcdefg"), 2); // 7/3.5 = 2 exactly
        assert_eq!(token_estimate(""), 0);
    }

    #[test]
    fn every_entry_appears_in_exactly_one_batch() {
        let d = doc_with(&["one", "two", "three", "four", "five"]);
        let batches = plan(&d, Workflow::Structured, PlanOptions::new(1)).unwrap();
        let mut seen: Vec<u32> = batches.iter().flat_map(|b| b.entry_indices.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, d.indices());
    }

    #[test]
    fn batches_are_emitted_in_document_order() {
        let d = doc_with(&["a"; 10]);
        let batches = plan(&d, Workflow::Structured, PlanOptions::new(100).with_max_entries_per_batch(3))
            .unwrap();
        let firsts: Vec<u32> = batches.iter().filter_map(|b| b.first_index()).collect();
        let mut sorted = firsts.clone();
        sorted.sort_unstable();
        assert_eq!(firsts, sorted);
    }

    #[test]
    fn max_entries_per_batch_is_respected() {
        let d = doc_with(&["x"; 120]);
        let batches =
            plan(&d, Workflow::Structured, PlanOptions::new(10_000).with_max_entries_per_batch(50))
                .unwrap();
        assert!(batches.iter().all(|b| b.entry_indices.len() <= 50));
        assert_eq!(batches.len(), 3); // 50 + 50 + 20
    }

    #[test]
    fn token_budget_forces_a_split() {
        // Each entry costs 1 token (len 3 text -> ceil(3/3.5)=1); a budget
        // of 2 should split 5 entries into batches of at most 2.
        let d = doc_with(&["abc", "abc", "abc", "abc", "abc"]);
        let batches = plan(&d, Workflow::Structured, PlanOptions::new(2)).unwrap();
        assert!(batches.iter().all(|b| b.token_estimate <= 2));
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn an_oversized_single_entry_still_gets_its_own_batch() {
        let long_text = "x".repeat(1000);
        let d = doc_with(&["short", long_text.as_str(), "short"]);
        let batches = plan(&d, Workflow::Structured, PlanOptions::new(10)).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].entry_indices, vec![2]);
    }

    #[test]
    fn context_windows_respect_document_edges() {
        let d = doc_with(&["a", "b", "c", "d", "e"]);
        let batches = plan(
            &d,
            Workflow::Structured,
            PlanOptions::new(1).with_context_size(2),
        )
        .unwrap();
        // Each batch holds exactly one entry at budget=1.
        assert_eq!(batches[0].context_before, Vec::<u32>::new());
        assert_eq!(batches[0].context_after, vec![2, 3]);
        assert_eq!(batches[2].context_before, vec![1, 2]);
        assert_eq!(batches[2].context_after, vec![4, 5]);
        assert_eq!(batches[4].context_after, Vec::<u32>::new());
    }

    #[test]
    fn single_batch_mode_emits_one_batch_with_no_context() {
        let d = doc_with(&["a", "b", "c"]);
        let batches = plan(&d, Workflow::Structured, PlanOptions::new(100).single_batch()).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].entry_indices, vec![1, 2, 3]);
        assert!(batches[0].context_before.is_empty());
    }

    #[test]
    fn single_batch_mode_fails_when_budget_exceeded() {
        let d = doc_with(&["a".repeat(100).as_str(); 5]);
        let err = plan(&d, Workflow::Structured, PlanOptions::new(1).single_batch()).unwrap_err();
        match err {
            PlanError::SinglePassTooLarge { needed, budget } => {
                assert!(needed > budget);
            }
        }
    }

    proptest::proptest! {
        #[test]
        fn partition_is_disjoint_and_exhaustive(lens in proptest::collection::vec(1usize..20, 1..40)) {
            let texts: Vec<String> = lens.iter().map(|n| "a".repeat(*n)).collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let d = doc_with(&refs);
            let batches = plan(&d, Workflow::Structured, PlanOptions::new(20)).unwrap();
            let mut seen: Vec<u32> = batches.iter().flat_map(|b| b.entry_indices.clone()).collect();
            let total: usize = batches.iter().map(|b| b.entry_indices.len()).sum();
            seen.sort_unstable();
            prop_assert_eq!(seen, d.indices());
            prop_assert_eq!(total, d.entries.len());
        }
    }
}
