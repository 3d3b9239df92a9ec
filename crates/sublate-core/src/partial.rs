//! Resumable per-batch progress (spec.md §3).

use crate::entry::Entry;
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// In-progress per-batch results for resumption, keyed by fingerprint in the
/// `partial` cache namespace. Created on first batch success, discarded on
/// full completion or TTL (1 hour, enforced by the cache layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partial {
    /// Fingerprint this partial belongs to.
    pub fingerprint: Fingerprint,
    /// Batch ids that have completed successfully.
    pub completed_batches: BTreeSet<u32>,
    /// Translated entries per completed batch, in the order the provider
    /// (or recovery pass) returned them.
    pub per_batch_results: BTreeMap<u32, Vec<Entry>>,
    /// Timestamp of the most recent batch completion.
    pub updated_at: DateTime<Utc>,
}

impl Partial {
    /// Start a new, empty partial for `fingerprint`.
    #[must_use]
    pub fn new(fingerprint: Fingerprint, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            completed_batches: BTreeSet::new(),
            per_batch_results: BTreeMap::new(),
            updated_at: now,
        }
    }

    /// Record a successfully translated batch.
    pub fn record_batch(&mut self, batch_id: u32, entries: Vec<Entry>, now: DateTime<Utc>) {
        self.completed_batches.insert(batch_id);
        self.per_batch_results.insert(batch_id, entries);
        self.updated_at = now;
    }

    /// `true` if `batch_id` has already completed (used to skip re-dispatch
    /// on resumption, spec.md §4.5 step 4).
    #[must_use]
    pub fn is_batch_complete(&self, batch_id: u32) -> bool {
        self.completed_batches.contains(&batch_id)
    }

    /// All translated entries across completed batches, unsorted (callers
    /// re-sort by source index before assembling the final document).
    #[must_use]
    pub fn all_entries(&self) -> Vec<Entry> {
        self.per_batch_results.values().flatten().cloned().collect()
    }
}
