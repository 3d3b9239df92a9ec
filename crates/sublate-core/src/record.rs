//! Persisted outcomes: the `translation` namespace's payload and the
//! `history` namespace's observability record (spec.md §3).

use crate::batch::Workflow;
use crate::entry::Entry;
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Written once on success, read-only thereafter. Evicted by LRU/size
/// policy only — never by TTL (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalTranslationRecord {
    /// Fingerprint this translation was computed for.
    pub fingerprint: Fingerprint,
    /// Translated entries, sorted by source index.
    pub entries: Vec<Entry>,
    /// Provider that produced (or last touched, after failover) the result.
    pub provider_used: String,
    /// Model used.
    pub model_used: String,
    /// Workflow used.
    pub workflow: Workflow,
    /// Number of source entries translated.
    pub entry_count: usize,
    /// When the orchestration began.
    pub created_at: DateTime<Utc>,
    /// When the orchestration completed.
    pub completed_at: DateTime<Utc>,
}

/// Observability record written on pipeline completion, success or failure
/// (spec.md §3). 30-day TTL, enforced by the cache layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Request id this record belongs to (the `history` namespace key).
    pub request_id: uuid::Uuid,
    /// Fingerprint of the request.
    pub fingerprint: Fingerprint,
    /// Provider attempted (primary, unless failover occurred before any
    /// attempt — see `used_secondary`).
    pub provider: String,
    /// Model used.
    pub model: String,
    /// Workflow used.
    pub workflow: Workflow,
    /// Number of source entries.
    pub entry_count: usize,
    /// Wall-clock duration of the orchestration.
    pub duration_ms: u64,
    /// `true` if served from the `translation` cache without invoking the
    /// broker.
    pub cached: bool,
    /// `true` if the secondary provider was used for any batch.
    pub used_secondary: bool,
    /// Why the primary provider was abandoned, if it was.
    pub primary_failure_reason: Option<String>,
    /// Why the secondary provider failed, if it did.
    pub secondary_failure_reason: Option<String>,
    /// Count of rate-limit errors observed across all providers.
    pub rate_limit_errors: u32,
    /// Count of API-key rotations performed.
    pub key_rotations: u32,
    /// `true` if alignment recovery (spec.md §4.5 step 10) was triggered.
    pub mismatch_detected: bool,
    /// Entries missing before recovery.
    pub missing_entries: usize,
    /// Entries successfully recovered.
    pub recovered_entries: usize,
    /// Distinct provider error kinds observed, for diagnostics.
    pub error_types: Vec<String>,
}

impl HistoryRecord {
    /// A record for a pure cache hit — no broker invocation at all
    /// (spec.md §4.5, "Cache hit path").
    #[must_use]
    pub fn cache_hit(
        request_id: uuid::Uuid,
        fingerprint: Fingerprint,
        record: &FinalTranslationRecord,
        duration_ms: u64,
    ) -> Self {
        Self {
            request_id,
            fingerprint,
            provider: record.provider_used.clone(),
            model: record.model_used.clone(),
            workflow: record.workflow,
            entry_count: record.entry_count,
            duration_ms,
            cached: true,
            used_secondary: false,
            primary_failure_reason: None,
            secondary_failure_reason: None,
            rate_limit_errors: 0,
            key_rotations: 0,
            mismatch_detected: false,
            missing_entries: 0,
            recovered_entries: 0,
            error_types: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::TranslationParameters;

    fn fp() -> Fingerprint {
        Fingerprint::compute(
            b"x", None, "fr", "p", "m", Workflow::Structured,
            &TranslationParameters::default(), "",
        )
    }

    #[test]
    fn cache_hit_record_has_no_broker_activity() {
        let final_record = FinalTranslationRecord {
            fingerprint: fp(),
            entries: vec![],
            provider_used: "deepl".into(),
            model_used: "default".into(),
            workflow: Workflow::Structured,
            entry_count: 0,
            created_at: Utc::now(),
            completed_at: Utc::now(),
        };
        let h = HistoryRecord::cache_hit(uuid::Uuid::nil(), fp(), &final_record, 5);
        assert!(h.cached);
        assert!(!h.used_secondary);
        assert_eq!(h.rate_limit_errors, 0);
        assert_eq!(h.key_rotations, 0);
    }
}
