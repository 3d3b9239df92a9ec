//! Batching planner types (spec.md §3/§4.3).

use serde::{Deserialize, Serialize};

/// One of the three timestamp-handling strategies (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Workflow {
    /// Send only text (entries numbered); timestamps re-applied from the
    /// source by index on return. Cheapest, smallest payloads.
    RebuildTimestamps,
    /// Send `{index, text}` tuples; provider returns the same shape;
    /// timestamps re-applied by index.
    Structured,
    /// Send `{index, start, end, text}`; provider may adjust timestamps;
    /// returned timestamps are authoritative.
    AiTimestamps,
}

impl Workflow {
    /// Stable identifier used in the fingerprint's `workflow-id` component.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RebuildTimestamps => "rebuild-timestamps",
            Self::Structured => "structured",
            Self::AiTimestamps => "ai-timestamps",
        }
    }

    /// Whether the provider's returned timestamps are authoritative
    /// (only true for [`Workflow::AiTimestamps`], per spec.md §5).
    #[must_use]
    pub fn provider_timestamps_authoritative(self) -> bool {
        matches!(self, Self::AiTimestamps)
    }
}

/// A contiguous slice of entries sent to a provider as one request
/// (spec.md §3). `entries` holds source indices, not borrowed references,
/// so a `Batch` can be constructed, serialized, and dispatched independently
/// of the originating `Document`'s lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Batch identifier, unique within one planning run.
    pub id: u32,
    /// Source entry indices this batch translates, in document order.
    pub entry_indices: Vec<u32>,
    /// Up to `contextSize` preceding entry indices, sent as read-only hints.
    pub context_before: Vec<u32>,
    /// Up to `contextSize` following entry indices, sent as read-only hints.
    pub context_after: Vec<u32>,
    /// Deterministic token estimate for `entry_indices` only (context
    /// entries are not counted against the budget).
    pub token_estimate: u32,
}

impl Batch {
    /// First source index in this batch, or `None` if empty.
    #[must_use]
    pub fn first_index(&self) -> Option<u32> {
        self.entry_indices.first().copied()
    }

    /// Last source index in this batch, or `None` if empty.
    #[must_use]
    pub fn last_index(&self) -> Option<u32> {
        self.entry_indices.last().copied()
    }
}
