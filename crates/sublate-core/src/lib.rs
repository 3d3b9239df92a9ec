#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Shared domain types for the subtitle translation pipeline core.
//!
//! This crate is the stable contract between the parser/serializer (C1),
//! cache & single-flight layer (C2), batching planner (C3), provider broker
//! (C4), and translation orchestrator (C5). It has no network or filesystem
//! I/O of its own.

/// Timed subtitle entries and the document they belong to.
pub mod entry;
/// Batching planner types (`Batch`, `Workflow`).
pub mod batch;
/// Content-addressed fingerprinting of translation requests.
pub mod fingerprint;
/// Translation parameters (`TranslationParameters`).
pub mod parameters;
/// Resumable per-batch progress (`Partial`).
pub mod partial;
/// Persisted outcomes (`FinalTranslationRecord`, `HistoryRecord`).
pub mod record;
/// The injectable `Clock`.
pub mod context;

pub use batch::{Batch, Workflow};
pub use context::{Clock, FakeClock, SystemClock};
pub use entry::{Document, Entry, Format};
pub use fingerprint::Fingerprint;
pub use parameters::{ReasoningEffort, Formality, TranslationParameters};
pub use partial::Partial;
pub use record::{FinalTranslationRecord, HistoryRecord};
