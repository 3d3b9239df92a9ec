//! `CoreContext`: the dependency bundle threaded through `translate`
//! (spec.md §9, "ambient mutable state → explicit config").

use std::sync::Arc;

use sublate_cache::Cache;
use sublate_core::Clock;

use crate::registry::ProviderRegistry;

/// Everything one call to [`crate::translate`] needs beyond the request
/// itself. Built once by the caller (CLI, service, test) and cloned cheaply
/// per call — every field is an `Arc`.
///
/// There is deliberately no `logger` field: this crate logs ambiently via
/// `tracing` macros, the same way [`sublate_provider::Broker`] already does,
/// rather than threading an injected logger handle through every call.
#[derive(Clone)]
pub struct CoreContext {
    /// Namespaced cache + single-flight layer (C2).
    pub cache: Arc<Cache>,
    /// Registered provider translators (C4, wrapped).
    pub providers: Arc<ProviderRegistry>,
    /// Source of wall-clock time, injected so tests control TTL/deadline
    /// behavior without real sleeps.
    pub clock: Arc<dyn Clock>,
}

impl CoreContext {
    /// Assemble a context from its parts.
    #[must_use]
    pub fn new(cache: Arc<Cache>, providers: Arc<ProviderRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            providers,
            clock,
        }
    }
}
