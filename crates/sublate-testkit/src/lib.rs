//! In-memory test doubles for the translation pipeline core.
//!
//! These are the "include a no-op in-memory adapter for tests" / scriptable
//! backend doubles spec.md §9 calls for — no filesystem or network I/O, so
//! orchestrator tests run fast and deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sublate_core::Batch;
use sublate_error::ProviderError;
use sublate_provider::{BatchResult, Broker, ProviderClient, ProviderId, ProviderRequest};
use sublate_orchestrator::{BatchTranslator, ProviderRegistry};

/// In-memory `StorageAdapter`, re-exported from `sublate_cache` so callers
/// depend on one crate for test wiring instead of reaching into the cache
/// crate directly.
pub use sublate_cache::memory::MemoryStorage;
/// Injectable fake clock, re-exported from `sublate_core` for the same
/// reason.
pub use sublate_core::FakeClock;

/// One scripted response to a `ProviderClient::call`.
#[derive(Debug, Clone)]
pub struct ScriptedOutcome {
    /// What the call returns.
    pub result: Result<BatchResult, ProviderError>,
    /// Simulated provider latency before returning, if any.
    pub latency: Option<Duration>,
}

impl ScriptedOutcome {
    /// A successful outcome echoing `text` for every entry in the batch it's
    /// used against is not knowable ahead of time, so callers build the
    /// `BatchResult` themselves; this just wraps it with no latency.
    #[must_use]
    pub fn success(result: BatchResult) -> Self {
        Self {
            result: Ok(result),
            latency: None,
        }
    }

    /// A failing outcome with no latency.
    #[must_use]
    pub fn failure(err: ProviderError) -> Self {
        Self {
            result: Err(err),
            latency: None,
        }
    }

    /// Attach simulated latency to this outcome.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

/// A [`ProviderClient`] driven by a fixed script of outcomes, consumed one
/// per call in order. Once the script is exhausted, the last outcome
/// repeats indefinitely — scripting `[RateLimited, RateLimited, Success]`
/// expresses "rate-limited twice then succeeds" without having to predict
/// exactly how many calls a test will make beyond that point.
pub struct ScriptedClient {
    provider: ProviderId,
    script: Mutex<VecDeque<ScriptedOutcome>>,
    calls: AtomicU32,
}

impl ScriptedClient {
    /// Build a client that responds to calls with `outcomes`, in order.
    ///
    /// # Panics
    /// Panics if `outcomes` is empty — a script with nothing to say is
    /// always a test-authoring mistake.
    #[must_use]
    pub fn new(provider: ProviderId, outcomes: Vec<ScriptedOutcome>) -> Self {
        assert!(!outcomes.is_empty(), "ScriptedClient needs at least one outcome");
        Self {
            provider,
            script: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// A client that always succeeds with `result`.
    #[must_use]
    pub fn always(provider: ProviderId, result: BatchResult) -> Self {
        Self::new(provider, vec![ScriptedOutcome::success(result)])
    }

    /// Number of calls made so far.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    fn provider_id(&self) -> ProviderId {
        self.provider
    }

    async fn call(
        &self,
        _batch: &Batch,
        _request: &ProviderRequest,
        _api_key: &str,
    ) -> Result<BatchResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.pop_front().expect("checked len > 1 above")
            } else {
                script.front().cloned().expect("script is never empty")
            }
        };
        if let Some(latency) = outcome.latency {
            tokio::time::sleep(latency).await;
        }
        outcome.result
    }
}

/// Build a [`ProviderRegistry`] with a single scripted provider wrapped in
/// the real [`Broker`] retry/rotation policy — for tests that want retry
/// behavior exercised rather than stubbed out.
#[must_use]
pub fn scripted_registry(provider: ProviderId, outcomes: Vec<ScriptedOutcome>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Broker::new(ScriptedClient::new(provider, outcomes)));
    registry
}
