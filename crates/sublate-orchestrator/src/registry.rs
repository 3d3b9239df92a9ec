//! Provider registry: maps a [`ProviderId`] to a ready-to-call translator
//! (spec.md §4.5 "dispatch").

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sublate_core::Batch;
use sublate_error::ProviderError;
use sublate_provider::{Broker, ProviderClient, ProviderId, ProviderRequest, BatchResult};

/// A provider a batch can be dispatched to, erasing the concrete
/// [`ProviderClient`] type so the orchestrator can hold heterogeneous
/// providers behind one map.
#[async_trait]
pub trait BatchTranslator: Send + Sync {
    /// Which provider this translator calls.
    fn provider_id(&self) -> ProviderId;

    /// Translate one batch, with retry/rotation already applied.
    async fn translate_batch(
        &self,
        batch: &Batch,
        request: &ProviderRequest,
    ) -> Result<BatchResult, ProviderError>;
}

#[async_trait]
impl<C: ProviderClient + 'static> BatchTranslator for Broker<C> {
    fn provider_id(&self) -> ProviderId {
        Broker::provider_id(self)
    }

    async fn translate_batch(
        &self,
        batch: &Batch,
        request: &ProviderRequest,
    ) -> Result<BatchResult, ProviderError> {
        Broker::translate_batch(self, batch, request).await
    }
}

/// A typed registry of named [`BatchTranslator`] implementations, keyed by
/// [`ProviderId`] (spec.md §6 `provider`/`secondaryProvider` selection).
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Arc<dyn BatchTranslator>>,
}

impl ProviderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `translator` under its own `provider_id()`, replacing any
    /// previous entry for that provider.
    pub fn register(&mut self, translator: impl BatchTranslator + 'static) {
        self.providers.insert(translator.provider_id(), Arc::new(translator));
    }

    /// Look up a translator by provider id.
    #[must_use]
    pub fn get(&self, provider: ProviderId) -> Option<Arc<dyn BatchTranslator>> {
        self.providers.get(&provider).cloned()
    }

    /// `true` if a translator is registered for `provider`.
    #[must_use]
    pub fn contains(&self, provider: ProviderId) -> bool {
        self.providers.contains_key(&provider)
    }

    /// Registered provider ids, unordered.
    #[must_use]
    pub fn list(&self) -> Vec<ProviderId> {
        self.providers.keys().copied().collect()
    }
}
