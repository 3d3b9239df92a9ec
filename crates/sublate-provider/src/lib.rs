#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Provider broker for the translation pipeline core (spec.md §4.4,
//! component C4).
//!
//! [`Broker`] wraps a single-attempt [`ProviderClient`] with capability
//! filtering, required-field validation, retry/backoff, API-key rotation,
//! and response-shape verification — the same split the backend layer uses
//! elsewhere in this workspace: a thin per-backend [`ProviderClient`]
//! (`crates/abp-backend-core::Backend`'s shape) plus policy that runs the
//! same way regardless of which provider is underneath.

use std::time::Duration;

use async_trait::async_trait;
use sublate_core::{Batch, Entry, TranslationParameters};
use sublate_error::ProviderError;

// ---------------------------------------------------------------------------
// Provider identity and capability table
// ---------------------------------------------------------------------------

/// A translation provider (spec.md §4.4's capability table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    /// Google Gemini.
    Gemini,
    /// OpenAI.
    OpenAi,
    /// Anthropic.
    Anthropic,
    /// DeepL.
    DeepL,
    /// Google Translate (non-LLM, no reasoning/formality/top-k knobs).
    GoogleTranslate,
    /// OpenRouter.
    OpenRouter,
    /// xAI.
    XAi,
    /// DeepSeek.
    DeepSeek,
    /// Mistral.
    Mistral,
    /// Cloudflare Workers AI.
    CfWorkers,
}

impl ProviderId {
    /// Stable lowercase identifier, e.g. for fingerprinting and logging.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::DeepL => "deepl",
            Self::GoogleTranslate => "googletranslate",
            Self::OpenRouter => "openrouter",
            Self::XAi => "xai",
            Self::DeepSeek => "deepseek",
            Self::Mistral => "mistral",
            Self::CfWorkers => "cfworkers",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which optional [`TranslationParameters`] fields a provider accepts
/// (spec.md §4.4's capability table). Unsupported fields are dropped
/// silently by [`apply_capability_filter`] rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Accepts `reasoning_effort`.
    pub reasoning_effort: bool,
    /// Accepts `thinking_budget`.
    pub thinking_budget: bool,
    /// Accepts `formality`.
    pub formality: bool,
    /// Accepts `top_k`.
    pub top_k: bool,
    /// Supports streamed responses.
    pub streaming: bool,
    /// Requires `source_lang` to be set (auto-detection unavailable).
    pub requires_source_lang: bool,
}

/// Look up `provider`'s capability row (spec.md §4.4 table).
#[must_use]
pub fn capability_table(provider: ProviderId) -> ProviderCapabilities {
    match provider {
        ProviderId::Gemini => ProviderCapabilities {
            reasoning_effort: false,
            thinking_budget: true,
            formality: false,
            top_k: true,
            streaming: true,
            requires_source_lang: false,
        },
        ProviderId::OpenAi => ProviderCapabilities {
            reasoning_effort: true,
            thinking_budget: false,
            formality: false,
            top_k: false,
            streaming: true,
            requires_source_lang: false,
        },
        ProviderId::Anthropic => ProviderCapabilities {
            reasoning_effort: false,
            thinking_budget: true,
            formality: false,
            top_k: false,
            streaming: true,
            requires_source_lang: false,
        },
        ProviderId::DeepL => ProviderCapabilities {
            reasoning_effort: false,
            thinking_budget: false,
            formality: true,
            top_k: false,
            streaming: false,
            requires_source_lang: true,
        },
        ProviderId::GoogleTranslate => ProviderCapabilities {
            reasoning_effort: false,
            thinking_budget: false,
            formality: false,
            top_k: false,
            streaming: false,
            requires_source_lang: false,
        },
        ProviderId::OpenRouter
        | ProviderId::XAi
        | ProviderId::DeepSeek
        | ProviderId::Mistral
        | ProviderId::CfWorkers => ProviderCapabilities {
            reasoning_effort: false,
            thinking_budget: false,
            formality: false,
            top_k: false,
            streaming: true,
            requires_source_lang: false,
        },
    }
}

/// Drop any [`TranslationParameters`] field `provider` does not support
/// (spec.md §4.4 "Unsupported parameters are dropped silently").
#[must_use]
pub fn apply_capability_filter(
    provider: ProviderId,
    params: &TranslationParameters,
) -> TranslationParameters {
    let caps = capability_table(provider);
    let mut filtered = params.clone();
    if !caps.reasoning_effort {
        filtered.reasoning_effort = None;
    }
    if !caps.thinking_budget {
        filtered.thinking_budget = None;
    }
    if !caps.formality {
        filtered.formality = None;
    }
    if !caps.top_k {
        filtered.top_k = None;
    }
    filtered
}

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

/// Everything [`ProviderClient::call`] needs beyond the batch itself
/// (spec.md §4.4 `request`).
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Target provider.
    pub provider_id: ProviderId,
    /// Provider-specific model identifier.
    pub model_id: String,
    /// Source language, required by some providers (e.g. DeepL).
    pub source_lang: Option<String>,
    /// Target language.
    pub target_lang: String,
    /// Optional system/instruction prompt override.
    pub prompt: Option<String>,
    /// Sampling/behavior parameters, already capability-filtered.
    pub parameters: TranslationParameters,
    /// Rotating pool of API keys; index 0 is tried first.
    pub api_key_pool: Vec<String>,
    /// Per-attempt request timeout.
    pub timeout: Duration,
}

impl ProviderRequest {
    fn validate_required(&self) -> Result<(), ProviderError> {
        let caps = capability_table(self.provider_id);
        if caps.requires_source_lang && self.source_lang.is_none() {
            return Err(ProviderError::InvalidRequest {
                reason: format!("{} requires an explicit source language", self.provider_id),
            });
        }
        Ok(())
    }
}

/// A provider's response to one batch (spec.md §4.4 `BatchResult`).
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Translated entries. Indices must exactly match the batch's
    /// `entry_indices`; timestamps are authoritative only for
    /// `ai-timestamps` workflows.
    pub entries: Vec<Entry>,
}

/// Verify `result` contains exactly the indices `batch` requested
/// (spec.md §4.4 "Output parsing").
///
/// # Errors
///
/// Returns [`ProviderError::ShapeMismatch`] listing any missing or extra
/// indices.
pub fn check_shape(batch: &Batch, result: &BatchResult) -> Result<(), ProviderError> {
    use std::collections::BTreeSet;
    let requested: BTreeSet<u32> = batch.entry_indices.iter().copied().collect();
    let returned: BTreeSet<u32> = result.entries.iter().map(|e| e.index).collect();

    let missing: Vec<u32> = requested.difference(&returned).copied().collect();
    let extra: Vec<u32> = returned.difference(&requested).copied().collect();
    if missing.is_empty() && extra.is_empty() {
        Ok(())
    } else {
        Err(ProviderError::ShapeMismatch { missing, extra })
    }
}

// ---------------------------------------------------------------------------
// ProviderClient: one single-attempt call to a specific provider
// ---------------------------------------------------------------------------

/// A single-attempt call to one provider's translation API. Implementors
/// do not retry or rotate keys themselves — [`Broker`] owns that policy.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Which provider this client calls.
    fn provider_id(&self) -> ProviderId;

    /// Attempt to translate `batch` once, using `api_key`.
    async fn call(
        &self,
        batch: &Batch,
        request: &ProviderRequest,
        api_key: &str,
    ) -> Result<BatchResult, ProviderError>;
}

// ---------------------------------------------------------------------------
// Retry / key-rotation policy
// ---------------------------------------------------------------------------

/// Retry and key-rotation policy (spec.md §4.4 "Retry & key rotation").
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Max retries for `Transient` errors (not counting key rotations).
    pub max_retries: u8,
    /// Initial backoff for `Transient` errors; doubles each retry.
    pub transient_base_backoff: Duration,
    /// Fallback backoff for `RateLimited` errors lacking `Retry-After`.
    pub rate_limit_fallback_backoff: Duration,
    /// Whether key rotation is permitted at all.
    pub key_rotation_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            transient_base_backoff: Duration::from_secs(1),
            rate_limit_fallback_backoff: Duration::from_secs(5),
            key_rotation_enabled: true,
        }
    }
}

/// Jittered backoff: `base * 2^attempt`, scaled by a uniform factor in
/// `0.75..=1.25` (spec.md §4.4 "doubling, jittered ±25%").
fn jittered_backoff(base: Duration, attempt: u32) -> Duration {
    use rand::Rng;
    let doubled = base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    doubled.mul_f64(jitter)
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Applies [`RetryPolicy`] around a [`ProviderClient`]: classifies errors,
/// retries transient failures with backoff, rotates API keys on rate
/// limiting or auth failure, and verifies response shape on success.
pub struct Broker<C: ProviderClient> {
    client: C,
    policy: RetryPolicy,
}

impl<C: ProviderClient> Broker<C> {
    /// Wrap `client` with the default [`RetryPolicy`].
    #[must_use]
    pub fn new(client: C) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
        }
    }

    /// Wrap `client` with a custom [`RetryPolicy`].
    #[must_use]
    pub fn with_policy(client: C, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Which provider the wrapped client calls.
    #[must_use]
    pub fn provider_id(&self) -> ProviderId {
        self.client.provider_id()
    }

    /// Translate one batch, applying capability filtering, retry/backoff,
    /// key rotation, and shape verification (spec.md §4.4).
    ///
    /// # Errors
    ///
    /// Returns the last [`ProviderError`] observed once retries and key
    /// rotations are exhausted, or immediately for non-retryable errors.
    pub async fn translate_batch(
        &self,
        batch: &Batch,
        request: &ProviderRequest,
    ) -> Result<BatchResult, ProviderError> {
        request.validate_required()?;
        if request.api_key_pool.is_empty() {
            return Err(ProviderError::InvalidRequest {
                reason: "no API key available".to_string(),
            });
        }

        let filtered_params = apply_capability_filter(request.provider_id, &request.parameters);
        let mut effective = request.clone();
        effective.parameters = filtered_params;

        let mut key_index = 0usize;
        let mut retries_used = 0u8;
        let mut key_rotations_used = 0usize;
        let mut auth_rotation_used = false;

        loop {
            let key = &effective.api_key_pool[key_index % effective.api_key_pool.len()];
            let outcome = self.client.call(batch, &effective, key).await;

            let result = match outcome {
                Ok(result) => result,
                Err(err) => {
                    match &err {
                        ProviderError::Transient { .. } => {
                            if retries_used >= self.policy.max_retries {
                                return Err(err);
                            }
                            let delay = jittered_backoff(self.policy.transient_base_backoff, u32::from(retries_used));
                            retries_used += 1;
                            tracing::warn!(provider = %request.provider_id, attempt = retries_used, "transient provider error, retrying");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        ProviderError::RateLimited { retry_after_secs } => {
                            let rotated = self.policy.key_rotation_enabled
                                && effective.api_key_pool.len() > 1
                                && key_rotations_used < effective.api_key_pool.len();
                            let delay = retry_after_secs
                                .map(Duration::from_secs)
                                .unwrap_or(self.policy.rate_limit_fallback_backoff);
                            if rotated {
                                key_index += 1;
                                key_rotations_used += 1;
                                tracing::warn!(provider = %request.provider_id, "rate limited, rotating key");
                            } else if retries_used >= self.policy.max_retries {
                                return Err(err);
                            } else {
                                retries_used += 1;
                            }
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        ProviderError::AuthFailed => {
                            let can_rotate = self.policy.key_rotation_enabled
                                && effective.api_key_pool.len() > 1
                                && !auth_rotation_used;
                            if can_rotate {
                                key_index += 1;
                                auth_rotation_used = true;
                                tracing::warn!(provider = %request.provider_id, "auth failed, rotating key once");
                                continue;
                            }
                            return Err(err);
                        }
                        ProviderError::InvalidRequest { .. }
                        | ProviderError::Rejected { .. }
                        | ProviderError::Fatal { .. }
                        | ProviderError::ShapeMismatch { .. } => return Err(err),
                    }
                }
            };

            check_shape(batch, &result)?;
            return Ok(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    fn entry(index: u32) -> Entry {
        Entry::new(index, StdDuration::ZERO, StdDuration::from_secs(1), "hi").unwrap()
    }

    fn batch(indices: &[u32]) -> Batch {
        Batch {
            id: 0,
            entry_indices: indices.to_vec(),
            context_before: vec![],
            context_after: vec![],
            token_estimate: 10,
        }
    }

    fn request(provider: ProviderId, keys: &[&str]) -> ProviderRequest {
        ProviderRequest {
            provider_id: provider,
            model_id: "m".to_string(),
            source_lang: Some("en".to_string()),
            target_lang: "fr".to_string(),
            prompt: None,
            parameters: TranslationParameters::default(),
            api_key_pool: keys.iter().map(|s| s.to_string()).collect(),
            timeout: StdDuration::from_secs(30),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            transient_base_backoff: StdDuration::from_millis(1),
            rate_limit_fallback_backoff: StdDuration::from_millis(1),
            key_rotation_enabled: true,
        }
    }

    #[test]
    fn capability_table_matches_spec_matrix() {
        assert!(capability_table(ProviderId::Gemini).thinking_budget);
        assert!(!capability_table(ProviderId::Gemini).reasoning_effort);
        assert!(capability_table(ProviderId::OpenAi).reasoning_effort);
        assert!(!capability_table(ProviderId::OpenAi).thinking_budget);
        assert!(capability_table(ProviderId::DeepL).formality);
        assert!(capability_table(ProviderId::DeepL).requires_source_lang);
        assert!(!capability_table(ProviderId::GoogleTranslate).streaming);
        assert!(capability_table(ProviderId::OpenRouter).streaming);
    }

    #[test]
    fn capability_filter_drops_unsupported_fields_silently() {
        let params = TranslationParameters {
            reasoning_effort: Some(sublate_core::ReasoningEffort::High),
            thinking_budget: Some(100),
            formality: Some(sublate_core::Formality::More),
            top_k: Some(5),
            ..Default::default()
        };
        let filtered = apply_capability_filter(ProviderId::OpenAi, &params);
        assert!(filtered.reasoning_effort.is_some());
        assert!(filtered.thinking_budget.is_none());
        assert!(filtered.formality.is_none());
        assert!(filtered.top_k.is_none());
    }

    #[test]
    fn deepl_without_source_lang_is_invalid_request() {
        let mut req = request(ProviderId::DeepL, &["k1"]);
        req.source_lang = None;
        let err = req.validate_required().unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));
    }

    #[test]
    fn shape_check_reports_missing_and_extra() {
        let b = batch(&[1, 2, 3]);
        let result = BatchResult {
            entries: vec![entry(1), entry(4)],
        };
        let err = check_shape(&b, &result).unwrap_err();
        match err {
            ProviderError::ShapeMismatch { missing, extra } => {
                assert_eq!(missing, vec![2, 3]);
                assert_eq!(extra, vec![4]);
            }
            _ => panic!("expected ShapeMismatch"),
        }
    }

    struct ScriptedClient {
        provider: ProviderId,
        scripted_errors: Mutex<VecDeque<ProviderError>>,
        calls: AtomicU32,
        keys_seen: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        /// `scripted_errors` is consumed front-to-back, one per call, until
        /// exhausted, at which point calls succeed.
        fn new(provider: ProviderId, scripted_errors: Vec<ProviderError>) -> Self {
            Self {
                provider,
                scripted_errors: Mutex::new(scripted_errors.into()),
                calls: AtomicU32::new(0),
                keys_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedClient {
        fn provider_id(&self) -> ProviderId {
            self.provider
        }

        async fn call(
            &self,
            batch: &Batch,
            _request: &ProviderRequest,
            api_key: &str,
        ) -> Result<BatchResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.keys_seen.lock().unwrap().push(api_key.to_string());
            let mut scripted = self.scripted_errors.lock().unwrap();
            if let Some(err) = scripted.pop_front() {
                return Err(err);
            }
            Ok(BatchResult {
                entries: batch.entry_indices.iter().map(|&i| entry(i)).collect(),
            })
        }
    }

    #[tokio::test]
    async fn transient_errors_retry_then_succeed() {
        let client = ScriptedClient::new(
            ProviderId::Anthropic,
            vec![
                ProviderError::Transient { reason: "boom".into() },
                ProviderError::Transient { reason: "boom".into() },
            ],
        );
        let broker = Broker::with_policy(client, fast_policy());
        let b = batch(&[1, 2]);
        let req = request(ProviderId::Anthropic, &["k1"]);
        let result = broker.translate_batch(&b, &req).await.unwrap();
        assert_eq!(result.entries.len(), 2);
        assert_eq!(broker.client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_errors_exhaust_retry_budget() {
        let client = ScriptedClient::new(
            ProviderId::Anthropic,
            vec![
                ProviderError::Transient { reason: "boom".into() },
                ProviderError::Transient { reason: "boom".into() },
                ProviderError::Transient { reason: "boom".into() },
            ],
        );
        let broker = Broker::with_policy(client, fast_policy());
        let b = batch(&[1]);
        let req = request(ProviderId::Anthropic, &["k1"]);
        let err = broker.translate_batch(&b, &req).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transient { .. }));
    }

    #[tokio::test]
    async fn rate_limited_rotates_key_before_retry_budget_is_spent() {
        let client = ScriptedClient::new(
            ProviderId::OpenAi,
            vec![ProviderError::RateLimited { retry_after_secs: None }],
        );
        let broker = Broker::with_policy(client, fast_policy());
        let b = batch(&[1]);
        let req = request(ProviderId::OpenAi, &["k1", "k2"]);
        let result = broker.translate_batch(&b, &req).await.unwrap();
        assert_eq!(result.entries.len(), 1);
        let keys = broker.client.keys_seen.lock().unwrap();
        assert_eq!(keys.as_slice(), ["k1", "k2"]);
    }

    #[tokio::test]
    async fn auth_failure_rotates_once_then_surfaces() {
        let client = ScriptedClient::new(
            ProviderId::OpenAi,
            vec![ProviderError::AuthFailed, ProviderError::AuthFailed],
        );
        let broker = Broker::with_policy(client, fast_policy());
        let b = batch(&[1]);
        let req = request(ProviderId::OpenAi, &["k1", "k2"]);
        let err = broker.translate_batch(&b, &req).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthFailed));
        assert_eq!(broker.client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalid_request_surfaces_immediately_without_retry() {
        let client = ScriptedClient::new(
            ProviderId::Anthropic,
            vec![ProviderError::Rejected { reason: "bad prompt".into() }],
        );
        let broker = Broker::with_policy(client, fast_policy());
        let b = batch(&[1]);
        let req = request(ProviderId::Anthropic, &["k1"]);
        let err = broker.translate_batch(&b, &req).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { .. }));
        assert_eq!(broker.client.calls.load(Ordering::SeqCst), 1);
    }
}
