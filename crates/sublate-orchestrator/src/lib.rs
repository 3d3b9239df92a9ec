#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Translation orchestrator for the subtitle translation pipeline core
//! (spec.md §4.5, component C5).
//!
//! [`translate`] is the single entry point: fingerprint → cache lookup →
//! parse → resume partial → plan → dispatch with a bounded worker pool →
//! failover → verify/recover alignment → serialize → persist → history.

/// Cooperative cancellation token.
pub mod cancel;
/// `CoreContext`, the dependency bundle `translate` runs against.
pub mod context;
/// Bounded-concurrency batch dispatch.
pub mod dispatch;
/// Provider lookup by id.
pub mod registry;

pub use cancel::CancellationToken;
pub use context::CoreContext;
pub use dispatch::{BatchOutcome, Dispatcher, DEFAULT_CONCURRENCY, MAX_CONCURRENCY, MIN_CONCURRENCY};
pub use registry::{BatchTranslator, ProviderRegistry};

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sublate_cache::Namespace;
use sublate_core::{
    Batch, Document, Fingerprint, FinalTranslationRecord, Format, HistoryRecord, Partial,
    TranslationParameters, Workflow,
};
use sublate_error::{ProviderError, TranslateError};
use sublate_plan::{plan, token_estimate, PlanOptions};
use sublate_provider::{BatchResult, ProviderId, ProviderRequest};
use uuid::Uuid;

/// Cumulative rate-limit errors tolerated per provider before failover
/// (spec.md §4.5 step 7 `rateLimitBudget`).
pub const RATE_LIMIT_BUDGET: u32 = 5;
/// Floor on the "small enough to recover" missing-entry count (spec.md
/// §4.5 step 10, §9 Open Question #2).
pub const RECOVERY_THRESHOLD_MIN: usize = 5;
/// Fraction of the total entry count that scales the recovery threshold
/// above [`RECOVERY_THRESHOLD_MIN`] for larger documents.
pub const RECOVERY_THRESHOLD_FRACTION: f64 = 0.05;
/// Per-batch deadline used when the request does not set
/// `parameters.translation_timeout` (spec.md §5).
pub const DEFAULT_PER_BATCH_DEADLINE: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

/// Everything [`translate`] needs to run one request (spec.md §6 `request`).
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    /// Raw source subtitle bytes.
    pub source_bytes: Vec<u8>,
    /// Source container format.
    pub source_format: Format,
    /// Source language, if known; `None` means auto-detect.
    pub source_lang: Option<String>,
    /// Target language.
    pub target_lang: String,
    /// Primary provider.
    pub provider: ProviderId,
    /// Provider to fail over to if the primary is exhausted.
    pub secondary_provider: Option<ProviderId>,
    /// Provider-specific model identifier.
    pub model_id: String,
    /// Timestamp-handling strategy (spec.md §4.3).
    pub workflow: Workflow,
    /// Sampling/behavior parameters.
    pub parameters: TranslationParameters,
    /// System/instruction prompt.
    pub prompt: String,
    /// Rotating pool of API keys.
    pub api_key_pool: Vec<String>,
    /// Token budget passed to the batching planner.
    pub token_budget: u32,
    /// Context-window size passed to the batching planner.
    pub context_size: usize,
    /// Bypass the cache: delete any existing translation/partial entry for
    /// this fingerprint before proceeding (spec.md §4.5 "Force-refresh").
    pub force: bool,
    /// Overall deadline override. Defaults to
    /// `per_batch_deadline * max(batch_count, 2)` (spec.md §5).
    pub deadline: Option<Duration>,
}

/// What [`translate`] returns on success (spec.md §6 response shape).
#[derive(Debug, Clone)]
pub struct TranslateOutcome {
    /// Serialized translated document, in the source container format.
    pub bytes: Vec<u8>,
    /// Observability metadata about how the result was produced.
    pub metadata: TranslateMetadata,
}

/// Metadata accompanying a [`TranslateOutcome`] (spec.md §6 `metadata`).
#[derive(Debug, Clone)]
pub struct TranslateMetadata {
    /// Provider that produced (or last touched) the result.
    pub provider: String,
    /// Model used.
    pub model: String,
    /// `true` if served from the `translation` cache without invoking a
    /// provider at all.
    pub cached: bool,
    /// Number of translated entries.
    pub entry_count: usize,
    /// Wall-clock duration of the call.
    pub duration_ms: u64,
}

/// What gets stored under the `translation` namespace: enough to both
/// reconstruct the output bytes and answer a future cache hit's metadata
/// without re-running the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedTranslation {
    document: Document,
    record: FinalTranslationRecord,
}

/// Orchestration statistics not already captured by [`FinalTranslationRecord`],
/// carried out of [`run_pipeline`] for the [`HistoryRecord`] written on a
/// non-cached run.
#[derive(Debug, Default, Clone)]
struct RunStats {
    used_secondary: bool,
    primary_failure_reason: Option<String>,
    secondary_failure_reason: Option<String>,
    rate_limit_errors: u32,
    /// Key rotations performed by the broker are absorbed internally and
    /// not currently surfaced to this layer, so this is always `0`.
    key_rotations: u32,
    mismatch_detected: bool,
    missing_entries: usize,
    recovered_entries: usize,
    error_types: Vec<String>,
}

// ---------------------------------------------------------------------------
// translate()
// ---------------------------------------------------------------------------

/// Run one translation request end-to-end (spec.md §4.5).
///
/// # Errors
///
/// Returns [`TranslateError`] for parse failure, invalid request shape,
/// provider exhaustion, unrecoverable alignment mismatch, cooperative
/// cancellation, or unrecoverable cache backend failure.
pub async fn translate(
    ctx: &CoreContext,
    request: TranslateRequest,
    cancel: CancellationToken,
) -> Result<TranslateOutcome, TranslateError> {
    request.parameters.validate().map_err(|errs| TranslateError::InvalidRequest {
        reason: errs
            .into_iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; "),
    })?;

    let started_instant = ctx.clock.monotonic_now();
    let started_utc = ctx.clock.now_utc();
    let request_id = Uuid::new_v4();

    let fingerprint = Fingerprint::compute(
        &request.source_bytes,
        request.source_lang.as_deref(),
        &request.target_lang,
        request.provider.as_str(),
        &request.model_id,
        request.workflow,
        &request.parameters,
        &request.prompt,
    );
    let key = fingerprint.to_hex();

    if request.force {
        let _ = ctx.cache.delete(Namespace::Translation, &key).await;
        let _ = ctx.cache.delete(Namespace::Partial, &key).await;
    }

    let ran_producer = Arc::new(AtomicBool::new(false));
    let stats: Arc<Mutex<Option<RunStats>>> = Arc::new(Mutex::new(None));

    let produce = {
        let ctx = ctx.clone();
        let request = request.clone();
        let ran_producer = ran_producer.clone();
        let stats = stats.clone();
        let cancel = cancel.clone();
        move || async move {
            ran_producer.store(true, Ordering::SeqCst);
            let (cached, run_stats) =
                run_pipeline(&ctx, &request, fingerprint, started_utc, &cancel).await?;
            *stats.lock() = Some(run_stats);
            serde_json::to_vec(&cached)
                .map_err(|e| TranslateError::InvalidRequest { reason: e.to_string() })
        }
    };

    let cache_result = ctx
        .cache
        .get_or_compute::<TranslateError, _, _>(Namespace::Translation, &key, produce)
        .await;

    let bytes_json = match cache_result {
        Ok(bytes) => bytes,
        Err(TranslateError::StorageUnavailable(_)) if !ran_producer.load(Ordering::SeqCst) => {
            // The backend failed before any producer ran (the cache's own
            // read-through probe). Degrade to running the pipeline directly,
            // without the cache/single-flight guard, and best-effort persist
            // the result — never fail the call just because caching failed
            // once we have real output (spec.md §7).
            ran_producer.store(true, Ordering::SeqCst);
            let (cached, run_stats) =
                run_pipeline(ctx, &request, fingerprint, started_utc, &cancel).await?;
            *stats.lock() = Some(run_stats);
            let bytes = serde_json::to_vec(&cached)
                .map_err(|e| TranslateError::InvalidRequest { reason: e.to_string() })?;
            let _ = ctx.cache.set(Namespace::Translation, &key, bytes.clone()).await;
            bytes
        }
        Err(other) => return Err(other),
    };

    let cached_flag = !ran_producer.load(Ordering::SeqCst);
    let cached_translation: CachedTranslation = serde_json::from_slice(&bytes_json)
        .map_err(|e| TranslateError::InvalidRequest { reason: format!("corrupt cache entry: {e}") })?;
    let output_bytes = sublate_subtitle::serialize(&cached_translation.document);
    let duration_ms = ctx
        .clock
        .monotonic_now()
        .saturating_duration_since(started_instant)
        .as_millis() as u64;

    let history = if cached_flag {
        HistoryRecord::cache_hit(request_id, fingerprint, &cached_translation.record, duration_ms)
    } else {
        let run_stats = stats.lock().take().unwrap_or_default();
        HistoryRecord {
            request_id,
            fingerprint,
            provider: cached_translation.record.provider_used.clone(),
            model: cached_translation.record.model_used.clone(),
            workflow: cached_translation.record.workflow,
            entry_count: cached_translation.record.entry_count,
            duration_ms,
            cached: false,
            used_secondary: run_stats.used_secondary,
            primary_failure_reason: run_stats.primary_failure_reason,
            secondary_failure_reason: run_stats.secondary_failure_reason,
            rate_limit_errors: run_stats.rate_limit_errors,
            key_rotations: run_stats.key_rotations,
            mismatch_detected: run_stats.mismatch_detected,
            missing_entries: run_stats.missing_entries,
            recovered_entries: run_stats.recovered_entries,
            error_types: run_stats.error_types,
        }
    };
    // History is best-effort (spec.md §7): never fail the call over it.
    if let Ok(history_bytes) = serde_json::to_vec(&history) {
        let _ = ctx
            .cache
            .set(Namespace::History, &request_id.to_string(), history_bytes)
            .await;
    }

    Ok(TranslateOutcome {
        bytes: output_bytes,
        metadata: TranslateMetadata {
            provider: cached_translation.record.provider_used.clone(),
            model: cached_translation.record.model_used.clone(),
            cached: cached_flag,
            entry_count: cached_translation.record.entry_count,
            duration_ms,
        },
    })
}

fn build_provider_request(request: &TranslateRequest, provider: ProviderId) -> ProviderRequest {
    ProviderRequest {
        provider_id: provider,
        model_id: request.model_id.clone(),
        source_lang: request.source_lang.clone(),
        target_lang: request.target_lang.clone(),
        prompt: Some(request.prompt.clone()),
        parameters: request.parameters.clone(),
        api_key_pool: request.api_key_pool.clone(),
        timeout: request
            .parameters
            .translation_timeout
            .unwrap_or(DEFAULT_PER_BATCH_DEADLINE),
    }
}

/// Run the actual pipeline: parse, resume, plan, dispatch, failover,
/// verify/recover, assemble. Only invoked on a cache miss (or a storage
/// degradation fallback).
async fn run_pipeline(
    ctx: &CoreContext,
    request: &TranslateRequest,
    fingerprint: Fingerprint,
    started_utc: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<(CachedTranslation, RunStats), TranslateError> {
    let document = sublate_subtitle::parse(&request.source_bytes, request.source_format)?;

    let partial_key = fingerprint.to_hex();
    let mut partial = match ctx.cache.get(Namespace::Partial, &partial_key).await {
        Ok(Some(bytes)) => serde_json::from_slice::<Partial>(&bytes)
            .unwrap_or_else(|_| Partial::new(fingerprint, started_utc)),
        _ => Partial::new(fingerprint, started_utc),
    };

    let all_batches = plan(&document, request.workflow, PlanOptions::new(request.token_budget).with_context_size(request.context_size))?;
    let per_batch_deadline = request
        .parameters
        .translation_timeout
        .unwrap_or(DEFAULT_PER_BATCH_DEADLINE);
    let overall_deadline = request
        .deadline
        .unwrap_or_else(|| per_batch_deadline * (all_batches.len().max(2) as u32));

    let body = run_waves_and_assemble(
        ctx,
        request,
        &document,
        all_batches,
        &mut partial,
        &partial_key,
        per_batch_deadline,
        cancel,
    );

    match tokio::time::timeout(overall_deadline, body).await {
        Ok(result) => result,
        Err(_) => Err(TranslateError::Cancelled),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_waves_and_assemble(
    ctx: &CoreContext,
    request: &TranslateRequest,
    document: &Document,
    all_batches: Vec<Batch>,
    partial: &mut Partial,
    partial_key: &str,
    per_batch_deadline: Duration,
    cancel: &CancellationToken,
) -> Result<(CachedTranslation, RunStats), TranslateError> {
    let mut stats = RunStats::default();

    let pending: VecDeque<Batch> = all_batches
        .iter()
        .filter(|b| !partial.is_batch_complete(b.id))
        .cloned()
        .collect();

    let primary = ctx.providers.get(request.provider).ok_or_else(|| TranslateError::InvalidRequest {
        reason: format!("no translator registered for provider {}", request.provider),
    })?;

    let mut error_types = Vec::new();
    let mut failed_batches = Vec::new();
    let mut primary_failure_reason: Option<String> = None;

    if !pending.is_empty() {
        let queue = Arc::new(Mutex::new(pending));
        let stop = Arc::new(AtomicBool::new(false));
        let provider_request = Arc::new(build_provider_request(request, request.provider));
        let dispatcher = Dispatcher::new(DEFAULT_CONCURRENCY);
        let mut rx = dispatcher.run(
            primary.clone(),
            provider_request,
            queue.clone(),
            stop.clone(),
            cancel.clone(),
            per_batch_deadline,
        );

        while let Some(outcome) = rx.recv().await {
            match outcome.result {
                Ok(result) => {
                    partial.record_batch(outcome.batch.id, result.entries, ctx.clock.now_utc());
                    persist_partial(ctx, partial_key, partial).await;
                }
                Err(err) => {
                    error_types.push(err.code().as_str().to_string());
                    failed_batches.push(outcome.batch);
                    if let ProviderError::RateLimited { .. } = &err {
                        stats.rate_limit_errors += 1;
                        if stats.rate_limit_errors > RATE_LIMIT_BUDGET {
                            primary_failure_reason = Some(err.to_string());
                            stop.store(true, Ordering::SeqCst);
                        }
                    } else {
                        primary_failure_reason = Some(err.to_string());
                        stop.store(true, Ordering::SeqCst);
                    }
                }
            }
            if cancel.is_cancelled() {
                return Err(TranslateError::Cancelled);
            }
        }

        if primary_failure_reason.is_some() {
            failed_batches.extend(queue.lock().drain(..));
        }
    }

    let mut active_translator = primary;
    let mut active_provider = request.provider;

    if let Some(primary_reason) = primary_failure_reason.clone() {
        stats.primary_failure_reason = Some(primary_reason.clone());
        let Some(secondary_id) = request.secondary_provider else {
            return Err(TranslateError::ProviderExhausted {
                primary_failure_reason: primary_reason,
                secondary_failure_reason: None,
            });
        };
        let secondary = ctx.providers.get(secondary_id).ok_or_else(|| TranslateError::InvalidRequest {
            reason: format!("no translator registered for provider {secondary_id}"),
        })?;

        let retry_queue = Arc::new(Mutex::new(VecDeque::from(failed_batches)));
        let stop = Arc::new(AtomicBool::new(false));
        let provider_request = Arc::new(build_provider_request(request, secondary_id));
        let dispatcher = Dispatcher::new(DEFAULT_CONCURRENCY);
        let mut rx = dispatcher.run(
            secondary.clone(),
            provider_request,
            retry_queue,
            stop.clone(),
            cancel.clone(),
            per_batch_deadline,
        );

        let mut secondary_failure_reason: Option<String> = None;
        while let Some(outcome) = rx.recv().await {
            match outcome.result {
                Ok(result) => {
                    partial.record_batch(outcome.batch.id, result.entries, ctx.clock.now_utc());
                    persist_partial(ctx, partial_key, partial).await;
                }
                Err(err) => {
                    error_types.push(err.code().as_str().to_string());
                    secondary_failure_reason = Some(err.to_string());
                    stop.store(true, Ordering::SeqCst);
                }
            }
            if cancel.is_cancelled() {
                return Err(TranslateError::Cancelled);
            }
        }

        if let Some(reason) = secondary_failure_reason {
            stats.secondary_failure_reason = Some(reason.clone());
            return Err(TranslateError::ProviderExhausted {
                primary_failure_reason: primary_reason,
                secondary_failure_reason: Some(reason),
            });
        }

        stats.used_secondary = true;
        active_translator = secondary;
        active_provider = secondary_id;
    }

    // Verify alignment (spec.md §4.5 step 9/10).
    let source_indices = document.indices();
    let candidate_indices: BTreeSet<u32> = partial
        .per_batch_results
        .values()
        .flatten()
        .map(|e| e.index)
        .collect();
    let missing: Vec<u32> = source_indices
        .iter()
        .filter(|i| !candidate_indices.contains(i))
        .copied()
        .collect();

    if !missing.is_empty() {
        let total = source_indices.len();
        let threshold =
            RECOVERY_THRESHOLD_MIN.max((RECOVERY_THRESHOLD_FRACTION * total as f64).ceil() as usize);
        if missing.len() > threshold {
            return Err(TranslateError::AlignmentUnrecoverable {
                missing_count: missing.len(),
                total_count: total,
            });
        }

        stats.mismatch_detected = true;
        stats.missing_entries = missing.len();

        let by_index: HashMap<u32, &sublate_core::Entry> =
            document.entries.iter().map(|e| (e.index, e)).collect();
        let token_estimate_total: u32 = missing
            .iter()
            .filter_map(|i| by_index.get(i))
            .map(|e| token_estimate(&e.text))
            .sum();
        let recovery_batch = Batch {
            id: u32::MAX,
            entry_indices: missing.clone(),
            context_before: vec![],
            context_after: vec![],
            token_estimate: token_estimate_total,
        };
        let recovery_request = build_provider_request(request, active_provider);
        match active_translator.translate_batch(&recovery_batch, &recovery_request).await {
            Ok(result) => {
                partial.record_batch(recovery_batch.id, result.entries, ctx.clock.now_utc());
                persist_partial(ctx, partial_key, partial).await;
                stats.recovered_entries = missing.len();
            }
            Err(err) => {
                error_types.push(err.code().as_str().to_string());
                return Err(TranslateError::AlignmentUnrecoverable {
                    missing_count: missing.len(),
                    total_count: total,
                });
            }
        }
    }

    stats.error_types = error_types;

    let mut final_entries = partial.all_entries();
    final_entries.sort_by_key(|e| e.index);
    if !request.workflow.provider_timestamps_authoritative() {
        let original: HashMap<u32, (std::time::Duration, std::time::Duration)> = document
            .entries
            .iter()
            .map(|e| (e.index, (e.start, e.end)))
            .collect();
        for e in &mut final_entries {
            if let Some(&(start, end)) = original.get(&e.index) {
                e.start = start;
                e.end = end;
            }
        }
    }

    let mut final_document = Document::new(document.format, document.header.clone());
    for entry in final_entries {
        final_document.push_entry(entry).map_err(|_| TranslateError::AlignmentUnrecoverable {
            missing_count: 0,
            total_count: source_indices.len(),
        })?;
    }

    let completed_at = ctx.clock.now_utc();
    let record = FinalTranslationRecord {
        fingerprint,
        entries: final_document.entries.clone(),
        provider_used: active_provider.to_string(),
        model_used: request.model_id.clone(),
        workflow: request.workflow,
        entry_count: final_document.len(),
        created_at: started_utc,
        completed_at,
    };

    // Translation complete: the partial no longer needs to survive.
    let _ = ctx.cache.delete(Namespace::Partial, partial_key).await;

    Ok((
        CachedTranslation {
            document: final_document,
            record,
        },
        stats,
    ))
}

async fn persist_partial(ctx: &CoreContext, partial_key: &str, partial: &Partial) {
    if let Ok(bytes) = serde_json::to_vec(partial) {
        let _ = ctx.cache.set(Namespace::Partial, partial_key, bytes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use sublate_cache::memory::MemoryStorage;
    use sublate_cache::{Cache, NamespaceConfig};
    use sublate_core::{Entry, SystemClock};
    use std::time::Duration as StdDuration;

    fn test_context() -> CoreContext {
        let cache = Arc::new(Cache::new(
            Arc::new(MemoryStorage::new()),
            [
                NamespaceConfig::translation(10_000_000),
                NamespaceConfig::partial(10_000_000),
                NamespaceConfig::history(10_000_000),
                NamespaceConfig::session(10_000_000, None),
            ],
        ));
        CoreContext::new(cache, Arc::new(ProviderRegistry::new()), Arc::new(SystemClock))
    }

    fn srt_source() -> Vec<u8> {
        b"1\n00:00:00,000 --> 00:00:01,000\nhello\n\n2\n00:00:01,000 --> 00:00:02,000\nworld\n\n3\n00:00:02,000 --> 00:00:03,000\nagain\n".to_vec()
    }

    fn base_request() -> TranslateRequest {
        TranslateRequest {
            source_bytes: srt_source(),
            source_format: Format::Srt,
            source_lang: Some("en".into()),
            target_lang: "fr".into(),
            provider: ProviderId::Gemini,
            secondary_provider: None,
            model_id: "m1".into(),
            workflow: Workflow::Structured,
            parameters: TranslationParameters::default(),
            prompt: "translate".into(),
            api_key_pool: vec!["k1".into()],
            token_budget: 1000,
            context_size: 0,
            force: false,
            deadline: None,
        }
    }

    struct AlwaysSucceeds {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BatchTranslator for AlwaysSucceeds {
        fn provider_id(&self) -> ProviderId {
            ProviderId::Gemini
        }
        async fn translate_batch(
            &self,
            batch: &Batch,
            _request: &ProviderRequest,
        ) -> Result<BatchResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(BatchResult {
                entries: batch
                    .entry_indices
                    .iter()
                    .map(|&i| Entry::new(i, StdDuration::ZERO, StdDuration::from_secs(1), format!("t{i}")).unwrap())
                    .collect(),
            })
        }
    }

    #[tokio::test]
    async fn clean_miss_translates_and_caches() {
        let mut ctx = test_context();
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ProviderRegistry::new();
        registry.register(AlwaysSucceeds { calls: calls.clone() });
        ctx.providers = Arc::new(registry);

        let outcome = translate(&ctx, base_request(), CancellationToken::new()).await.unwrap();
        assert!(!outcome.metadata.cached);
        assert_eq!(outcome.metadata.entry_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_identical_call_is_a_cache_hit() {
        let mut ctx = test_context();
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ProviderRegistry::new();
        registry.register(AlwaysSucceeds { calls: calls.clone() });
        ctx.providers = Arc::new(registry);

        let first = translate(&ctx, base_request(), CancellationToken::new()).await.unwrap();
        assert!(!first.metadata.cached);
        let second = translate(&ctx, base_request(), CancellationToken::new()).await.unwrap();
        assert!(second.metadata.cached);
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
