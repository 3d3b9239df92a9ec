//! Bounded-concurrency worker pool for batch dispatch (spec.md §5).
//!
//! A [`Dispatcher`] drains a shared queue of [`Batch`]es across a fixed
//! number of workers, each calling a [`BatchTranslator`] under a per-batch
//! deadline, and streams results back as they complete so the orchestrator
//! can react mid-wave (stop feeding a failing primary, switch providers)
//! without waiting for the whole wave to finish.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sublate_core::Batch;
use sublate_error::ProviderError;
use sublate_provider::{BatchResult, ProviderRequest};
use tokio::sync::mpsc;

use crate::cancel::CancellationToken;
use crate::registry::BatchTranslator;

/// The result of dispatching one batch.
pub struct BatchOutcome {
    /// The batch that was dispatched.
    pub batch: Batch,
    /// Its translation result.
    pub result: Result<BatchResult, ProviderError>,
}

/// Minimum worker-pool size (spec.md §5: "default 3, max 5").
pub const MIN_CONCURRENCY: usize = 1;
/// Maximum worker-pool size (spec.md §5: "default 3, max 5").
pub const MAX_CONCURRENCY: usize = 5;
/// Default worker-pool size (spec.md §5/§6 `DEFAULT_WORKER_CONCURRENCY`).
pub const DEFAULT_CONCURRENCY: usize = 3;

/// A bounded-concurrency worker pool over a shared batch queue.
pub struct Dispatcher {
    concurrency: usize,
}

impl Dispatcher {
    /// Build a dispatcher, clamping `concurrency` into `1..=5`.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY),
        }
    }

    /// Spawn `self.concurrency` workers draining `queue` against
    /// `translator`. Each worker checks `stop`/`cancel` before popping the
    /// next batch, never mid-flight — a batch already dispatched always
    /// runs to completion (success, provider error, or per-batch deadline).
    ///
    /// Returns a receiver yielding one [`BatchOutcome`] per completed
    /// batch; the channel closes once the queue is drained (or
    /// `stop`/`cancel` fired) and every worker has exited.
    #[must_use]
    pub fn run(
        &self,
        translator: Arc<dyn BatchTranslator>,
        request: Arc<ProviderRequest>,
        queue: Arc<Mutex<VecDeque<Batch>>>,
        stop: Arc<AtomicBool>,
        cancel: CancellationToken,
        per_batch_deadline: Duration,
    ) -> mpsc::UnboundedReceiver<BatchOutcome> {
        let (tx, rx) = mpsc::unbounded_channel();

        for _ in 0..self.concurrency {
            let translator = translator.clone();
            let request = request.clone();
            let queue = queue.clone();
            let stop = stop.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                loop {
                    if stop.load(Ordering::SeqCst) || cancel.is_cancelled() {
                        break;
                    }
                    let batch = queue.lock().pop_front();
                    let Some(batch) = batch else {
                        break;
                    };

                    let result = match tokio::time::timeout(
                        per_batch_deadline,
                        translator.translate_batch(&batch, &request),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Transient {
                            reason: "batch deadline exceeded".to_string(),
                        }),
                    };

                    if tx.send(BatchOutcome { batch, result }).is_err() {
                        break;
                    }
                }
            });
        }

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use sublate_core::Entry;
    use sublate_provider::ProviderId;

    struct CountingTranslator {
        calls: AtomicU32,
    }

    #[async_trait]
    impl BatchTranslator for CountingTranslator {
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
                    .map(|&i| Entry::new(i, Duration::ZERO, Duration::from_secs(1), "x").unwrap())
                    .collect(),
            })
        }
    }

    fn batch(id: u32, indices: &[u32]) -> Batch {
        Batch {
            id,
            entry_indices: indices.to_vec(),
            context_before: vec![],
            context_after: vec![],
            token_estimate: indices.len() as u32,
        }
    }

    fn request() -> Arc<ProviderRequest> {
        Arc::new(ProviderRequest {
            provider_id: ProviderId::Gemini,
            model_id: "m".into(),
            source_lang: None,
            target_lang: "fr".into(),
            prompt: None,
            parameters: Default::default(),
            api_key_pool: vec!["k".into()],
            timeout: Duration::from_secs(30),
        })
    }

    #[test]
    fn concurrency_clamps_into_default_bounds() {
        assert_eq!(Dispatcher::new(0).concurrency, MIN_CONCURRENCY);
        assert_eq!(Dispatcher::new(99).concurrency, MAX_CONCURRENCY);
        assert_eq!(Dispatcher::new(3).concurrency, 3);
    }

    #[tokio::test]
    async fn drains_every_batch_exactly_once() {
        let translator: Arc<dyn BatchTranslator> =
            Arc::new(CountingTranslator { calls: AtomicU32::new(0) });
        let queue = Arc::new(Mutex::new(VecDeque::from(vec![
            batch(0, &[1]),
            batch(1, &[2]),
            batch(2, &[3]),
        ])));
        let stop = Arc::new(AtomicBool::new(false));
        let dispatcher = Dispatcher::new(2);
        let mut rx = dispatcher.run(
            translator,
            request(),
            queue,
            stop,
            CancellationToken::new(),
            Duration::from_secs(5),
        );

        let mut seen = Vec::new();
        while let Some(outcome) = rx.recv().await {
            seen.push(outcome.batch.id);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn stop_flag_halts_further_dispatch() {
        let translator: Arc<dyn BatchTranslator> =
            Arc::new(CountingTranslator { calls: AtomicU32::new(0) });
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let stop = Arc::new(AtomicBool::new(true));
        queue.lock().push_back(batch(0, &[1]));
        let dispatcher = Dispatcher::new(1);
        let mut rx = dispatcher.run(
            translator,
            request(),
            queue.clone(),
            stop,
            CancellationToken::new(),
            Duration::from_secs(5),
        );
        assert!(rx.recv().await.is_none());
        assert_eq!(queue.lock().len(), 1);
    }
}
