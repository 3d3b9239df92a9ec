//! Per-key producer coalescing (spec.md §4.2 "Single-flight guarantee").
//!
//! Modeled on `CancellationToken`'s `Arc<Notify>` + poll-loop pattern
//! (`crates/abp-runtime/src/cancel.rs`): a waiter checks for a result,
//! awaits a notification, then re-checks, rather than blocking on a single
//! future the producer fulfills directly.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sublate_error::CacheError;
use tokio::sync::Notify;

struct Slot {
    notify: Notify,
    value: OnceLock<Box<dyn Any + Send + Sync>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            value: OnceLock::new(),
        }
    }
}

/// Coalesces concurrent callers of [`Cache::get_or_compute`](crate::Cache::get_or_compute)
/// keyed by an arbitrary string (here, `"{namespace}:{key}"`).
pub struct SingleFlight {
    inflight: DashMap<String, Arc<Slot>>,
}

impl SingleFlight {
    /// An empty single-flight table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Run `producer` for `key` if no producer is already in flight;
    /// otherwise await the in-flight producer's result. On success,
    /// `on_write` persists the value before other waiters are released.
    pub async fn run<E, F, Fut, W, WFut>(&self, key: &str, producer: F, on_write: W) -> Result<Vec<u8>, E>
    where
        E: Clone + Send + Sync + 'static,
        E: From<CacheError>,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>, E>> + Send,
        W: FnOnce(&Vec<u8>) -> WFut + Send,
        WFut: Future<Output = Result<(), CacheError>> + Send,
    {
        loop {
            if let Some(entry) = self.inflight.get(key) {
                let slot = entry.value().clone();
                drop(entry);
                loop {
                    let notified = slot.notify.notified();
                    if let Some(result) = Self::extract::<E>(&slot) {
                        return result;
                    }
                    notified.await;
                }
            }

            let slot = Arc::new(Slot::new());
            match self.inflight.entry(key.to_string()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(vacant) => {
                    vacant.insert(slot.clone());
                }
            }

            let result = producer().await;
            if let Ok(bytes) = &result {
                if let Err(err) = on_write(bytes).await {
                    tracing::warn!(%key, error = %err, "single-flight: persisting producer result failed");
                }
            }
            let _ = slot.value.set(Box::new(result.clone()));
            slot.notify.notify_waiters();
            self.inflight.remove(key);
            return result;
        }
    }

    fn extract<E: Clone + Send + Sync + 'static>(slot: &Slot) -> Option<Result<Vec<u8>, E>> {
        slot.value
            .get()
            .and_then(|boxed| boxed.downcast_ref::<Result<Vec<u8>, E>>())
            .cloned()
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}
