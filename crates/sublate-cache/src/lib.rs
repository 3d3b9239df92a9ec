#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Namespaced cache and single-flight layer for the translation pipeline
//! core (spec.md §4.2, component C2).
//!
//! [`StorageAdapter`] is the pluggable backend contract (spec.md §6),
//! implemented here by [`memory::MemoryStorage`], [`filesystem::FilesystemStorage`],
//! and [`redis::RedisStorage`]. [`Cache`] layers namespace policy (size
//! limits, TTL, LRU-to-80%-eviction) and the single-flight guarantee on top
//! of any adapter.

pub mod filesystem;
pub mod memory;
pub mod redis;
mod single_flight;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sublate_error::CacheError;

pub use single_flight::SingleFlight;

/// The four logical namespaces defined by spec.md §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Final translated documents, keyed by fingerprint. Never TTL-evicted.
    Translation,
    /// In-progress per-batch results, keyed by fingerprint. 1-hour TTL.
    Partial,
    /// Observability records, keyed by request id. 30-day TTL.
    History,
    /// Caller-owned state, keyed by opaque token. No core-enforced eviction.
    Session,
}

impl Namespace {
    /// Stable lowercase name, used as a path segment / key prefix.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Translation => "translation",
            Self::Partial => "partial",
            Self::History => "history",
            Self::Session => "session",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-namespace size/TTL/eviction policy (spec.md §4.2 table).
#[derive(Debug, Clone, Copy)]
pub struct NamespaceConfig {
    /// Byte budget enforced atomically on write.
    pub size_limit_bytes: u64,
    /// Time-to-live applied on `set`, if any. `None` means no TTL eviction.
    pub ttl: Option<Duration>,
    /// Whether this namespace is eligible for LRU-to-80%-of-limit eviction.
    pub lru_eviction: bool,
}

impl NamespaceConfig {
    /// `translation`: no TTL, LRU-to-80% eviction only.
    #[must_use]
    pub fn translation(size_limit_bytes: u64) -> Self {
        Self {
            size_limit_bytes,
            ttl: None,
            lru_eviction: true,
        }
    }

    /// `partial`: 1-hour TTL, LRU-to-80% eviction.
    #[must_use]
    pub fn partial(size_limit_bytes: u64) -> Self {
        Self {
            size_limit_bytes,
            ttl: Some(Duration::from_secs(3600)),
            lru_eviction: true,
        }
    }

    /// `history`: 30-day TTL, LRU-to-80% eviction.
    #[must_use]
    pub fn history(size_limit_bytes: u64) -> Self {
        Self {
            size_limit_bytes,
            ttl: Some(Duration::from_secs(30 * 24 * 3600)),
            lru_eviction: true,
        }
    }

    /// `session`: caller-supplied TTL, no core-enforced eviction.
    #[must_use]
    pub fn session(size_limit_bytes: u64, ttl: Option<Duration>) -> Self {
        Self {
            size_limit_bytes,
            ttl,
            lru_eviction: false,
        }
    }
}

/// Metadata accompanying a stored value (spec.md §6 `metadata(ns, key)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    /// Payload size in bytes.
    pub size: u64,
    /// When the entry was first written.
    pub created_at: DateTime<Utc>,
    /// When the entry was last read or written (the LRU touch time).
    pub last_accessed: DateTime<Utc>,
    /// Remaining TTL at the moment `metadata` was called, if the entry has one.
    pub ttl_remaining: Option<Duration>,
}

/// Pluggable storage backend contract (spec.md §6).
///
/// Backends are content-agnostic: JSON/bincode/whatever encoding is a
/// transport detail owned by the caller. All operations are scoped to a
/// single namespace.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Fetch a value, or `Ok(None)` if the key does not exist (or expired).
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Write a value, replacing any existing entry for `key`.
    async fn set(
        &self,
        ns: Namespace,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Remove a key. Never partially removes payload without its metadata.
    async fn delete(&self, ns: Namespace, key: &str) -> Result<(), CacheError>;

    /// List keys in `ns` whose name contains `pattern` as a substring.
    async fn list(&self, ns: Namespace, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Total bytes currently stored in `ns`.
    async fn size(&self, ns: Namespace) -> Result<u64, CacheError>;

    /// Metadata for a single key, or `Ok(None)` if absent.
    async fn metadata(
        &self,
        ns: Namespace,
        key: &str,
    ) -> Result<Option<CacheEntryMetadata>, CacheError>;

    /// Evict expired entries and enforce the namespace's LRU-to-80% policy.
    async fn cleanup(&self, ns: Namespace, config: NamespaceConfig) -> Result<(), CacheError>;

    /// Verify the backend is reachable and operational.
    async fn health_check(&self) -> Result<(), CacheError>;

    /// Release any held resources (connection pools, file handles).
    async fn close(&self) -> Result<(), CacheError>;
}

/// Namespace-policy-aware cache facade: the public surface the orchestrator
/// (C5) depends on. Wraps any [`StorageAdapter`] with size/TTL enforcement
/// and the single-flight guarantee (spec.md §4.2 "Single-flight guarantee").
pub struct Cache {
    adapter: std::sync::Arc<dyn StorageAdapter>,
    configs: [NamespaceConfig; 4],
    single_flight: SingleFlight,
}

impl Cache {
    /// Build a cache facade over `adapter`, with the given per-namespace
    /// policy (translation, partial, history, session, in that order).
    #[must_use]
    pub fn new(adapter: std::sync::Arc<dyn StorageAdapter>, configs: [NamespaceConfig; 4]) -> Self {
        Self {
            adapter,
            configs,
            single_flight: SingleFlight::new(),
        }
    }

    fn config(&self, ns: Namespace) -> NamespaceConfig {
        match ns {
            Namespace::Translation => self.configs[0],
            Namespace::Partial => self.configs[1],
            Namespace::History => self.configs[2],
            Namespace::Session => self.configs[3],
        }
    }

    /// Fetch a value.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StorageUnavailable`] if the backend fails.
    pub async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.adapter.get(ns, key).await
    }

    /// Write a value, applying the namespace's configured TTL, then run
    /// the namespace's eviction policy (spec.md §4.2 "LRU mechanics").
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StorageUnavailable`] if the backend fails.
    pub async fn set(&self, ns: Namespace, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let config = self.config(ns);
        self.adapter.set(ns, key, value, config.ttl).await?;
        if config.lru_eviction {
            self.adapter.cleanup(ns, config).await?;
        }
        Ok(())
    }

    /// Remove a key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StorageUnavailable`] if the backend fails.
    pub async fn delete(&self, ns: Namespace, key: &str) -> Result<(), CacheError> {
        self.adapter.delete(ns, key).await
    }

    /// List keys whose name contains `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StorageUnavailable`] if the backend fails.
    pub async fn list(&self, ns: Namespace, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.adapter.list(ns, pattern).await
    }

    /// Total bytes stored in `ns`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StorageUnavailable`] if the backend fails.
    pub async fn size(&self, ns: Namespace) -> Result<u64, CacheError> {
        self.adapter.size(ns).await
    }

    /// Metadata for a single key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StorageUnavailable`] if the backend fails.
    pub async fn metadata(
        &self,
        ns: Namespace,
        key: &str,
    ) -> Result<Option<CacheEntryMetadata>, CacheError> {
        self.adapter.metadata(ns, key).await
    }

    /// Verify backend reachability.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StorageUnavailable`] if the backend fails.
    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.adapter.health_check().await
    }

    /// Single-flight read-through: on a cache hit, return the cached value
    /// without invoking `producer`. On a miss, at most one concurrent
    /// caller per `(ns, key)` invokes `producer`; all others attach to its
    /// result (spec.md §4.2 "Single-flight guarantee").
    ///
    /// # Errors
    ///
    /// Propagates `producer`'s error, or a converted [`CacheError`] if the
    /// backend read/write fails.
    pub async fn get_or_compute<E, F, Fut>(
        &self,
        ns: Namespace,
        key: &str,
        producer: F,
    ) -> Result<Vec<u8>, E>
    where
        E: Clone + Send + From<CacheError> + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<Vec<u8>, E>> + Send,
    {
        if let Some(bytes) = self.adapter.get(ns, key).await.map_err(E::from)? {
            return Ok(bytes);
        }
        let config = self.config(ns);
        let flight_key = format!("{ns}:{key}");
        self.single_flight
            .run(&flight_key, producer, |bytes: &Vec<u8>| {
                let ns = ns;
                let key = key.to_string();
                let bytes = bytes.clone();
                let ttl = config.ttl;
                let adapter = self.adapter.clone();
                let lru_eviction = config.lru_eviction;
                async move {
                    adapter.set(ns, &key, bytes, ttl).await?;
                    if lru_eviction {
                        adapter.cleanup(ns, config).await?;
                    }
                    Ok::<(), CacheError>(())
                }
            })
            .await
    }
}
