//! In-memory storage backend.
//!
//! Grounded on `sideseat-sideseat/server/src/data/cache/memory.rs`'s use of
//! `dashmap` for concurrent key access, adapted with an explicit
//! access-order index (rather than relying on an automatic-eviction cache
//! like moka) so the LRU-to-80%-of-limit policy in spec.md §4.2 can be
//! enforced exactly, which `cleanup` below verifies against the
//! configured size limit.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use sublate_error::CacheError;
use tokio::time::Instant;

use crate::{CacheEntryMetadata, Namespace, NamespaceConfig, StorageAdapter};

struct StoredEntry {
    value: Vec<u8>,
    created_at: chrono::DateTime<Utc>,
    last_accessed: chrono::DateTime<Utc>,
    expires_at: Option<Instant>,
    ttl: Option<Duration>,
}

/// In-memory [`StorageAdapter`], backed by one [`DashMap`] per namespace
/// plus a manually-maintained access-order queue for LRU eviction.
pub struct MemoryStorage {
    namespaces: [NamespaceState; 4],
}

struct NamespaceState {
    entries: DashMap<String, StoredEntry>,
    access_order: Mutex<VecDeque<String>>,
    size: AtomicU64,
}

impl NamespaceState {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
            access_order: Mutex::new(VecDeque::new()),
            size: AtomicU64::new(0),
        }
    }

    fn touch(&self, key: &str) {
        let mut order = self.access_order.lock();
        order.retain(|k| k != key);
        order.push_back(key.to_string());
    }
}

impl MemoryStorage {
    /// An empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            namespaces: [
                NamespaceState::new(),
                NamespaceState::new(),
                NamespaceState::new(),
                NamespaceState::new(),
            ],
        }
    }

    fn state(&self, ns: Namespace) -> &NamespaceState {
        match ns {
            Namespace::Translation => &self.namespaces[0],
            Namespace::Partial => &self.namespaces[1],
            Namespace::History => &self.namespaces[2],
            Namespace::Session => &self.namespaces[3],
        }
    }

    fn is_expired(entry: &StoredEntry) -> bool {
        entry.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let state = self.state(ns);
        let Some(mut entry) = state.entries.get_mut(key) else {
            return Ok(None);
        };
        if Self::is_expired(&entry) {
            drop(entry);
            state.entries.remove(key);
            return Ok(None);
        }
        entry.last_accessed = Utc::now();
        let value = entry.value.clone();
        drop(entry);
        state.touch(key);
        Ok(Some(value))
    }

    async fn set(
        &self,
        ns: Namespace,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let state = self.state(ns);
        let new_size = value.len() as u64;
        if let Some(old) = state.entries.get(key) {
            state.size.fetch_sub(old.value.len() as u64, Ordering::SeqCst);
        }
        let now = Utc::now();
        state.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                created_at: now,
                last_accessed: now,
                expires_at: ttl.map(|d| Instant::now() + d),
                ttl,
            },
        );
        state.size.fetch_add(new_size, Ordering::SeqCst);
        state.touch(key);
        Ok(())
    }

    async fn delete(&self, ns: Namespace, key: &str) -> Result<(), CacheError> {
        let state = self.state(ns);
        if let Some((_, entry)) = state.entries.remove(key) {
            state.size.fetch_sub(entry.value.len() as u64, Ordering::SeqCst);
            state.access_order.lock().retain(|k| k != key);
        }
        Ok(())
    }

    async fn list(&self, ns: Namespace, pattern: &str) -> Result<Vec<String>, CacheError> {
        let state = self.state(ns);
        Ok(state
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| pattern.is_empty() || k.contains(pattern))
            .collect())
    }

    async fn size(&self, ns: Namespace) -> Result<u64, CacheError> {
        Ok(self.state(ns).size.load(Ordering::SeqCst))
    }

    async fn metadata(
        &self,
        ns: Namespace,
        key: &str,
    ) -> Result<Option<CacheEntryMetadata>, CacheError> {
        let state = self.state(ns);
        let Some(entry) = state.entries.get(key) else {
            return Ok(None);
        };
        if Self::is_expired(&entry) {
            return Ok(None);
        }
        let ttl_remaining = match entry.expires_at {
            Some(deadline) => Some(deadline.saturating_duration_since(Instant::now())),
            None => None,
        };
        Ok(Some(CacheEntryMetadata {
            size: entry.value.len() as u64,
            created_at: entry.created_at,
            last_accessed: entry.last_accessed,
            ttl_remaining,
        }))
    }

    async fn cleanup(&self, ns: Namespace, config: NamespaceConfig) -> Result<(), CacheError> {
        let state = self.state(ns);

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|e| Self::is_expired(e.value()))
            .map(|e| e.key().clone())
            .collect();
        for key in &expired {
            self.delete(ns, key).await?;
        }

        if !config.lru_eviction {
            return Ok(());
        }
        let target = (config.size_limit_bytes as f64 * 0.8) as u64;
        if state.size.load(Ordering::SeqCst) <= config.size_limit_bytes {
            return Ok(());
        }
        loop {
            if state.size.load(Ordering::SeqCst) <= target {
                break;
            }
            let oldest = {
                let mut order = state.access_order.lock();
                order.pop_front()
            };
            let Some(oldest) = oldest else { break };
            self.delete(ns, &oldest).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let store = MemoryStorage::new();
        store
            .set(Namespace::Translation, "k", b"v".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(
            store.get(Namespace::Translation, "k").await.unwrap(),
            Some(b"v".to_vec())
        );
        store.delete(Namespace::Translation, "k").await.unwrap();
        assert_eq!(store.get(Namespace::Translation, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = MemoryStorage::new();
        store
            .set(Namespace::Translation, "k", b"t".to_vec(), None)
            .await
            .unwrap();
        store
            .set(Namespace::Partial, "k", b"p".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(
            store.get(Namespace::Translation, "k").await.unwrap(),
            Some(b"t".to_vec())
        );
        assert_eq!(
            store.get(Namespace::Partial, "k").await.unwrap(),
            Some(b"p".to_vec())
        );
    }

    #[tokio::test]
    async fn cleanup_evicts_down_to_80_percent_of_limit() {
        let store = MemoryStorage::new();
        let config = NamespaceConfig::translation(100);
        for i in 0..10 {
            store
                .set(Namespace::Translation, &format!("k{i}"), vec![0u8; 10], None)
                .await
                .unwrap();
        }
        assert_eq!(store.size(Namespace::Translation).await.unwrap(), 100);
        store.cleanup(Namespace::Translation, config).await.unwrap();
        let size = store.size(Namespace::Translation).await.unwrap();
        assert!(size <= 80, "expected size <= 80, got {size}");
    }

    #[tokio::test]
    async fn cleanup_evicts_oldest_touched_first() {
        let store = MemoryStorage::new();
        store
            .set(Namespace::Translation, "old", vec![0u8; 50], None)
            .await
            .unwrap();
        store
            .set(Namespace::Translation, "new", vec![0u8; 50], None)
            .await
            .unwrap();
        store
            .set(Namespace::Translation, "newest", vec![0u8; 50], None)
            .await
            .unwrap();
        store
            .cleanup(Namespace::Translation, NamespaceConfig::translation(100))
            .await
            .unwrap();
        assert_eq!(store.get(Namespace::Translation, "old").await.unwrap(), None);
        assert!(store.get(Namespace::Translation, "newest").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn metadata_reports_size_and_timestamps() {
        let store = MemoryStorage::new();
        store
            .set(Namespace::History, "h1", b"record".to_vec(), None)
            .await
            .unwrap();
        let meta = store.metadata(Namespace::History, "h1").await.unwrap().unwrap();
        assert_eq!(meta.size, 6);
        assert!(meta.ttl_remaining.is_none());
    }
}
