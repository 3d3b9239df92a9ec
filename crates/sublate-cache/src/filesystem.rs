//! Filesystem storage backend (spec.md §6).
//!
//! One file per key under `<baseDir>/<ns>/<sha256-hex(key)>.blob`, with a
//! sibling `.meta` JSON file holding size/timestamps/TTL. Writes go through
//! a temp file in the same directory, `fsync`, then atomic rename — the
//! same durability shape as `crates/abp-runtime/src/store.rs`'s receipt
//! persistence, upgraded with `fsync` per spec.md §6's atomicity
//! requirement. Keys are hashed into filenames rather than sanitized by
//! path-traversal filtering: this is strictly stronger than the spec's
//! literal `realpath`-after-join check, since a hash can never contain a
//! path separator.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sublate_error::CacheError;

use crate::{CacheEntryMetadata, Namespace, NamespaceConfig, StorageAdapter};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileMetadata {
    key: String,
    size: u64,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    ttl_secs: Option<u64>,
}

impl FileMetadata {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.ttl_secs
            .map(|secs| self.created_at + chrono::Duration::seconds(secs as i64))
    }

    fn is_expired(&self) -> bool {
        match self.expires_at() {
            Some(deadline) => Utc::now() >= deadline,
            None => false,
        }
    }
}

fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

fn io_err(context: &str, err: std::io::Error) -> CacheError {
    CacheError::StorageUnavailable {
        reason: format!("{context}: {err}"),
    }
}

/// Filesystem-backed [`StorageAdapter`].
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    /// Root directory under which `<ns>/<hash>.blob`/`.meta` pairs live.
    /// Created on first write if absent.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn ns_dir(&self, ns: Namespace) -> PathBuf {
        self.root.join(ns.as_str())
    }

    fn paths(&self, ns: Namespace, key: &str) -> (PathBuf, PathBuf) {
        let dir = self.ns_dir(ns);
        let hashed = hash_key(key);
        (dir.join(format!("{hashed}.blob")), dir.join(format!("{hashed}.meta")))
    }

    fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
        let dir = path.parent().expect("path always has a namespace parent dir");
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn read_meta(meta_path: &Path) -> std::io::Result<Option<FileMetadata>> {
        match std::fs::read(meta_path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove_pair(blob: &Path, meta: &Path) -> std::io::Result<()> {
        match std::fs::remove_file(blob) {
            Ok(()) | Err(_) if !blob.exists() => {}
            Err(e) => return Err(e),
        }
        match std::fs::remove_file(meta) {
            Ok(()) | Err(_) if !meta.exists() => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageAdapter for FilesystemStorage {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let (blob, meta_path) = self.paths(ns, key);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let Some(mut meta) = Self::read_meta(&meta_path).map_err(|e| io_err("read meta", e))?
            else {
                return Ok(None);
            };
            if meta.is_expired() {
                Self::remove_pair(&blob, &meta_path).map_err(|e| io_err("remove expired", e))?;
                return Ok(None);
            }
            let data = match std::fs::read(&blob) {
                Ok(d) => d,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(io_err("read blob", e)),
            };
            meta.last_accessed = Utc::now();
            meta.key = key;
            let json = serde_json::to_vec(&meta)
                .map_err(|e| CacheError::StorageUnavailable { reason: e.to_string() })?;
            Self::write_atomic(&meta_path, &json).map_err(|e| io_err("touch meta", e))?;
            Ok(Some(data))
        })
        .await
        .map_err(|e| CacheError::StorageUnavailable { reason: e.to_string() })?
    }

    async fn set(
        &self,
        ns: Namespace,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let (blob, meta_path) = self.paths(ns, key);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let now = Utc::now();
            let meta = FileMetadata {
                key,
                size: value.len() as u64,
                created_at: now,
                last_accessed: now,
                ttl_secs: ttl.map(|d| d.as_secs()),
            };
            Self::write_atomic(&blob, &value).map_err(|e| io_err("write blob", e))?;
            let json = serde_json::to_vec(&meta)
                .map_err(|e| CacheError::StorageUnavailable { reason: e.to_string() })?;
            Self::write_atomic(&meta_path, &json).map_err(|e| io_err("write meta", e))?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::StorageUnavailable { reason: e.to_string() })?
    }

    async fn delete(&self, ns: Namespace, key: &str) -> Result<(), CacheError> {
        let (blob, meta_path) = self.paths(ns, key);
        tokio::task::spawn_blocking(move || {
            Self::remove_pair(&blob, &meta_path).map_err(|e| io_err("delete", e))
        })
        .await
        .map_err(|e| CacheError::StorageUnavailable { reason: e.to_string() })?
    }

    async fn list(&self, ns: Namespace, pattern: &str) -> Result<Vec<String>, CacheError> {
        let dir = self.ns_dir(ns);
        let pattern = pattern.to_string();
        tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            let entries = match std::fs::read_dir(&dir) {
                Ok(d) => d,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(io_err("list dir", e)),
            };
            for entry in entries {
                let entry = entry.map_err(|e| io_err("list entry", e))?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                    continue;
                }
                if let Some(meta) = Self::read_meta(&path).map_err(|e| io_err("read meta", e))? {
                    if !meta.is_expired() && (pattern.is_empty() || meta.key.contains(&pattern)) {
                        keys.push(meta.key);
                    }
                }
            }
            Ok(keys)
        })
        .await
        .map_err(|e| CacheError::StorageUnavailable { reason: e.to_string() })?
    }

    async fn size(&self, ns: Namespace) -> Result<u64, CacheError> {
        let dir = self.ns_dir(ns);
        tokio::task::spawn_blocking(move || {
            let entries = match std::fs::read_dir(&dir) {
                Ok(d) => d,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
                Err(e) => return Err(io_err("size dir", e)),
            };
            let mut total = 0u64;
            for entry in entries {
                let entry = entry.map_err(|e| io_err("size entry", e))?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                    continue;
                }
                if let Some(meta) = Self::read_meta(&path).map_err(|e| io_err("read meta", e))? {
                    if !meta.is_expired() {
                        total += meta.size;
                    }
                }
            }
            Ok(total)
        })
        .await
        .map_err(|e| CacheError::StorageUnavailable { reason: e.to_string() })?
    }

    async fn metadata(
        &self,
        ns: Namespace,
        key: &str,
    ) -> Result<Option<CacheEntryMetadata>, CacheError> {
        let (_, meta_path) = self.paths(ns, key);
        tokio::task::spawn_blocking(move || {
            let Some(meta) = Self::read_meta(&meta_path).map_err(|e| io_err("read meta", e))?
            else {
                return Ok(None);
            };
            if meta.is_expired() {
                return Ok(None);
            }
            let ttl_remaining = meta.expires_at().map(|deadline| {
                (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
            });
            Ok(Some(CacheEntryMetadata {
                size: meta.size,
                created_at: meta.created_at,
                last_accessed: meta.last_accessed,
                ttl_remaining,
            }))
        })
        .await
        .map_err(|e| CacheError::StorageUnavailable { reason: e.to_string() })?
    }

    async fn cleanup(&self, ns: Namespace, config: NamespaceConfig) -> Result<(), CacheError> {
        let dir = self.ns_dir(ns);
        tokio::task::spawn_blocking(move || {
            let entries = match std::fs::read_dir(&dir) {
                Ok(d) => d,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(io_err("cleanup dir", e)),
            };
            let mut live: Vec<(PathBuf, PathBuf, FileMetadata)> = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| io_err("cleanup entry", e))?;
                let meta_path = entry.path();
                if meta_path.extension().and_then(|e| e.to_str()) != Some("meta") {
                    continue;
                }
                let blob_path = meta_path.with_extension("blob");
                let Some(meta) =
                    Self::read_meta(&meta_path).map_err(|e| io_err("read meta", e))?
                else {
                    continue;
                };
                if meta.is_expired() {
                    Self::remove_pair(&blob_path, &meta_path)
                        .map_err(|e| io_err("remove expired", e))?;
                    continue;
                }
                live.push((blob_path, meta_path, meta));
            }

            if !config.lru_eviction {
                return Ok(());
            }
            let total: u64 = live.iter().map(|(_, _, m)| m.size).sum();
            if total <= config.size_limit_bytes {
                return Ok(());
            }
            live.sort_by_key(|(_, _, m)| m.last_accessed);
            let target = (config.size_limit_bytes as f64 * 0.8) as u64;
            let mut remaining = total;
            for (blob_path, meta_path, meta) in live {
                if remaining <= target {
                    break;
                }
                Self::remove_pair(&blob_path, &meta_path).map_err(|e| io_err("evict", e))?;
                remaining -= meta.size;
            }
            Ok(())
        })
        .await
        .map_err(|e| CacheError::StorageUnavailable { reason: e.to_string() })?
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root).map_err(|e| io_err("health check", e))
        })
        .await
        .map_err(|e| CacheError::StorageUnavailable { reason: e.to_string() })?
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
