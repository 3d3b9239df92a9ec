//! Configuration loading, validation, and merging for the translation
//! pipeline core (spec.md §6's env-var surface + TOML file).
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML, or an environment
    /// variable held a value of the wrong shape (e.g. a non-numeric port).
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems, collected).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },

    /// Two configs could not be merged because of conflicting constraints.
    #[error("merge conflict: {reason}")]
    MergeConflict {
        /// Description of the conflict.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A deprecated field was used in the configuration.
    DeprecatedField {
        /// Name of the deprecated field.
        field: String,
        /// Suggested replacement, if any.
        suggestion: Option<String>,
    },
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// A cache namespace limit is unusually large.
    LargeCacheLimit {
        /// Namespace name (`translation`, `partial`, `history`).
        namespace: String,
        /// Limit value in bytes.
        bytes: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::DeprecatedField { field, suggestion } => {
                write!(f, "deprecated field '{field}'")?;
                if let Some(s) = suggestion {
                    write!(f, " — use '{s}' instead")?;
                }
                Ok(())
            }
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeCacheLimit { namespace, bytes } => {
                write!(f, "cache namespace '{namespace}' has a large limit ({bytes} bytes)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Storage backend selection for the cache layer (spec.md §6 `STORAGE_TYPE`).
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Temp-file-plus-rename filesystem backend.
    Filesystem,
    /// `deadpool-redis`-backed remote backend.
    Redis,
}

/// Redis connection settings, only consulted when [`StorageType::Redis`] is
/// selected (spec.md §6 `REDIS_*`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RedisSettings {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Optional password (`AUTH`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Logical database index.
    #[serde(default)]
    pub db: u8,
    /// Key prefix applied to every cache key, so multiple deployments can
    /// safely share one Redis instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            key_prefix: None,
        }
    }
}

/// Top-level runtime configuration for the translation pipeline core.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TranslationConfig {
    /// Byte limit for the `Translation` cache namespace.
    #[serde(default = "default_cache_limit_translation")]
    pub cache_limit_translation: u64,
    /// Byte limit for the `Partial` cache namespace.
    #[serde(default = "default_cache_limit_partial")]
    pub cache_limit_partial: u64,
    /// Byte limit for the `History` cache namespace.
    #[serde(default = "default_cache_limit_history")]
    pub cache_limit_history: u64,

    /// Which `StorageAdapter` backend to construct.
    #[serde(default)]
    pub storage_type: StorageType,
    /// Redis connection settings, used only when `storage_type = "redis"`.
    #[serde(default)]
    pub redis: RedisSettings,

    /// Default `max_output_tokens` applied when a request omits it.
    #[serde(default = "default_max_output_tokens")]
    pub default_max_output_tokens: u32,
    /// Hard ceiling no request's `max_output_tokens` may exceed.
    #[serde(default = "default_max_output_token_limit")]
    pub max_output_token_limit: u32,

    /// Default dispatcher worker-pool size (clamped 1..=5).
    #[serde(default = "default_worker_concurrency")]
    pub default_worker_concurrency: usize,
    /// Default `max_entries_per_batch` for the planner.
    #[serde(default = "default_batch_max_entries")]
    pub default_batch_max_entries: usize,
    /// Default `context_size` for the planner (0..=10).
    #[serde(default)]
    pub default_context_size: usize,

    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

fn default_cache_limit_translation() -> u64 {
    512 * 1024 * 1024
}
fn default_cache_limit_partial() -> u64 {
    128 * 1024 * 1024
}
fn default_cache_limit_history() -> u64 {
    256 * 1024 * 1024
}
fn default_max_output_tokens() -> u32 {
    65_536
}
fn default_max_output_token_limit() -> u32 {
    200_000
}
fn default_worker_concurrency() -> usize {
    3
}
fn default_batch_max_entries() -> usize {
    50
}

impl Default for StorageType {
    fn default() -> Self {
        StorageType::Filesystem
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            cache_limit_translation: default_cache_limit_translation(),
            cache_limit_partial: default_cache_limit_partial(),
            cache_limit_history: default_cache_limit_history(),
            storage_type: StorageType::default(),
            redis: RedisSettings::default(),
            default_max_output_tokens: default_max_output_tokens(),
            max_output_token_limit: default_max_output_token_limit(),
            default_worker_concurrency: default_worker_concurrency(),
            default_batch_max_entries: default_batch_max_entries(),
            default_context_size: 0,
            log_level: Some("info".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MIN_WORKER_CONCURRENCY: usize = 1;
const MAX_WORKER_CONCURRENCY: usize = 5;
const MAX_CONTEXT_SIZE: usize = 10;
const LARGE_CACHE_LIMIT_THRESHOLD_BYTES: u64 = 4 * 1024 * 1024 * 1024;
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`TranslationConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`TranslationConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<TranslationConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => TranslationConfig::default(),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Parse a TOML string into a [`TranslationConfig`].
pub fn parse_toml(content: &str) -> Result<TranslationConfig, ConfigError> {
    toml::from_str::<TranslationConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides (spec.md §6).
///
/// Recognised variables: `CACHE_LIMIT_TRANSLATION`, `CACHE_LIMIT_PARTIAL`,
/// `CACHE_LIMIT_HISTORY`, `STORAGE_TYPE`, `REDIS_HOST`, `REDIS_PORT`,
/// `REDIS_PASSWORD`, `REDIS_DB`, `REDIS_KEY_PREFIX`,
/// `DEFAULT_MAX_OUTPUT_TOKENS`, `MAX_OUTPUT_TOKEN_LIMIT`,
/// `DEFAULT_WORKER_CONCURRENCY`, `DEFAULT_BATCH_MAX_ENTRIES`,
/// `DEFAULT_CONTEXT_SIZE`, `SUBLATE_LOG_LEVEL`.
///
/// A present-but-malformed variable (non-numeric, unrecognised enum value)
/// fails the whole load with [`ConfigError::ParseError`] rather than
/// silently falling back to the prior value.
pub fn apply_env_overrides(config: &mut TranslationConfig) -> Result<(), ConfigError> {
    if let Some(v) = env_u64("CACHE_LIMIT_TRANSLATION")? {
        config.cache_limit_translation = v;
    }
    if let Some(v) = env_u64("CACHE_LIMIT_PARTIAL")? {
        config.cache_limit_partial = v;
    }
    if let Some(v) = env_u64("CACHE_LIMIT_HISTORY")? {
        config.cache_limit_history = v;
    }
    if let Ok(val) = std::env::var("STORAGE_TYPE") {
        config.storage_type = match val.to_lowercase().as_str() {
            "filesystem" => StorageType::Filesystem,
            "redis" => StorageType::Redis,
            other => {
                return Err(ConfigError::ParseError {
                    reason: format!("STORAGE_TYPE: unrecognised value '{other}'"),
                });
            }
        };
    }
    if let Ok(val) = std::env::var("REDIS_HOST") {
        config.redis.host = val;
    }
    if let Some(v) = env_parsed::<u16>("REDIS_PORT")? {
        config.redis.port = v;
    }
    if let Ok(val) = std::env::var("REDIS_PASSWORD") {
        config.redis.password = Some(val);
    }
    if let Some(v) = env_parsed::<u8>("REDIS_DB")? {
        config.redis.db = v;
    }
    if let Ok(val) = std::env::var("REDIS_KEY_PREFIX") {
        config.redis.key_prefix = Some(val);
    }
    if let Some(v) = env_parsed::<u32>("DEFAULT_MAX_OUTPUT_TOKENS")? {
        config.default_max_output_tokens = v;
    }
    if let Some(v) = env_parsed::<u32>("MAX_OUTPUT_TOKEN_LIMIT")? {
        config.max_output_token_limit = v;
    }
    if let Some(v) = env_parsed::<usize>("DEFAULT_WORKER_CONCURRENCY")? {
        config.default_worker_concurrency = v;
    }
    if let Some(v) = env_parsed::<usize>("DEFAULT_BATCH_MAX_ENTRIES")? {
        config.default_batch_max_entries = v;
    }
    if let Some(v) = env_parsed::<usize>("DEFAULT_CONTEXT_SIZE")? {
        config.default_context_size = v;
    }
    if let Ok(val) = std::env::var("SUBLATE_LOG_LEVEL") {
        config.log_level = Some(val);
    }
    Ok(())
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    env_parsed::<u64>(name)
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(val) => val
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::ParseError {
                reason: format!("{name}: expected a number, got '{val}'"),
            }),
        Err(_) => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (out-of-range concurrency/context size, an inverted token
/// ceiling) are returned as a [`ConfigError::ValidationError`]; soft issues
/// come back as warnings.
pub fn validate_config(config: &TranslationConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }

    if !(MIN_WORKER_CONCURRENCY..=MAX_WORKER_CONCURRENCY).contains(&config.default_worker_concurrency) {
        errors.push(format!(
            "default_worker_concurrency {} out of range ({MIN_WORKER_CONCURRENCY}..={MAX_WORKER_CONCURRENCY})",
            config.default_worker_concurrency
        ));
    }

    if config.default_context_size > MAX_CONTEXT_SIZE {
        errors.push(format!(
            "default_context_size {} out of range (0..={MAX_CONTEXT_SIZE})",
            config.default_context_size
        ));
    }

    if config.default_batch_max_entries == 0 {
        errors.push("default_batch_max_entries must be at least 1".to_string());
    }

    if config.default_max_output_tokens > config.max_output_token_limit {
        errors.push(format!(
            "default_max_output_tokens ({}) exceeds max_output_token_limit ({})",
            config.default_max_output_tokens, config.max_output_token_limit
        ));
    }

    if config.storage_type == StorageType::Redis && config.redis.host.trim().is_empty() {
        errors.push("storage_type is 'redis' but redis.host is empty".to_string());
    }

    if config.storage_type == StorageType::Redis && config.redis.password.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "redis.password".to_string(),
            hint: "connecting to Redis without AUTH".to_string(),
        });
    }

    for (namespace, bytes) in [
        ("translation", config.cache_limit_translation),
        ("partial", config.cache_limit_partial),
        ("history", config.cache_limit_history),
    ] {
        if bytes > LARGE_CACHE_LIMIT_THRESHOLD_BYTES {
            warnings.push(ConfigWarning::LargeCacheLimit {
                namespace: namespace.to_string(),
                bytes,
            });
        }
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Values in `overlay` take precedence over `base`
/// wherever `overlay` differs from [`TranslationConfig::default()`] for that
/// field — scalar fields have no "unset" representation, so a field left at
/// its default in the overlay is treated as "not specified" and falls back
/// to `base`.
#[must_use]
pub fn merge_configs(base: TranslationConfig, overlay: TranslationConfig) -> TranslationConfig {
    let default = TranslationConfig::default();
    TranslationConfig {
        cache_limit_translation: pick(overlay.cache_limit_translation, base.cache_limit_translation, default.cache_limit_translation),
        cache_limit_partial: pick(overlay.cache_limit_partial, base.cache_limit_partial, default.cache_limit_partial),
        cache_limit_history: pick(overlay.cache_limit_history, base.cache_limit_history, default.cache_limit_history),
        storage_type: if overlay.storage_type != default.storage_type { overlay.storage_type } else { base.storage_type },
        redis: if overlay.redis != RedisSettings::default() { overlay.redis } else { base.redis },
        default_max_output_tokens: pick(overlay.default_max_output_tokens, base.default_max_output_tokens, default.default_max_output_tokens),
        max_output_token_limit: pick(overlay.max_output_token_limit, base.max_output_token_limit, default.max_output_token_limit),
        default_worker_concurrency: pick(overlay.default_worker_concurrency, base.default_worker_concurrency, default.default_worker_concurrency),
        default_batch_max_entries: pick(overlay.default_batch_max_entries, base.default_batch_max_entries, default.default_batch_max_entries),
        default_context_size: pick(overlay.default_context_size, base.default_context_size, default.default_context_size),
        log_level: overlay.log_level.or(base.log_level),
    }
}

fn pick<T: PartialEq>(overlay: T, base: T, default: T) -> T {
    if overlay != default { overlay } else { base }
}
