//! Error taxonomy for the subtitle translation pipeline core.
//!
//! Every component boundary (parser, planner, broker, cache, orchestrator)
//! returns a typed `thiserror` enum instead of throwing. [`TranslateError`]
//! is the public sum type returned by the orchestrator's `translate` entry
//! point (see `sublate-orchestrator`); it wraps the lower-level errors and
//! tags each with a stable [`ErrorCode`].
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory / ErrorCode
// ---------------------------------------------------------------------------

/// Broad family an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Subtitle parsing/serialization.
    Parse,
    /// Batching planner.
    Plan,
    /// Provider broker.
    Provider,
    /// Cache & single-flight layer.
    Cache,
    /// Translation orchestrator.
    Orchestrator,
    /// Configuration.
    Config,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parse => "parse",
            Self::Plan => "plan",
            Self::Provider => "provider",
            Self::Cache => "cache",
            Self::Orchestrator => "orchestrator",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

/// Stable, machine-readable error code. Serialises as
/// `SCREAMING_SNAKE_CASE` and must not change meaning across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// C1 could not produce a valid document (spec.md §4.1 `EmptyOrInvalid`).
    ParseEmptyOrInvalid,
    /// C1 detected malformed timestamps on ≥25% of candidate cues.
    ParseMalformed,
    /// C3 `singleBatchMode` requested but the document exceeds the budget.
    PlanSinglePassTooLarge,
    /// Caller passed an impossible request (e.g. DeepL without source lang).
    InvalidRequest,
    /// Provider rejected the request shape (missing/extra indices).
    ProviderShapeMismatch,
    /// Provider returned a rate-limit response.
    ProviderRateLimited,
    /// Provider failed transiently (5xx / connection reset / timeout).
    ProviderTransient,
    /// Provider authentication/authorization failed.
    ProviderAuthFailed,
    /// Provider returned a schema violation that is not retryable.
    ProviderFatal,
    /// Primary and secondary providers both exhausted their retry budget.
    ProviderExhausted,
    /// Post-recovery index set still diverges from the source.
    AlignmentUnrecoverable,
    /// Cache backend failed (filesystem / Redis unavailable).
    StorageUnavailable,
    /// Cooperative cancellation observed.
    Cancelled,
    /// Configuration file or value is invalid.
    ConfigInvalid,
}

impl ErrorCode {
    /// Broad category this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ParseEmptyOrInvalid | Self::ParseMalformed => ErrorCategory::Parse,
            Self::PlanSinglePassTooLarge => ErrorCategory::Plan,
            Self::InvalidRequest
            | Self::ProviderShapeMismatch
            | Self::ProviderRateLimited
            | Self::ProviderTransient
            | Self::ProviderAuthFailed
            | Self::ProviderFatal
            | Self::ProviderExhausted => ErrorCategory::Provider,
            Self::AlignmentUnrecoverable | Self::Cancelled => ErrorCategory::Orchestrator,
            Self::StorageUnavailable => ErrorCategory::Cache,
            Self::ConfigInvalid => ErrorCategory::Config,
        }
    }

    /// Stable string form, e.g. `"PARSE_MALFORMED"`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseEmptyOrInvalid => "PARSE_EMPTY_OR_INVALID",
            Self::ParseMalformed => "PARSE_MALFORMED",
            Self::PlanSinglePassTooLarge => "PLAN_SINGLE_PASS_TOO_LARGE",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::ProviderShapeMismatch => "PROVIDER_SHAPE_MISMATCH",
            Self::ProviderRateLimited => "PROVIDER_RATE_LIMITED",
            Self::ProviderTransient => "PROVIDER_TRANSIENT",
            Self::ProviderAuthFailed => "PROVIDER_AUTH_FAILED",
            Self::ProviderFatal => "PROVIDER_FATAL",
            Self::ProviderExhausted => "PROVIDER_EXHAUSTED",
            Self::AlignmentUnrecoverable => "ALIGNMENT_UNRECOVERABLE",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::Cancelled => "CANCELLED",
            Self::ConfigInvalid => "CONFIG_INVALID",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Component-level errors
// ---------------------------------------------------------------------------

/// C1 parse failures (spec.md §4.1).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    /// Missing WEBVTT header / no timing cues / zero post-filter entries.
    #[error("subtitle has no usable cues")]
    EmptyOrInvalid,
    /// Malformed timestamp on ≥25% of candidate cues.
    #[error("{malformed_count} of {candidate_count} cues have malformed timestamps")]
    Malformed {
        /// Cues with an unparseable timestamp.
        malformed_count: usize,
        /// Total candidate cues considered.
        candidate_count: usize,
    },
}

impl ParseError {
    /// Stable error code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::EmptyOrInvalid => ErrorCode::ParseEmptyOrInvalid,
            Self::Malformed { .. } => ErrorCode::ParseMalformed,
        }
    }
}

/// C3 batching planner failures (spec.md §4.3).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    /// `singleBatchMode` requested but the payload exceeds `tokenBudget`.
    #[error("single-pass plan needs {needed} tokens but the budget is {budget}")]
    SinglePassTooLarge {
        /// Tokens the whole document would need.
        needed: u64,
        /// Configured token budget.
        budget: u64,
    },
}

impl PlanError {
    /// Stable error code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SinglePassTooLarge { .. } => ErrorCode::PlanSinglePassTooLarge,
        }
    }
}

/// C4 provider broker failures (spec.md §4.4).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Caller's request combination is impossible for this provider.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// Human-readable explanation.
        reason: String,
    },
    /// HTTP 429 or provider-specific rate-limit signal.
    #[error("rate limited{}", retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited {
        /// Seconds to wait before retrying, if the provider supplied one.
        retry_after_secs: Option<u64>,
    },
    /// 5xx, connection reset, or timeout.
    #[error("transient provider failure: {reason}")]
    Transient {
        /// Human-readable explanation.
        reason: String,
    },
    /// 401/403.
    #[error("authentication failed")]
    AuthFailed,
    /// 4xx other than 429/401/403.
    #[error("invalid request rejected by provider: {reason}")]
    Rejected {
        /// Human-readable explanation.
        reason: String,
    },
    /// Schema violation from the provider — not retryable.
    #[error("fatal provider error: {reason}")]
    Fatal {
        /// Human-readable explanation.
        reason: String,
    },
    /// Returned payload does not contain exactly the requested indices.
    #[error("shape mismatch: missing {missing:?}, extra {extra:?}")]
    ShapeMismatch {
        /// Requested indices absent from the response.
        missing: Vec<u32>,
        /// Indices present in the response but not requested.
        extra: Vec<u32>,
    },
}

impl ProviderError {
    /// Stable error code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            Self::RateLimited { .. } => ErrorCode::ProviderRateLimited,
            Self::Transient { .. } => ErrorCode::ProviderTransient,
            Self::AuthFailed => ErrorCode::ProviderAuthFailed,
            Self::Rejected { .. } => ErrorCode::InvalidRequest,
            Self::Fatal { .. } => ErrorCode::ProviderFatal,
            Self::ShapeMismatch { .. } => ErrorCode::ProviderFatal,
        }
    }

    /// `true` if a retry (possibly after key rotation) may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }
}

/// C2 cache backend failures (spec.md §4.2/§6).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CacheError {
    /// Backing store (filesystem/Redis) could not be reached or failed.
    #[error("storage unavailable: {reason}")]
    StorageUnavailable {
        /// Human-readable explanation.
        reason: String,
    },
    /// Requested key does not exist in the namespace.
    #[error("key not found")]
    NotFound,
    /// Key would violate namespace path-safety (e.g. traversal attempt).
    #[error("invalid cache key: {reason}")]
    InvalidKey {
        /// Human-readable explanation.
        reason: String,
    },
}

impl CacheError {
    /// Stable error code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        ErrorCode::StorageUnavailable
    }
}

// ---------------------------------------------------------------------------
// TranslateError — the public sum type (spec.md §6/§7)
// ---------------------------------------------------------------------------

/// Top-level error returned by the orchestrator's `translate` entry point.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranslateError {
    /// C1 could not parse the source into a document.
    #[error("source subtitle could not be parsed: {0}")]
    Unparseable(#[from] ParseError),

    /// Caller passed an impossible combination of request fields.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// Human-readable explanation.
        reason: String,
    },

    /// Primary and secondary providers both failed after retry budget.
    #[error("provider exhausted (primary: {primary_failure_reason}{})",
        secondary_failure_reason.as_deref().map(|s| format!(", secondary: {s}")).unwrap_or_default())]
    ProviderExhausted {
        /// Why the primary provider failed.
        primary_failure_reason: String,
        /// Why the secondary provider failed, if one was tried.
        secondary_failure_reason: Option<String>,
    },

    /// Post-recovery index set still diverges from the source.
    #[error("alignment unrecoverable: missing {missing_count} of {total_count} entries")]
    AlignmentUnrecoverable {
        /// Entries missing from the candidate document after recovery.
        missing_count: usize,
        /// Total source entries.
        total_count: usize,
    },

    /// Cooperative cancellation observed mid-pipeline.
    #[error("translation cancelled")]
    Cancelled,

    /// Cache backend failed in a way the orchestrator could not route around.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] CacheError),
}

impl TranslateError {
    /// Stable error code for this failure, for HTTP-layer status mapping.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unparseable(e) => e.code(),
            Self::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            Self::ProviderExhausted { .. } => ErrorCode::ProviderExhausted,
            Self::AlignmentUnrecoverable { .. } => ErrorCode::AlignmentUnrecoverable,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
        }
    }
}

impl From<PlanError> for TranslateError {
    fn from(e: PlanError) -> Self {
        // Only reachable failure mode today is SinglePassTooLarge, which is
        // a caller-supplied configuration error, not a parse error.
        Self::InvalidRequest {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips_through_category() {
        let all = [
            ErrorCode::ParseEmptyOrInvalid,
            ErrorCode::ParseMalformed,
            ErrorCode::PlanSinglePassTooLarge,
            ErrorCode::InvalidRequest,
            ErrorCode::ProviderShapeMismatch,
            ErrorCode::ProviderRateLimited,
            ErrorCode::ProviderTransient,
            ErrorCode::ProviderAuthFailed,
            ErrorCode::ProviderFatal,
            ErrorCode::ProviderExhausted,
            ErrorCode::AlignmentUnrecoverable,
            ErrorCode::StorageUnavailable,
            ErrorCode::Cancelled,
            ErrorCode::ConfigInvalid,
        ];
        for code in all {
            // category() must not panic for any variant.
            let _ = code.category();
            assert!(!code.as_str().is_empty());
        }
    }

    #[test]
    fn provider_error_retryability() {
        assert!(ProviderError::RateLimited { retry_after_secs: Some(5) }.is_retryable());
        assert!(ProviderError::Transient { reason: "timeout".into() }.is_retryable());
        assert!(!ProviderError::AuthFailed.is_retryable());
        assert!(!ProviderError::Fatal { reason: "bad schema".into() }.is_retryable());
    }

    #[test]
    fn translate_error_serialises_stable_code() {
        let err = TranslateError::AlignmentUnrecoverable {
            missing_count: 2,
            total_count: 10,
        };
        assert_eq!(err.code().as_str(), "ALIGNMENT_UNRECOVERABLE");
    }

    #[test]
    fn parse_error_from_conversion() {
        let pe = ParseError::EmptyOrInvalid;
        let te: TranslateError = pe.clone().into();
        assert!(matches!(te, TranslateError::Unparseable(inner) if inner == pe));
    }

    #[test]
    fn error_code_serde_is_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::ProviderRateLimited).unwrap();
        assert_eq!(json, "\"PROVIDER_RATE_LIMITED\"");
    }
}
