//! Enumerated translation parameter struct (spec.md §9,
//! "Dynamic config objects → enumerated parameter struct").

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reasoning-effort hint supported by some providers (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    /// No extended reasoning.
    None,
    /// Minimal extended reasoning.
    Low,
    /// Moderate extended reasoning.
    Medium,
    /// Maximal extended reasoning.
    High,
}

/// Formality hint supported by some providers (e.g. DeepL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formality {
    /// Provider default.
    Default,
    /// More formal register.
    More,
    /// Less formal register.
    Less,
}

/// Exactly the optional translation parameters spec.md §9 enumerates.
/// Every field is validated on construction; the broker later drops any
/// field the selected provider's capability table does not support
/// (spec.md §4.4).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationParameters {
    /// Sampling temperature, `0.0..=2.0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling, `0.0..=1.0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling, `1..=100`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Maximum output tokens, `1..=200_000`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Extended-thinking token budget, `-1..=32_768` (`-1` = unbounded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i32>,
    /// Reasoning-effort hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Formality hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formality: Option<Formality>,
    /// Preserve source markup/whitespace formatting verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_formatting: Option<bool>,
    /// Per-batch request timeout, `5..=600` seconds.
    #[serde(skip_serializing_if = "Option::is_none", with = "opt_duration_secs")]
    pub translation_timeout: Option<Duration>,
    /// Maximum transient-error retries, `0..=5`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u8>,
}

/// A single out-of-range field, returned by [`TranslationParameters::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} is out of range: {detail}")]
pub struct ParameterRangeError {
    /// Offending field name.
    pub field: &'static str,
    /// Human-readable explanation of the valid range.
    pub detail: String,
}

impl TranslationParameters {
    /// Validate every present field against its documented range
    /// (spec.md §9). Returns every violation, not just the first.
    ///
    /// # Errors
    ///
    /// Returns one [`ParameterRangeError`] per out-of-range field.
    pub fn validate(&self) -> Result<(), Vec<ParameterRangeError>> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &'static str, detail: &str| {
            if !ok {
                errors.push(ParameterRangeError {
                    field,
                    detail: detail.to_string(),
                });
            }
        };

        if let Some(t) = self.temperature {
            check((0.0..=2.0).contains(&t), "temperature", "must be 0.0..=2.0");
        }
        if let Some(p) = self.top_p {
            check((0.0..=1.0).contains(&p), "top_p", "must be 0.0..=1.0");
        }
        if let Some(k) = self.top_k {
            check((1..=100).contains(&k), "top_k", "must be 1..=100");
        }
        if let Some(m) = self.max_output_tokens {
            check(
                (1..=200_000).contains(&m),
                "max_output_tokens",
                "must be 1..=200000",
            );
        }
        if let Some(b) = self.thinking_budget {
            check(
                (-1..=32_768).contains(&b),
                "thinking_budget",
                "must be -1..=32768",
            );
        }
        if let Some(t) = self.translation_timeout {
            check(
                (Duration::from_secs(5)..=Duration::from_secs(600)).contains(&t),
                "translation_timeout",
                "must be 5..=600 seconds",
            );
        }
        if let Some(r) = self.max_retries {
            check((0..=5).contains(&r), "max_retries", "must be 0..=5");
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// The subset of fields that influence translation output, in a
    /// deterministic order, for hashing into the fingerprint's
    /// `parameter-hash` (spec.md §3). Excludes timeouts and retry counts.
    #[must_use]
    pub fn output_affecting_fingerprint_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend(self.temperature.map(f64::to_bits).unwrap_or(0).to_le_bytes());
        buf.extend(self.top_p.map(f64::to_bits).unwrap_or(0).to_le_bytes());
        buf.extend(self.top_k.unwrap_or(0).to_le_bytes());
        buf.extend(self.max_output_tokens.unwrap_or(0).to_le_bytes());
        buf.extend(self.thinking_budget.unwrap_or(0).to_le_bytes());
        buf.push(match self.reasoning_effort {
            None => 0,
            Some(ReasoningEffort::None) => 1,
            Some(ReasoningEffort::Low) => 2,
            Some(ReasoningEffort::Medium) => 3,
            Some(ReasoningEffort::High) => 4,
        });
        buf.push(match self.formality {
            None => 0,
            Some(Formality::Default) => 1,
            Some(Formality::More) => 2,
            Some(Formality::Less) => 3,
        });
        buf.push(self.preserve_formatting.map(|b| b as u8 + 1).unwrap_or(0));
        buf
    }
}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<u64> = Option::deserialize(d)?;
        Ok(secs.map(Duration::from_secs))
    }
}
