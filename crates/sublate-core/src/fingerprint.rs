//! Content-addressed fingerprinting of translation requests (spec.md §3).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::batch::Workflow;
use crate::parameters::TranslationParameters;

/// A 256-bit digest over `(normalized source bytes, source-lang-or-"auto",
/// target-lang, provider-id, model-id, workflow-id, parameter-hash,
/// prompt-hash)`. Two requests with the same fingerprint must produce
/// byte-identical results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Compute the fingerprint for a translation request.
    ///
    /// `source_bytes` must already be normalized (UTF-8, BOM stripped, LF
    /// line endings) so that two byte-different-but-equivalent sources
    /// fingerprint identically.
    #[must_use]
    pub fn compute(
        source_bytes: &[u8],
        source_lang: Option<&str>,
        target_lang: &str,
        provider_id: &str,
        model_id: &str,
        workflow: Workflow,
        parameters: &TranslationParameters,
        prompt: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_bytes);
        hasher.update(b"\0");
        hasher.update(source_lang.unwrap_or("auto").as_bytes());
        hasher.update(b"\0");
        hasher.update(target_lang.as_bytes());
        hasher.update(b"\0");
        hasher.update(provider_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(model_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(workflow.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(&Sha256::digest(parameters.output_affecting_fingerprint_bytes()));
        hasher.update(b"\0");
        hasher.update(&Sha256::digest(prompt.as_bytes()));

        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// 64-character lowercase hex representation (spec.md §6).
    #[must_use]
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character lowercase hex representation.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `s` is not exactly 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TranslationParameters {
        TranslationParameters::default()
    }

    #[test]
    fn identical_inputs_produce_identical_fingerprints() {
        let a = Fingerprint::compute(
            b"hello",
            Some("en"),
            "fr",
            "openai",
            "gpt",
            Workflow::RebuildTimestamps,
            &params(),
            "translate this",
        );
        let b = Fingerprint::compute(
            b"hello",
            Some("en"),
            "fr",
            "openai",
            "gpt",
            Workflow::RebuildTimestamps,
            &params(),
            "translate this",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn differing_target_lang_changes_fingerprint() {
        let a = Fingerprint::compute(
            b"hello", Some("en"), "fr", "openai", "gpt",
            Workflow::RebuildTimestamps, &params(), "p",
        );
        let b = Fingerprint::compute(
            b"hello", Some("en"), "de", "openai", "gpt",
            Workflow::RebuildTimestamps, &params(), "p",
        );
        assert_ne!(a, b);
    }

    #[test]
    fn timeout_and_retries_do_not_affect_fingerprint() {
        let mut p1 = params();
        p1.translation_timeout = Some(std::time::Duration::from_secs(30));
        let mut p2 = params();
        p2.max_retries = Some(4);
        let a = Fingerprint::compute(
            b"x", None, "fr", "deepl", "m", Workflow::Structured, &p1, "",
        );
        let b = Fingerprint::compute(
            b"x", None, "fr", "deepl", "m", Workflow::Structured, &p2, "",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn hex_round_trip() {
        let fp = Fingerprint::compute(
            b"x", None, "fr", "deepl", "m", Workflow::Structured, &params(), "",
        );
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Fingerprint::from_hex(&hex).unwrap(), fp);
    }

    #[test]
    fn source_lang_none_is_same_as_auto() {
        let a = Fingerprint::compute(
            b"x", None, "fr", "p", "m", Workflow::Structured, &params(), "",
        );
        let b = Fingerprint::compute(
            b"x", Some("auto"), "fr", "p", "m", Workflow::Structured, &params(), "",
        );
        assert_eq!(a, b);
    }
}
