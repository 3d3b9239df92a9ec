#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Subtitle parser/serializer (spec.md §4.1, component C1).
//!
//! `parse` tokenizes source bytes into an ordered [`Document`]; `serialize`
//! re-emits a `Document` in its original container format. Neither function
//! does network or filesystem I/O.

mod ass;
mod srt_vtt;

use sublate_core::{Document, Format};
use sublate_error::ParseError;

/// Parse `bytes` as `format`, tokenizing into an ordered [`Document`].
///
/// # Errors
///
/// Returns [`ParseError::EmptyOrInvalid`] if there is no usable header/cue
/// at all, or [`ParseError::Malformed`] if ≥25% of candidate cues have
/// unparseable timestamps (spec.md §4.1).
pub fn parse(bytes: &[u8], format: Format) -> Result<Document, ParseError> {
    let text = normalize_text(bytes);
    match format {
        Format::Srt => srt_vtt::parse_srt(&text),
        Format::Vtt => srt_vtt::parse_vtt(&text),
        Format::Ass | Format::Ssa => ass::parse(&text, format),
    }
}

/// Re-emit `document` in its own format.
///
/// Output always terminates with a single trailing LF; consecutive blank
/// lines are collapsed to at most two (spec.md §4.1).
#[must_use]
pub fn serialize(document: &Document) -> Vec<u8> {
    let body = match document.format {
        Format::Srt => srt_vtt::serialize_srt(document),
        Format::Vtt => srt_vtt::serialize_vtt(document),
        Format::Ass | Format::Ssa => ass::serialize(document),
    };
    finalize_output(&body).into_bytes()
}

/// UTF-8-decode (lossily, tolerating a BOM) and normalize all line endings
/// to LF (spec.md §4.1).
fn normalize_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    let raw = String::from_utf8_lossy(bytes);
    raw.replace("\r\n", "\n").replace('\r', "\n")
}

/// Collapse runs of 3+ blank lines to exactly two, and ensure exactly one
/// trailing LF.
fn finalize_output(body: &str) -> String {
    let mut collapsed = String::with_capacity(body.len());
    let mut blank_run = 0usize;
    for line in body.split('\n') {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 2 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        collapsed.push_str(line);
        collapsed.push('\n');
    }
    while collapsed.ends_with("\n\n") {
        collapsed.pop();
    }
    if !collapsed.ends_with('\n') {
        collapsed.push('\n');
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_bom_and_crlf() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"a\r\nb\r\n");
        assert_eq!(normalize_text(&bytes), "a\nb\n");
    }

    #[test]
    fn finalize_output_collapses_triple_blank_lines() {
        let out = finalize_output("a\n\n\n\nb\n");
        assert_eq!(out, "a\n\n\nb\n");
    }

    #[test]
    fn finalize_output_always_ends_with_single_lf() {
        assert_eq!(finalize_output("a"), "a\n");
        assert_eq!(finalize_output("a\n\n\n"), "a\n");
    }
}
