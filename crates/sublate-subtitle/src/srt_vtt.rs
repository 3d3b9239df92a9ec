//! SRT and WebVTT parsing/serialization (spec.md §4.1).
//!
//! Both formats share the same cue shape — a timestamp line of the form
//! `HH:MM:SS[.,]mmm --> HH:MM:SS[.,]mmm` followed by one or more text lines,
//! separated by a blank line — so they share a single cue tokenizer here.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use sublate_core::{Document, Entry, Format};
use sublate_error::ParseError;

fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(\d{2}):(\d{2}):(\d{2})[.,](\d{3})\s*-->\s*(\d{2}):(\d{2}):(\d{2})[.,](\d{3})",
        )
        .expect("static timestamp regex is valid")
    })
}

fn split_blocks(text: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn duration_from_parts(h: &str, m: &str, s: &str, ms: &str) -> Option<Duration> {
    let h: u64 = h.parse().ok()?;
    let m: u64 = m.parse().ok()?;
    let s: u64 = s.parse().ok()?;
    let ms: u64 = ms.parse().ok()?;
    if m >= 60 || s >= 60 {
        return None;
    }
    Some(Duration::from_millis((h * 3600 + m * 60 + s) * 1000 + ms))
}

/// Tokenize cue blocks into entries, counting malformed and candidate cues
/// (spec.md §4.1 failure modes).
fn parse_cue_blocks(blocks: &[Vec<&str>]) -> (Vec<Entry>, usize, usize) {
    let re = timestamp_regex();
    let candidate_count = blocks.len();
    let mut entries = Vec::new();
    let mut malformed_count = 0;
    let mut next_index = 1u32;

    for block in blocks {
        let Some(ts_idx) = block.iter().position(|line| re.is_match(line)) else {
            malformed_count += 1;
            continue;
        };
        let caps = re
            .captures(block[ts_idx])
            .expect("position() already confirmed a match");
        let start = duration_from_parts(&caps[1], &caps[2], &caps[3], &caps[4]);
        let end = duration_from_parts(&caps[5], &caps[6], &caps[7], &caps[8]);
        let (Some(start), Some(end)) = (start, end) else {
            malformed_count += 1;
            continue;
        };
        if start > end {
            malformed_count += 1;
            continue;
        }
        let text = block[ts_idx + 1..].join("\n");
        if text.trim().is_empty() {
            // Empty cues are dropped, not counted as malformed (spec.md §4.1).
            continue;
        }
        match Entry::new(next_index, start, end, text) {
            Ok(entry) => {
                entries.push(entry);
                next_index += 1;
            }
            Err(_) => malformed_count += 1,
        }
    }
    (entries, malformed_count, candidate_count)
}

fn finish(
    format: Format,
    header: &str,
    entries: Vec<Entry>,
    malformed_count: usize,
    candidate_count: usize,
) -> Result<Document, ParseError> {
    if candidate_count > 0 && malformed_count * 4 >= candidate_count {
        return Err(ParseError::Malformed {
            malformed_count,
            candidate_count,
        });
    }
    if entries.is_empty() {
        return Err(ParseError::EmptyOrInvalid);
    }
    let mut doc = Document::new(format, header);
    for entry in entries {
        doc.push_entry(entry)
            .expect("sequential indices assigned here are always monotonic");
    }
    Ok(doc)
}

pub(crate) fn parse_srt(text: &str) -> Result<Document, ParseError> {
    let blocks = split_blocks(text);
    let (entries, malformed_count, candidate_count) = parse_cue_blocks(&blocks);
    finish(Format::Srt, "", entries, malformed_count, candidate_count)
}

pub(crate) fn parse_vtt(text: &str) -> Result<Document, ParseError> {
    let blocks = split_blocks(text);
    let Some(first) = blocks.first() else {
        return Err(ParseError::EmptyOrInvalid);
    };
    if !first[0].trim_start().starts_with("WEBVTT") {
        return Err(ParseError::EmptyOrInvalid);
    }
    let header = first.join("\n");
    let (entries, malformed_count, candidate_count) = parse_cue_blocks(&blocks[1..]);
    finish(Format::Vtt, &header, entries, malformed_count, candidate_count)
}

fn format_duration(d: Duration, sep: char) -> String {
    let total_ms = d.as_millis();
    let ms = total_ms % 1000;
    let total_s = total_ms / 1000;
    let s = total_s % 60;
    let total_m = total_s / 60;
    let m = total_m % 60;
    let h = total_m / 60;
    format!("{h:02}:{m:02}:{s:02}{sep}{ms:03}")
}

pub(crate) fn serialize_srt(doc: &Document) -> String {
    let mut out = String::new();
    for entry in &doc.entries {
        out.push_str(&entry.index.to_string());
        out.push('\n');
        out.push_str(&format_duration(entry.start, ','));
        out.push_str(" --> ");
        out.push_str(&format_duration(entry.end, ','));
        out.push('\n');
        out.push_str(&entry.text);
        out.push_str("\n\n");
    }
    out
}

pub(crate) fn serialize_vtt(doc: &Document) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for entry in &doc.entries {
        out.push_str(&format_duration(entry.start, '.'));
        out.push_str(" --> ");
        out.push_str(&format_duration(entry.end, '.'));
        out.push('\n');
        out.push_str(&entry.text);
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRT: &str = "1\n00:00:01,000 --> 00:00:02,500\nHello\n\n2\n00:00:03,000 --> 00:00:04,000\nWorld\n";

    #[test]
    fn parses_basic_srt() {
        let doc = parse_srt(SRT).unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.entries[0].text, "Hello");
        assert_eq!(doc.entries[0].start, Duration::from_millis(1000));
        assert_eq!(doc.entries[1].end, Duration::from_millis(4000));
    }

    #[test]
    fn drops_empty_cues() {
        let src = "1\n00:00:01,000 --> 00:00:02,000\n\n\n2\n00:00:03,000 --> 00:00:04,000\nreal\n";
        let doc = parse_srt(src).unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.entries[0].text, "real");
    }

    #[test]
    fn rejects_mostly_malformed_timestamps() {
        let src = "1\nnope --> nope\ntext\n\n2\nnope --> nope\ntext\n\n3\nnope --> nope\ntext\n";
        let err = parse_srt(src).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
    }

    #[test]
    fn rejects_no_usable_cues() {
        let err = parse_srt("just some text\nwith no timestamps\n").unwrap_err();
        assert_eq!(err, ParseError::EmptyOrInvalid);
    }

    #[test]
    fn vtt_requires_webvtt_header() {
        let err = parse_vtt("00:00:01.000 --> 00:00:02.000\nHello\n").unwrap_err();
        assert_eq!(err, ParseError::EmptyOrInvalid);
    }

    #[test]
    fn parses_basic_vtt() {
        let src = "WEBVTT\n\n00:00:01.000 --> 00:00:02.500\nHello\n";
        let doc = parse_vtt(src).unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.format, Format::Vtt);
    }

    #[test]
    fn srt_round_trip_is_stable_after_one_application() {
        let doc = parse_srt(SRT).unwrap();
        let once = crate::serialize(&doc);
        let reparsed = crate::parse(&once, Format::Srt).unwrap();
        let twice = crate::serialize(&reparsed);
        assert_eq!(once, twice);
    }

    #[test]
    fn vtt_serialize_always_starts_with_header() {
        let doc = parse_vtt("WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nHi\n").unwrap();
        let out = serialize_vtt(&doc);
        assert!(out.starts_with("WEBVTT\n\n"));
    }
}
