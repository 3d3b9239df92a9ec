//! ASS/SSA parsing/serialization (spec.md §4.1).
//!
//! Only `Dialogue:` lines carry translatable text; everything else in the
//! file (script info, style definitions, the `Format:` line itself) is
//! opaque header content, preserved verbatim and re-emitted ahead of the
//! regenerated dialogue lines.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

use sublate_core::{Document, Entry, Format};
use sublate_error::ParseError;

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+):(\d{2}):(\d{2})\.(\d{2})$").expect("static ASS time regex is valid")
    })
}

fn parse_ass_time(s: &str) -> Option<Duration> {
    let caps = time_regex().captures(s.trim())?;
    let h: u64 = caps[1].parse().ok()?;
    let m: u64 = caps[2].parse().ok()?;
    let s: u64 = caps[3].parse().ok()?;
    let cs: u64 = caps[4].parse().ok()?;
    if m >= 60 || s >= 60 {
        return None;
    }
    Some(Duration::from_millis((h * 3600 + m * 60 + s) * 1000 + cs * 10))
}

fn format_ass_time(d: Duration) -> String {
    let total_ms = d.as_millis();
    let cs = (total_ms % 1000) / 10;
    let total_s = total_ms / 1000;
    let s = total_s % 60;
    let total_m = total_s / 60;
    let m = total_m % 60;
    let h = total_m / 60;
    format!("{h}:{m:02}:{s:02}.{cs:02}")
}

/// Split a `Dialogue:` line's remainder into its 9 metadata fields and the
/// 10th (text) field. A known legacy-library bug pads the 9th comma with a
/// single space before tokenizing; we reproduce and then undo it, since the
/// effect on the extracted text field is otherwise a no-op.
fn split_dialogue_fields(content: &str) -> Option<(Vec<&str>, String)> {
    let ninth_comma = content.match_indices(',').nth(8)?.0;
    let mut patched = String::with_capacity(content.len() + 1);
    patched.push_str(&content[..=ninth_comma]);
    patched.push(' ');
    patched.push_str(&content[ninth_comma + 1..]);

    let fields: Vec<&str> = patched.splitn(10, ',').collect();
    if fields.len() < 10 {
        return None;
    }
    let text = fields[9].strip_prefix(' ').unwrap_or(fields[9]).to_string();
    Some((fields[0..9].to_vec(), text))
}

/// Strip ASS override tags (`{\tag}`), converting `\h` to a space and
/// `\N`/`\n` to a line break. Drawing commands between `{\p1}` and `{\p0}`
/// are dropped entirely. Brace content that does not start with a
/// backslash is not a tag and is preserved literally.
fn strip_override_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_drawing = false;

    while let Some(c) = chars.next() {
        if c == '{' {
            let mut tag = String::new();
            for c2 in chars.by_ref() {
                if c2 == '}' {
                    break;
                }
                tag.push(c2);
            }
            if let Some(stripped) = tag.strip_prefix('\\') {
                if stripped.contains("p1") {
                    in_drawing = true;
                } else if stripped.contains("p0") {
                    in_drawing = false;
                }
                // Override tags are removed entirely, drawing or not.
            } else {
                out.push('{');
                out.push_str(&tag);
                out.push('}');
            }
        } else if in_drawing {
            continue;
        } else if c == '\\' {
            match chars.peek() {
                Some('h') => {
                    chars.next();
                    out.push(' ');
                }
                Some('N') | Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

pub(crate) fn parse(text: &str, format: Format) -> Result<Document, ParseError> {
    let mut header_lines = Vec::new();
    let mut dialogue_lines = Vec::new();
    let mut seen_events = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("[events]") {
            seen_events = true;
        }
        if trimmed.starts_with("Dialogue:") {
            dialogue_lines.push(line);
        } else {
            header_lines.push(line);
        }
    }

    if !seen_events || dialogue_lines.is_empty() {
        return Err(ParseError::EmptyOrInvalid);
    }

    let candidate_count = dialogue_lines.len();
    let mut malformed_count = 0;
    let mut entries = Vec::new();
    let mut next_index = 1u32;

    for line in &dialogue_lines {
        let Some(content) = line.trim_start().strip_prefix("Dialogue:") else {
            malformed_count += 1;
            continue;
        };
        let Some((meta, raw_text)) = split_dialogue_fields(content.trim_start()) else {
            malformed_count += 1;
            continue;
        };
        let (Some(start), Some(end)) = (parse_ass_time(meta[1]), parse_ass_time(meta[2])) else {
            malformed_count += 1;
            continue;
        };
        if start > end {
            malformed_count += 1;
            continue;
        }
        let cleaned = strip_override_tags(&raw_text);
        if cleaned.trim().is_empty() {
            continue;
        }
        match Entry::new(next_index, start, end, cleaned) {
            Ok(mut entry) => {
                entry.style_hints = Some(format!(
                    "{},{},{},{},{},{},{}",
                    meta[0], meta[3], meta[4], meta[5], meta[6], meta[7], meta[8]
                ));
                entries.push(entry);
                next_index += 1;
            }
            Err(_) => malformed_count += 1,
        }
    }

    if malformed_count * 4 >= candidate_count {
        return Err(ParseError::Malformed {
            malformed_count,
            candidate_count,
        });
    }
    if entries.is_empty() {
        return Err(ParseError::EmptyOrInvalid);
    }

    let header = header_lines.join("\n");
    let mut doc = Document::new(format, header);
    for entry in entries {
        doc.push_entry(entry)
            .expect("sequential indices assigned here are always monotonic");
    }
    Ok(doc)
}

const DEFAULT_STYLE_HINTS: &str = "0,Default,,0,0,0,";

pub(crate) fn serialize(doc: &Document) -> String {
    let mut out = doc.header.clone();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    for entry in &doc.entries {
        let style = entry.style_hints.as_deref().unwrap_or(DEFAULT_STYLE_HINTS);
        let mut fields = style.splitn(7, ',');
        let layer = fields.next().unwrap_or("0");
        let style_name = fields.next().unwrap_or("Default");
        let name = fields.next().unwrap_or("");
        let margin_l = fields.next().unwrap_or("0");
        let margin_r = fields.next().unwrap_or("0");
        let margin_v = fields.next().unwrap_or("0");
        let effect = fields.next().unwrap_or("");
        let text = entry.text.replace('\n', "\\N");
        out.push_str(&format!(
            "Dialogue: {layer},{},{},{style_name},{name},{margin_l},{margin_r},{margin_v},{effect},{text}\n",
            format_ass_time(entry.start),
            format_ass_time(entry.end),
        ));
    }
    out
}
