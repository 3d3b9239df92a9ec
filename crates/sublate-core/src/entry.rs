//! Timed subtitle entries and the document they belong to (spec.md §3).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Subtitle container format. Re-serializing a document preserves its
/// original format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// SubRip.
    Srt,
    /// WebVTT.
    Vtt,
    /// Advanced SubStation Alpha.
    Ass,
    /// SubStation Alpha.
    Ssa,
}

impl Format {
    /// Sniff a format from a lowercased file extension (`"srt"`, `"vtt"`,
    /// `"ass"`, `"ssa"`). Returns `None` for anything else — format
    /// selection policy beyond this lives outside the core (spec.md §1).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "srt" => Some(Self::Srt),
            "vtt" => Some(Self::Vtt),
            "ass" => Some(Self::Ass),
            "ssa" => Some(Self::Ssa),
            _ => None,
        }
    }
}

/// A single timed unit of subtitle text (spec.md §3).
///
/// Invariants enforced by [`Document::push_entry`]: `start <= end`, `index`
/// is unique and monotonic, and `text` is never empty after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// 1-based, monotonic index — the primary alignment key.
    pub index: u32,
    /// Start time.
    #[serde(with = "duration_millis")]
    pub start: Duration,
    /// End time.
    #[serde(with = "duration_millis")]
    pub end: Duration,
    /// Cue text. May contain embedded line breaks and markup.
    pub text: String,
    /// Opaque, provider/format-specific styling hints (ASS override state,
    /// VTT cue settings, …). Never interpreted by the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_hints: Option<String>,
}

impl Entry {
    /// Construct a new entry, enforcing `start <= end` and non-empty text.
    ///
    /// # Errors
    ///
    /// Returns `Err` with a description if the invariants are violated.
    pub fn new(
        index: u32,
        start: Duration,
        end: Duration,
        text: impl Into<String>,
    ) -> Result<Self, String> {
        let text = text.into();
        if start > end {
            return Err(format!(
                "entry {index}: start ({start:?}) is after end ({end:?})"
            ));
        }
        if text.trim().is_empty() {
            return Err(format!("entry {index}: text is empty after normalization"));
        }
        Ok(Self {
            index,
            start,
            end,
            text,
            style_hints: None,
        })
    }
}

/// A parsed subtitle document: a header (opaque, format-specific) plus an
/// ordered, index-unique sequence of [`Entry`] values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Container format.
    pub format: Format,
    /// Opaque format-specific header (e.g. ASS `[Script Info]` + style
    /// sections, verbatim `WEBVTT` line content).
    pub header: String,
    /// Ordered, index-unique entries.
    pub entries: Vec<Entry>,
}

impl Document {
    /// Construct an empty document of the given format.
    #[must_use]
    pub fn new(format: Format, header: impl Into<String>) -> Self {
        Self {
            format,
            header: header.into(),
            entries: Vec::new(),
        }
    }

    /// Append an entry, rejecting duplicate or non-monotonic indices.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `entry.index` is not strictly greater than the
    /// previous entry's index.
    pub fn push_entry(&mut self, entry: Entry) -> Result<(), String> {
        if let Some(last) = self.entries.last() {
            if entry.index <= last.index {
                return Err(format!(
                    "entry index {} is not greater than previous index {}",
                    entry.index, last.index
                ));
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Number of entries in the document.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the document has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Source entry indices, in document order.
    #[must_use]
    pub fn indices(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.index).collect()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
