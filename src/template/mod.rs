//! Templates: parameterized text patterns with ordered slots.
//!
//! A pattern is written with positional placeholders:
//!
//! ```text
//! "I don't have access to {0}."
//! "The {0} of {1} is {2}."
//! ```
//!
//! `{{` and `}}` escape literal braces. Patterns are validated at
//! registration so that every registered template is unambiguous:
//!
//! - slots are numbered `0, 1, 2, ...` in order of appearance, each once
//! - two slots are never adjacent (there is always a literal between them)
//! - at least one non-empty literal segment exists
//! - at most 255 slots (the slot count is one byte on the wire)
//!
//! Once registered, a template's pattern never changes; only its usage
//! statistics are appended to.

mod matcher;
mod store;

pub use matcher::{MatchIndex, TemplateMatch};
pub use store::{
    PromotionRecord, TemplateSnapshot, TemplateStore, BUILTIN_RANGE, CLIENT_SYNC_RANGE,
    DYNAMIC_RANGE,
};

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{AuraError, Result};

/// Maximum slots per template (one-byte slot count on the wire)
pub const MAX_SLOTS: usize = 255;

/// Maximum bytes per slot value (two-byte slot length on the wire)
pub const MAX_SLOT_LEN: usize = u16::MAX as usize;

/// Weight of the newest sample in the rolling average ratio
const RATIO_EWMA_ALPHA: f64 = 0.1;

/// One piece of a template pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Fixed text
    Literal(String),
    /// Variable text, by slot index
    Slot(usize),
}

/// A registered template
#[derive(Debug)]
pub struct Template {
    id: u32,
    pattern: String,
    segments: Vec<Segment>,
    category: String,
    allow_empty_slots: bool,
    literal_len: usize,
    stats: TemplateStats,
}

impl Template {
    /// Parse and validate a pattern.
    pub fn new(id: u32, pattern: &str, category: impl Into<String>) -> Result<Self> {
        let segments = parse_pattern(pattern)?;
        let literal_len = segments
            .iter()
            .map(|s| match s {
                Segment::Literal(l) => l.len(),
                Segment::Slot(_) => 0,
            })
            .sum();

        Ok(Self {
            id,
            pattern: pattern.to_string(),
            segments,
            category: category.into(),
            allow_empty_slots: true,
            literal_len,
            stats: TemplateStats::default(),
        })
    }

    /// Require every slot value to be non-empty.
    pub fn disallow_empty_slots(mut self) -> Self {
        self.allow_empty_slots = false;
        self
    }

    /// Template ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Original pattern text
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Parsed segments
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Category name
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Whether slots may match the empty string
    pub fn allows_empty_slots(&self) -> bool {
        self.allow_empty_slots
    }

    /// Number of slots
    pub fn slot_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Slot(_)))
            .count()
    }

    /// Total bytes of literal text (lower bound on any matching input)
    pub fn literal_len(&self) -> usize {
        self.literal_len
    }

    /// First literal byte, if the pattern starts with a literal
    pub fn leading_byte(&self) -> Option<u8> {
        match self.segments.first() {
            Some(Segment::Literal(l)) => l.as_bytes().first().copied(),
            _ => None,
        }
    }

    /// Usage statistics
    pub fn stats(&self) -> &TemplateStats {
        &self.stats
    }

    /// Extract slot values if `text` matches this template exactly.
    ///
    /// Literal segments must appear in declared order. Interior literals are
    /// located leftmost-first; a trailing literal is anchored at the end.
    pub fn extract<'t>(&self, text: &'t str) -> Option<Vec<&'t str>> {
        if text.len() < self.literal_len {
            return None;
        }

        let mut slots = Vec::with_capacity(self.slot_count());
        let mut pos = 0usize;
        let last = self.segments.len() - 1;

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if i == 0 {
                        if !text.starts_with(lit.as_str()) {
                            return None;
                        }
                        pos = lit.len();
                        if i == last && pos != text.len() {
                            return None;
                        }
                        continue;
                    }

                    // Preceded by a slot: locate the literal to close that slot.
                    let slot_end = if i == last {
                        if !text.ends_with(lit.as_str()) {
                            return None;
                        }
                        let start = text.len() - lit.len();
                        if start < pos {
                            return None;
                        }
                        start
                    } else {
                        self.find_literal(text, pos, lit)?
                    };

                    let value = &text[pos..slot_end];
                    if value.is_empty() && !self.allow_empty_slots {
                        return None;
                    }
                    slots.push(value);
                    pos = slot_end + lit.len();
                },
                Segment::Slot(_) => {
                    if i == last {
                        let value = &text[pos..];
                        if value.is_empty() && !self.allow_empty_slots {
                            return None;
                        }
                        slots.push(value);
                        pos = text.len();
                    }
                },
            }
        }

        if pos != text.len() {
            return None;
        }
        Some(slots)
    }

    fn find_literal(&self, text: &str, pos: usize, lit: &str) -> Option<usize> {
        let found = pos + text[pos..].find(lit)?;
        if found > pos || self.allow_empty_slots {
            return Some(found);
        }
        // Empty slot not allowed: skip one character and retry.
        let next = pos + text[pos..].chars().next()?.len_utf8();
        text[next..].find(lit).map(|i| next + i)
    }

    /// Render slot values back into text.
    pub fn render<S: AsRef<str>>(&self, slots: &[S]) -> Result<String> {
        let expected = self.slot_count();
        if slots.len() != expected {
            return Err(AuraError::Decompression(format!(
                "Template {} expects {} slots, got {}",
                self.id,
                expected,
                slots.len()
            )));
        }

        let capacity = self.literal_len + slots.iter().map(|s| s.as_ref().len()).sum::<usize>();
        let mut out = String::with_capacity(capacity);
        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Slot(idx) => out.push_str(slots[*idx].as_ref()),
            }
        }
        Ok(out)
    }

    /// Template payload size for these slot values:
    /// `[4B id][1B count]([2B len][bytes])*`
    pub fn encoded_size<S: AsRef<str>>(slots: &[S]) -> usize {
        5 + slots.iter().map(|s| 2 + s.as_ref().len()).sum::<usize>()
    }
}

/// Parse a pattern into validated, merged segments.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Segment>> {
    let bytes = pattern.as_bytes();
    let mut segments: Vec<Segment> = Vec::new();
    let mut literal = String::new();
    let mut next_slot = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'{' if bytes.get(i + 1) == Some(&b'{') => {
                literal.push('{');
                i += 2;
            },
            b'}' if bytes.get(i + 1) == Some(&b'}') => {
                literal.push('}');
                i += 2;
            },
            b'{' => {
                let digits = bytes[i + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                let close = i + 1 + digits;
                if digits == 0 || bytes.get(close) != Some(&b'}') {
                    literal.push('{');
                    i += 1;
                    continue;
                }

                let index: usize = pattern[i + 1..close].parse().map_err(|_| {
                    AuraError::InvalidTemplate(format!("Bad slot index in {pattern:?}"))
                })?;
                if index != next_slot {
                    return Err(AuraError::InvalidTemplate(format!(
                        "Slot {{{index}}} out of order in {pattern:?} (expected {{{next_slot}}})"
                    )));
                }

                if literal.is_empty() {
                    if matches!(segments.last(), Some(Segment::Slot(_))) {
                        return Err(AuraError::InvalidTemplate(format!(
                            "Adjacent slots are ambiguous in {pattern:?}"
                        )));
                    }
                } else {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Slot(index));
                next_slot += 1;
                i = close + 1;
            },
            _ => {
                // Copy one full UTF-8 character.
                let ch_len = pattern[i..].chars().next().map_or(1, char::len_utf8);
                literal.push_str(&pattern[i..i + ch_len]);
                i += ch_len;
            },
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    if !segments.iter().any(|s| matches!(s, Segment::Literal(_))) {
        return Err(AuraError::InvalidTemplate(format!(
            "Pattern {pattern:?} has no literal text"
        )));
    }
    if next_slot > MAX_SLOTS {
        return Err(AuraError::InvalidTemplate(format!(
            "Pattern {pattern:?} has {next_slot} slots (max {MAX_SLOTS})"
        )));
    }

    Ok(segments)
}

/// Append-only usage statistics for one template
#[derive(Debug, Default)]
pub struct TemplateStats {
    uses: AtomicU64,
    bytes_saved: AtomicU64,
    ratio_bits: AtomicU64,
}

impl TemplateStats {
    /// Record one encode using this template.
    pub fn record(&self, original_bytes: usize, encoded_bytes: usize) {
        let uses = self.uses.fetch_add(1, Ordering::Relaxed) + 1;
        if original_bytes > encoded_bytes {
            self.bytes_saved
                .fetch_add((original_bytes - encoded_bytes) as u64, Ordering::Relaxed);
        }

        let ratio = if encoded_bytes == 0 {
            1.0
        } else {
            original_bytes as f64 / encoded_bytes as f64
        };
        let mut current = self.ratio_bits.load(Ordering::Relaxed);
        loop {
            let old = f64::from_bits(current);
            let new = if uses == 1 {
                ratio
            } else {
                old + RATIO_EWMA_ALPHA * (ratio - old)
            };
            match self.ratio_bits.compare_exchange_weak(
                current,
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of recorded uses
    pub fn uses(&self) -> u64 {
        self.uses.load(Ordering::Relaxed)
    }

    /// Cumulative bytes saved
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_saved.load(Ordering::Relaxed)
    }

    /// Rolling average compression ratio (original / encoded)
    pub fn average_ratio(&self) -> f64 {
        if self.uses() == 0 {
            0.0
        } else {
            f64::from_bits(self.ratio_bits.load(Ordering::Relaxed))
        }
    }
}

/// Assign a semantic category to a pattern or message by keyword heuristics.
pub fn categorize(text: &str) -> &'static str {
    let lower = text.to_lowercase();

    if ["cannot", "don't have", "unable to", "can't", "not able"]
        .iter()
        .any(|k| lower.contains(k))
    {
        "limitations"
    } else if text.contains("```") || lower.contains("code") || lower.contains("example") {
        "code_examples"
    } else if lower.starts_with("to ") || lower.contains("how to") {
        "instructions"
    } else if lower.contains(" is ") || lower.contains(" are ") {
        if lower.contains("definition") || lower.contains("means") {
            "definitions"
        } else {
            "facts"
        }
    } else if lower.contains("versus") || lower.contains("compared to") {
        "comparisons"
    } else if lower.contains("because") || lower.contains("reason") {
        "explanations"
    } else if text.matches(',').count() >= 2 || lower.contains("first") {
        "enumerations"
    } else if lower.contains("should") || lower.contains("recommend") || lower.contains("suggest") {
        "recommendations"
    } else if text.contains('?') || lower.contains("what") || lower.contains("which") {
        "clarifications"
    } else {
        "general"
    }
}
