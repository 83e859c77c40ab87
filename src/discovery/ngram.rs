//! Frequent word n-grams.
//!
//! Each n-gram is counted once per message. Where it sits in the message
//! (alone, leading, trailing or interior) decides which slots surround it
//! in the proposed pattern.

use std::collections::{HashMap, HashSet};

use super::{build_pattern, Piece};

/// N-gram lengths mined, in words
const NGRAM_LENGTHS: [usize; 3] = [3, 4, 5];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Placement {
    Whole,
    Leading,
    Trailing,
    Interior,
}

impl Placement {
    fn of(start: usize, len: usize, total: usize) -> Self {
        match (start == 0, start + len == total) {
            (true, true) => Placement::Whole,
            (true, false) => Placement::Leading,
            (false, true) => Placement::Trailing,
            (false, false) => Placement::Interior,
        }
    }
}

#[derive(Debug, Default)]
struct NgramStats {
    messages: usize,
    placements: HashMap<Placement, usize>,
}

impl NgramStats {
    fn dominant(&self) -> Placement {
        self.placements
            .iter()
            .max_by_key(|(placement, count)| (**count, std::cmp::Reverse(**placement as u8)))
            .map_or(Placement::Interior, |(placement, _)| *placement)
    }
}

/// Propose up to `limit` patterns built around n-grams seen in at least
/// `min_occurrences` messages.
pub(super) fn mine(messages: &[Vec<&str>], min_occurrences: usize, limit: usize) -> Vec<String> {
    let mut stats: HashMap<&[&str], NgramStats> = HashMap::new();

    for words in messages {
        let mut seen: HashSet<&[&str]> = HashSet::new();
        for n in NGRAM_LENGTHS {
            if words.len() < n {
                continue;
            }
            for (start, gram) in words.windows(n).enumerate() {
                if !is_meaningful(gram) || !seen.insert(gram) {
                    continue;
                }
                let entry = stats.entry(gram).or_default();
                entry.messages += 1;
                *entry
                    .placements
                    .entry(Placement::of(start, n, words.len()))
                    .or_insert(0) += 1;
            }
        }
    }

    let mut frequent: Vec<(&[&str], NgramStats)> = stats
        .into_iter()
        .filter(|(_, s)| s.messages >= min_occurrences)
        .collect();
    frequent.sort_by(|(a, sa), (b, sb)| {
        sb.messages
            .cmp(&sa.messages)
            .then_with(|| b.len().cmp(&a.len()))
            .then_with(|| a.cmp(b))
    });

    let mut accepted: Vec<(&[&str], usize)> = Vec::new();
    let mut patterns = Vec::new();
    for (gram, stat) in frequent {
        if patterns.len() >= limit {
            break;
        }
        // A shorter n-gram seen exactly as often as a longer one containing it
        // adds nothing.
        let subsumed = accepted
            .iter()
            .any(|(longer, count)| *count == stat.messages && contains(longer, gram));
        if subsumed {
            continue;
        }

        let mut pieces: Vec<Piece<'_>> = Vec::with_capacity(gram.len() + 2);
        let placement = stat.dominant();
        if matches!(placement, Placement::Trailing | Placement::Interior) {
            pieces.push(Piece::Gap);
        }
        pieces.extend(gram.iter().map(|w| Piece::Word(w)));
        if matches!(placement, Placement::Leading | Placement::Interior) {
            pieces.push(Piece::Gap);
        }

        if let Some(pattern) = build_pattern(&pieces) {
            patterns.push(pattern);
            accepted.push((gram, stat.messages));
        }
    }
    patterns
}

/// At least one word carries alphanumeric content.
fn is_meaningful(gram: &[&str]) -> bool {
    gram.iter().any(|w| w.chars().any(char::is_alphanumeric))
}

fn contains(haystack: &[&str], needle: &[&str]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenized(messages: &[&'static str]) -> Vec<Vec<&'static str>> {
        messages.iter().map(|&m| m.split(' ').collect()).collect()
    }

    #[test]
    fn test_leading_ngram() {
        let messages = tokenized(&[
            "Let me check that for you right away.",
            "Let me check that for the team.",
            "Let me check that for tomorrow.",
        ]);
        let patterns = mine(&messages, 3, 10);
        assert_eq!(patterns[0], "Let me check that for {0}");
    }

    #[test]
    fn test_interior_ngram() {
        let messages = tokenized(&[
            "Sure, the build is now complete for alpha",
            "Okay, the build is now complete for beta",
            "Great, the build is now complete for gamma",
        ]);
        let patterns = mine(&messages, 3, 10);
        assert_eq!(patterns[0], "{0} build is now complete for {1}");
    }

    #[test]
    fn test_below_threshold() {
        let messages = tokenized(&["one two three four", "one two three five"]);
        assert!(mine(&messages, 3, 10).is_empty());
    }

    #[test]
    fn test_limit() {
        let messages = tokenized(&[
            "a b c d e f g h",
            "a b c d e f g h",
            "a b c d e f g h",
        ]);
        assert!(mine(&messages, 2, 1).len() <= 1);
    }
}
