//! Common word prefixes and suffixes.
//!
//! Two sources: the shared openings and closings of each cluster's members,
//! and openings or closings frequent across the whole corpus.

use std::collections::{HashMap, HashSet};

use super::{build_pattern, Piece};

const MIN_AFFIX_WORDS: usize = 2;
const MAX_AFFIX_WORDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Prefix,
    Suffix,
}

pub(super) fn extract(
    messages: &[Vec<&str>],
    clusters: &[Vec<usize>],
    min_occurrences: usize,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut patterns = Vec::new();

    let from_clusters = clusters
        .iter()
        .filter(|c| c.len() >= min_occurrences.max(2))
        .filter_map(|c| cluster_affix(messages, c));
    let from_corpus = [Side::Prefix, Side::Suffix]
        .into_iter()
        .flat_map(|side| frequent_affixes(messages, side, min_occurrences));

    for pattern in from_clusters.chain(from_corpus) {
        if seen.insert(pattern.clone()) {
            patterns.push(pattern);
        }
    }
    patterns
}

/// `prefix {0} suffix` from the words every member starts and ends with.
fn cluster_affix(messages: &[Vec<&str>], members: &[usize]) -> Option<String> {
    let (&first, rest) = members.split_first()?;
    let seed = &messages[first];

    let mut prefix = seed.len();
    let mut suffix = seed.len();
    let mut shortest = seed.len();
    for &i in rest {
        let other = &messages[i];
        prefix = prefix.min(common_len(seed.iter(), other.iter()));
        suffix = suffix.min(common_len(seed.iter().rev(), other.iter().rev()));
        shortest = shortest.min(other.len());
    }
    // Leave room for the slot
    if prefix + suffix >= shortest {
        suffix = shortest.saturating_sub(prefix + 1);
    }
    if prefix == 0 && suffix == 0 {
        return None;
    }

    let mut pieces: Vec<Piece<'_>> = seed[..prefix].iter().map(|w| Piece::Word(w)).collect();
    pieces.push(Piece::Gap);
    pieces.extend(seed[seed.len() - suffix..].iter().map(|w| Piece::Word(w)));
    build_pattern(&pieces)
}

fn common_len<'a, 'b>(
    a: impl Iterator<Item = &'a &'a str>,
    b: impl Iterator<Item = &'b &'b str>,
) -> usize {
    a.zip(b).take_while(|(x, y)| x == y).count()
}

/// Maximal openings (or closings) shared by at least `min_occurrences`
/// messages.
fn frequent_affixes(messages: &[Vec<&str>], side: Side, min_occurrences: usize) -> Vec<String> {
    let mut counts: HashMap<&[&str], usize> = HashMap::new();
    for words in messages {
        let longest = MAX_AFFIX_WORDS.min(words.len().saturating_sub(1));
        for k in MIN_AFFIX_WORDS..=longest {
            let affix = match side {
                Side::Prefix => &words[..k],
                Side::Suffix => &words[words.len() - k..],
            };
            *counts.entry(affix).or_insert(0) += 1;
        }
    }

    let frequent: Vec<(&[&str], usize)> = counts
        .into_iter()
        .filter(|(_, n)| *n >= min_occurrences)
        .collect();

    let extends = |longer: &[&str], shorter: &[&str]| match side {
        Side::Prefix => longer.starts_with(shorter),
        Side::Suffix => longer.ends_with(shorter),
    };
    let mut maximal: Vec<(&[&str], usize)> = frequent
        .iter()
        .filter(|(affix, n)| {
            !frequent
                .iter()
                .any(|(other, m)| other.len() > affix.len() && m == n && extends(other, affix))
        })
        .copied()
        .collect();
    maximal.sort_by(|(a, na), (b, nb)| nb.cmp(na).then_with(|| a.cmp(b)));

    maximal
        .into_iter()
        .filter_map(|(affix, _)| {
            let words = affix.iter().map(|w| Piece::Word(w));
            let pieces: Vec<Piece<'_>> = match side {
                Side::Prefix => words.chain(std::iter::once(Piece::Gap)).collect(),
                Side::Suffix => std::iter::once(Piece::Gap).chain(words).collect(),
            };
            build_pattern(&pieces)
        })
        .collect()
}
