//! Similarity clustering over word sequences.
//!
//! Greedy single pass: the first unclustered message seeds a cluster and
//! every remaining message at or above the similarity threshold joins it.
//! Similarity is `2 * LCS / (len_a + len_b)` over words.

use rayon::prelude::*;

use super::{build_pattern, Piece};

/// Messages longer than this are left out of clustering
const MAX_CLUSTER_WORDS: usize = 256;

/// Group message indices into clusters. Singletons are returned as
/// one-element clusters; very long messages are left out entirely.
pub(super) fn cluster(messages: &[Vec<&str>], threshold: f64) -> Vec<Vec<usize>> {
    let mut unclustered: Vec<usize> = (0..messages.len())
        .filter(|&i| messages[i].len() <= MAX_CLUSTER_WORDS)
        .collect();
    let mut clusters = Vec::new();

    while let Some((&seed, rest)) = unclustered.split_first() {
        let seed_words = &messages[seed];
        let joined: Vec<bool> = rest
            .par_iter()
            .map(|&i| {
                let other = &messages[i];
                within_length_bound(seed_words.len(), other.len(), threshold)
                    && similarity(seed_words, other) >= threshold
            })
            .collect();

        let mut members = vec![seed];
        let mut remaining = Vec::with_capacity(rest.len());
        for (&i, joins) in rest.iter().zip(joined) {
            if joins {
                members.push(i);
            } else {
                remaining.push(i);
            }
        }
        clusters.push(members);
        unclustered = remaining;
    }

    tracing::debug!(
        clusters = clusters.len(),
        multi = clusters.iter().filter(|c| c.len() > 1).count(),
        "Clustered corpus"
    );
    clusters
}

/// Similarity can reach `threshold` given the lengths alone
fn within_length_bound(a: usize, b: usize, threshold: f64) -> bool {
    let total = a + b;
    total == 0 || 2.0 * a.min(b) as f64 / total as f64 >= threshold
}

/// Word-level similarity in `[0, 1]`
pub(super) fn similarity(a: &[&str], b: &[&str]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    2.0 * lcs(a, b).len() as f64 / total as f64
}

/// Longest common subsequence of words
pub(super) fn lcs<'a>(a: &[&'a str], b: &[&str]) -> Vec<&'a str> {
    let (n, m) = (a.len(), b.len());
    let mut table = vec![0u16; (n + 1) * (m + 1)];
    let at = |i: usize, j: usize| i * (m + 1) + j;

    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[at(i, j)] = if a[i] == b[j] {
                table[at(i + 1, j + 1)] + 1
            } else {
                table[at(i + 1, j)].max(table[at(i, j + 1)])
            };
        }
    }

    let mut out = Vec::with_capacity(usize::from(table[at(0, 0)]));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            out.push(a[i]);
            i += 1;
            j += 1;
        } else if table[at(i + 1, j)] >= table[at(i, j + 1)] {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Pattern for a cluster: words common to every member stay literal, the
/// rest of the seed becomes slots.
pub(super) fn skeleton(messages: &[Vec<&str>], members: &[usize]) -> Option<String> {
    let (&seed, rest) = members.split_first()?;
    let seed_words = &messages[seed];

    let mut common: Vec<&str> = seed_words.clone();
    for &i in rest {
        common = lcs(&common, &messages[i]);
        if common.is_empty() {
            return None;
        }
    }

    let mut next = common.iter().peekable();
    let pieces: Vec<Piece<'_>> = seed_words
        .iter()
        .map(|word| {
            if next.peek().is_some_and(|c| *c == word) {
                next.next();
                Piece::Word(word)
            } else {
                Piece::Gap
            }
        })
        .collect();
    build_pattern(&pieces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<&str> {
        s.split(' ').collect()
    }

    #[test]
    fn test_lcs() {
        let a = words("the cat sat on the mat");
        let b = words("the dog sat on a mat");
        assert_eq!(lcs(&a, &b), vec!["the", "sat", "on", "mat"]);
    }

    #[test]
    fn test_similarity() {
        let a = words("a b c d");
        assert!((similarity(&a, &a) - 1.0).abs() < 1e-9);
        assert!((similarity(&a, &words("a b x y")) - 0.5).abs() < 1e-9);
        assert_eq!(similarity(&a, &[]), 0.0);
    }

    #[test]
    fn test_cluster_partition() {
        let texts = [
            "I can help you with billing today.",
            "I can help you with shipping today.",
            "Completely different sentence here.",
            "I can help you with returns today.",
        ];
        let messages: Vec<Vec<&str>> = texts.iter().map(|m| words(m)).collect();

        let clusters = cluster(&messages, 0.6);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], vec![0, 1, 3]);
        assert_eq!(clusters[1], vec![2]);
    }

    #[test]
    fn test_skeleton() {
        let texts = [
            "I can help you with billing today.",
            "I can help you with shipping today.",
            "I can help you with returns today.",
        ];
        let messages: Vec<Vec<&str>> = texts.iter().map(|m| words(m)).collect();
        assert_eq!(
            skeleton(&messages, &[0, 1, 2]).unwrap(),
            "I can help you with {0} today."
        );
    }

    #[test]
    fn test_skeleton_without_common_words() {
        let messages = vec![words("alpha beta"), words("gamma delta")];
        assert!(skeleton(&messages, &[0, 1]).is_none());
    }
}
