//! Offline template discovery.
//!
//! Mines a corpus of AI responses for recurring shapes and proposes them as
//! template candidates. Four independent passes feed one scoring stage:
//!
//! | Pass | Finds |
//! |------|-------|
//! | [`DiscoveryPass::NGram`] | frequent word n-grams, with the surrounding text as slots |
//! | [`DiscoveryPass::Clustering`] | groups of similar messages, varying words as slots |
//! | [`DiscoveryPass::Structural`] | messages matching known response shapes (regex rules) |
//! | [`DiscoveryPass::Affix`] | shared word prefixes and suffixes |
//!
//! Every proposed pattern is scored by actually matching it against the
//! corpus, so a candidate's occurrence count and ratio are exact for that
//! corpus rather than estimated from the pattern text.
//!
//! Discovery never touches the live store. Promotion is a separate step,
//! see [`crate::template::TemplateStore::promote`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use aura::config::DiscoveryConfig;
//! use aura::discovery::TemplateDiscovery;
//!
//! let discovery = TemplateDiscovery::new(DiscoveryConfig::default())?;
//! let candidates = discovery.discover(&corpus, Some(&store.snapshot()))?;
//! for candidate in candidates.iter().take(5) {
//!     store.promote(candidate)?;
//! }
//! ```

mod affix;
mod cluster;
mod ngram;
mod structural;

pub use structural::{default_rules, StructuralRule};

use std::collections::HashSet;
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::DiscoveryConfig;
use crate::error::{AuraError, Result};
use crate::template::{categorize, Template, TemplateSnapshot};

/// Slot examples kept per candidate
const MAX_EXAMPLES: usize = 3;

/// Pass that proposed a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryPass {
    /// Frequent word n-grams
    NGram,
    /// Similarity clustering
    Clustering,
    /// Structural regex rules
    Structural,
    /// Common prefixes and suffixes
    Affix,
}

impl fmt::Display for DiscoveryPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscoveryPass::NGram => "ngram",
            DiscoveryPass::Clustering => "clustering",
            DiscoveryPass::Structural => "structural",
            DiscoveryPass::Affix => "affix",
        };
        f.write_str(name)
    }
}

/// A proposed template, scored against the corpus it was mined from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCandidate {
    /// Pattern with `{n}` slots
    pub pattern: String,
    /// Semantic category
    pub category: String,
    /// Corpus messages the pattern matches
    pub occurrences: usize,
    /// Slot values from the first few matches
    pub example_slot_values: Vec<Vec<String>>,
    /// Plain bytes over template payload bytes, across matches
    pub estimated_ratio: f64,
    /// Confidence (0.0-1.0)
    pub confidence: f64,
    /// Pass that proposed the pattern
    pub source: DiscoveryPass,
}

impl TemplateCandidate {
    /// Ranking score
    pub fn score(&self) -> f64 {
        self.confidence * self.estimated_ratio
    }
}

/// Pattern proposed by a pass, before scoring
#[derive(Debug, Clone)]
struct Proposal {
    pattern: String,
    source: DiscoveryPass,
    category: Option<String>,
}

impl Proposal {
    fn new(pattern: String, source: DiscoveryPass) -> Self {
        Self {
            pattern,
            source,
            category: None,
        }
    }
}

/// Template discovery engine
#[derive(Debug, Clone)]
pub struct TemplateDiscovery {
    config: DiscoveryConfig,
    rules: Vec<StructuralRule>,
    blocked: Vec<String>,
}

impl TemplateDiscovery {
    /// Create an engine. Compiles the built-in structural rules plus any
    /// configured ones.
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let rules = default_rules()
            .iter()
            .chain(config.structural_rules.iter())
            .map(StructuralRule::from_config)
            .collect::<Result<Vec<_>>>()?;
        let blocked = config
            .blocked_keywords
            .iter()
            .filter(|k| !k.is_empty())
            .map(|k| k.to_lowercase())
            .collect();

        Ok(Self {
            config,
            rules,
            blocked,
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Compiled structural rules, built-ins first
    pub fn rules(&self) -> &[StructuralRule] {
        &self.rules
    }

    /// Mine `corpus` for candidates, best first.
    ///
    /// Patterns already present in `existing` are skipped. Runs on a
    /// dedicated pool of `workers` threads.
    pub fn discover<S>(
        &self,
        corpus: &[S],
        existing: Option<&TemplateSnapshot>,
    ) -> Result<Vec<TemplateCandidate>>
    where
        S: AsRef<str> + Sync,
    {
        let messages: Vec<&str> = corpus
            .iter()
            .map(AsRef::as_ref)
            .filter(|m| !m.is_empty())
            .collect();
        if messages.len() < self.config.min_occurrences.max(1) {
            tracing::debug!(messages = messages.len(), "Corpus too small for discovery");
            return Ok(Vec::new());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .thread_name(|i| format!("aura-discovery-{i}"))
            .build()
            .map_err(|e| AuraError::Discovery(format!("Failed to start worker pool: {e}")))?;

        Ok(pool.install(|| self.run(&messages, existing)))
    }

    fn run(&self, messages: &[&str], existing: Option<&TemplateSnapshot>) -> Vec<TemplateCandidate> {
        let tokenized: Vec<Vec<&str>> = messages.iter().map(|m| tokenize(m)).collect();
        let min_occurrences = self.config.min_occurrences.max(1);

        let mut proposals: Vec<Proposal> = Vec::new();

        proposals.extend(
            ngram::mine(&tokenized, min_occurrences, self.config.max_candidates)
                .into_iter()
                .map(|p| Proposal::new(p, DiscoveryPass::NGram)),
        );

        let clusters = cluster::cluster(&tokenized, self.config.similarity_threshold);
        proposals.extend(
            clusters
                .iter()
                .filter(|c| c.len() >= 2)
                .filter_map(|c| cluster::skeleton(&tokenized, c))
                .map(|p| Proposal::new(p, DiscoveryPass::Clustering)),
        );

        proposals.extend(self.rules.iter().filter_map(|rule| {
            let matched = messages.par_iter().filter(|m| rule.is_match(m)).count();
            (matched > 0).then(|| Proposal {
                pattern: rule.template().to_string(),
                source: DiscoveryPass::Structural,
                category: rule.category().map(str::to_string),
            })
        }));

        proposals.extend(
            affix::extract(&tokenized, &clusters, min_occurrences)
                .into_iter()
                .map(|p| Proposal::new(p, DiscoveryPass::Affix)),
        );

        let proposed = proposals.len();
        let mut seen = HashSet::new();
        proposals.retain(|p| {
            seen.insert(p.pattern.clone())
                && !existing.is_some_and(|s| s.contains_pattern(&p.pattern))
                && !self.is_blocked(&p.pattern)
        });

        let mut candidates: Vec<TemplateCandidate> = proposals
            .par_iter()
            .filter_map(|p| self.score(p, messages))
            .filter(|c| {
                !c.example_slot_values
                    .iter()
                    .flatten()
                    .any(|value| self.is_blocked(value))
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score()
                .total_cmp(&a.score())
                .then_with(|| b.occurrences.cmp(&a.occurrences))
                .then_with(|| a.pattern.cmp(&b.pattern))
        });
        candidates.truncate(self.config.max_candidates);

        tracing::info!(
            messages = messages.len(),
            clusters = clusters.len(),
            proposed,
            unique = proposals.len(),
            accepted = candidates.len(),
            "Template discovery complete"
        );
        candidates
    }

    /// Match a proposal against the corpus and apply the thresholds.
    fn score(&self, proposal: &Proposal, messages: &[&str]) -> Option<TemplateCandidate> {
        let category = proposal
            .category
            .clone()
            .unwrap_or_else(|| categorize(&proposal.pattern).to_string());
        let template = Template::new(0, &proposal.pattern, category.as_str())
            .ok()?
            .disallow_empty_slots();

        let mut occurrences = 0usize;
        let mut plain = 0usize;
        let mut encoded = 0usize;
        let mut regularity = 0.0f64;
        let mut examples = Vec::new();

        for message in messages {
            let Some(slots) = template.extract(message) else {
                continue;
            };
            occurrences += 1;
            plain += message.len();
            encoded += Template::encoded_size(&slots);
            regularity += template.literal_len() as f64 / message.len() as f64;
            if examples.len() < MAX_EXAMPLES {
                examples.push(slots.iter().map(|s| (*s).to_string()).collect());
            }
        }

        if occurrences < self.config.min_occurrences.max(1) || encoded == 0 {
            return None;
        }

        let estimated_ratio = plain as f64 / encoded as f64;
        let sample = 1.0 - 1.0 / (occurrences as f64 + 1.0);
        let confidence = (sample * regularity / occurrences as f64).sqrt();
        if estimated_ratio < self.config.min_ratio || confidence < self.config.min_confidence {
            tracing::trace!(
                pattern = %proposal.pattern,
                occurrences,
                estimated_ratio,
                confidence,
                "Candidate below threshold"
            );
            return None;
        }

        Some(TemplateCandidate {
            pattern: proposal.pattern.clone(),
            category,
            occurrences,
            example_slot_values: examples,
            estimated_ratio,
            confidence,
            source: proposal.source,
        })
    }

    fn is_blocked(&self, text: &str) -> bool {
        if self.blocked.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.blocked.iter().any(|k| lower.contains(k.as_str()))
    }
}

/// Mine `corpus` with default settings and the given thresholds.
pub fn discover<S>(
    corpus: &[S],
    min_occurrences: usize,
    min_ratio: f64,
    min_confidence: f64,
) -> Result<Vec<TemplateCandidate>>
where
    S: AsRef<str> + Sync,
{
    let config = DiscoveryConfig {
        min_occurrences,
        min_ratio,
        min_confidence,
        ..DiscoveryConfig::default()
    };
    TemplateDiscovery::new(config)?.discover(corpus, None)
}

/// Split on single spaces. Joining with `' '` restores the message exactly.
fn tokenize(message: &str) -> Vec<&str> {
    message.split(' ').collect()
}

/// Element of a pattern under construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece<'a> {
    Word(&'a str),
    Gap,
}

/// Join pieces with single spaces, merging runs of gaps into one slot.
///
/// Returns `None` when the result would have no literal text.
fn build_pattern(pieces: &[Piece<'_>]) -> Option<String> {
    let mut merged: Vec<Piece<'_>> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if *piece == Piece::Gap && merged.last() == Some(&Piece::Gap) {
            continue;
        }
        merged.push(*piece);
    }
    if !merged.iter().any(|p| matches!(p, Piece::Word(_))) {
        return None;
    }

    let mut pattern = String::new();
    let mut slot = 0usize;
    for (i, piece) in merged.iter().enumerate() {
        if i > 0 {
            pattern.push(' ');
        }
        match piece {
            Piece::Word(word) => push_escaped(&mut pattern, word),
            Piece::Gap => {
                pattern.push('{');
                pattern.push_str(&slot.to_string());
                pattern.push('}');
                slot += 1;
            },
        }
    }
    Some(pattern)
}

fn push_escaped(pattern: &mut String, literal: &str) {
    for c in literal.chars() {
        match c {
            '{' => pattern.push_str("{{"),
            '}' => pattern.push_str("}}"),
            _ => pattern.push(c),
        }
    }
}
