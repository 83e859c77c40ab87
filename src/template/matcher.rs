//! Template matching against a store snapshot.
//!
//! Templates are pre-indexed by the first byte of their leading literal.
//! Templates that open with a slot can start anywhere and are always tried.
//! Matching is a pure function of the snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{Template, TemplateSnapshot, MAX_SLOT_LEN};

/// A successful template match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMatch {
    /// Matched template
    pub template_id: u32,
    /// Extracted slot values, in slot order
    pub slots: Vec<String>,
    /// Size of the template payload for these slots
    pub encoded_size: usize,
}

/// Leading-byte index over a set of templates
#[derive(Debug, Default, Clone)]
pub struct MatchIndex {
    by_leading_byte: HashMap<u8, Vec<u32>>,
    slot_leading: Vec<u32>,
}

impl MatchIndex {
    /// Build the index. IDs in each bucket are ascending.
    pub fn build(templates: &BTreeMap<u32, Arc<Template>>) -> Self {
        let mut index = Self::default();
        for (id, template) in templates {
            match template.leading_byte() {
                Some(b) => index.by_leading_byte.entry(b).or_default().push(*id),
                None => index.slot_leading.push(*id),
            }
        }
        index
    }

    /// Template IDs that could match `text`.
    pub fn candidates<'a>(&'a self, text: &str) -> impl Iterator<Item = u32> + 'a {
        let bucket = text
            .as_bytes()
            .first()
            .and_then(|b| self.by_leading_byte.get(b))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        bucket.iter().chain(self.slot_leading.iter()).copied()
    }
}

impl TemplateSnapshot {
    /// Find the best matching template.
    ///
    /// Among all matches, the smallest encoded payload wins; ties go to the
    /// lowest template ID.
    pub fn find_match(&self, text: &str) -> Option<TemplateMatch> {
        let mut best: Option<(usize, u32, Vec<&str>)> = None;

        for id in self.index().candidates(text) {
            let Some(template) = self.get(id) else {
                continue;
            };
            let Some(slots) = encodable_slots(template, text) else {
                continue;
            };
            let size = Template::encoded_size(&slots);

            let better = match &best {
                None => true,
                Some((best_size, best_id, _)) => (size, id) < (*best_size, *best_id),
            };
            if better {
                best = Some((size, id, slots));
            }
        }

        best.map(|(encoded_size, template_id, slots)| TemplateMatch {
            template_id,
            slots: slots.into_iter().map(str::to_string).collect(),
            encoded_size,
        })
    }

    /// Match `text` against one specific template only.
    pub fn match_template(&self, template_id: u32, text: &str) -> Option<TemplateMatch> {
        let template = self.get(template_id)?;
        let slots = encodable_slots(template, text)?;
        Some(TemplateMatch {
            template_id,
            encoded_size: Template::encoded_size(&slots),
            slots: slots.into_iter().map(str::to_string).collect(),
        })
    }
}

fn encodable_slots<'t>(template: &Template, text: &'t str) -> Option<Vec<&'t str>> {
    let slots = template.extract(text)?;
    if slots.iter().any(|s| s.len() > MAX_SLOT_LEN) {
        return None;
    }
    Some(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateStore;

    fn store_with(patterns: &[(u32, &str)]) -> TemplateStore {
        let store = TemplateStore::empty();
        for (id, pattern) in patterns {
            store.register(*id, pattern, "general").unwrap();
        }
        store
    }

    #[test]
    fn test_find_match_basic() {
        let store = TemplateStore::new();
        let snap = store.snapshot();
        let m = snap
            .find_match("I don't have access to your calendar.")
            .unwrap();
        assert_eq!(m.template_id, 20);
        assert_eq!(m.slots, vec!["your calendar"]);
        assert_eq!(m.encoded_size, 5 + 2 + "your calendar".len());
    }

    #[test]
    fn test_no_match() {
        let store = store_with(&[(1, "Hello {0}!")]);
        assert!(store.snapshot().find_match("Goodbye world").is_none());
    }

    #[test]
    fn test_prefers_smallest_encoding() {
        // Both match; the longer literal leaves less in the slot.
        let store = store_with(&[(5, "{0} is {1}."), (9, "The {0} is {1}.")]);
        let m = store.snapshot().find_match("The sky is blue.").unwrap();
        assert_eq!(m.template_id, 9);
        assert_eq!(m.slots, vec!["sky", "blue"]);
    }

    #[test]
    fn test_tie_breaks_on_lowest_id() {
        let store = store_with(&[(7, "Call {0} now."), (3, "Call {0} now.")]);
        let m = store.snapshot().find_match("Call Bob now.").unwrap();
        assert_eq!(m.template_id, 3);
    }

    #[test]
    fn test_slot_leading_templates_are_candidates() {
        let store = store_with(&[(2, "{0} works by {1}.")]);
        let m = store
            .snapshot()
            .find_match("Rust works by borrowing.")
            .unwrap();
        assert_eq!(m.template_id, 2);
    }

    #[test]
    fn test_deterministic() {
        let store = TemplateStore::new();
        let snap = store.snapshot();
        let text = "The capital of France is Paris.";
        assert_eq!(snap.find_match(text), snap.find_match(text));
    }

    #[test]
    fn test_match_template_specific() {
        let store = TemplateStore::new();
        let snap = store.snapshot();
        assert!(snap.match_template(22, "I cannot browse the web.").is_some());
        assert!(snap.match_template(22, "I can browse the web.").is_none());
        assert!(snap.match_template(9999, "I cannot browse the web.").is_none());
    }
}
