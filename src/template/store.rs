//! Versioned template store.
//!
//! The store publishes immutable [`TemplateSnapshot`]s. Encoders and decoders
//! take one `Arc<TemplateSnapshot>` per message and never observe a partial
//! update. Writers (registration, promotion, demotion, file load) are
//! serialised by a writer mutex, build the next snapshot off to the side, and
//! swap the pointer in; readers only contend for the pointer clone.
//!
//! # ID ranges
//!
//! | Range     | Use                                   |
//! |-----------|---------------------------------------|
//! | 0-127     | Built-in templates                    |
//! | 128-191   | Discovered templates (promotion)      |
//! | 192-255   | Client-synchronised templates         |
//! | 256+      | Manual registration                   |

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{categorize, MatchIndex, Template};
use crate::discovery::TemplateCandidate;
use crate::error::{AuraError, Result};

/// Built-in template IDs
pub const BUILTIN_RANGE: Range<u32> = 0..128;

/// IDs assigned to promoted discovery candidates
pub const DYNAMIC_RANGE: Range<u32> = 128..192;

/// IDs assigned to client-synchronised templates
pub const CLIENT_SYNC_RANGE: Range<u32> = 192..256;

/// Built-in template library: (id, pattern, category)
const DEFAULT_TEMPLATES: &[(u32, &str, &str)] = &[
    // Common responses
    (0, "Yes", "responses"),
    (1, "No", "responses"),
    (2, "I don't know", "responses"),
    (3, "I'm not sure", "responses"),
    (4, "That's correct", "responses"),
    (5, "That's incorrect", "responses"),
    (6, "Maybe", "responses"),
    (7, "Probably", "responses"),
    (8, "Definitely", "responses"),
    (9, "Absolutely", "responses"),
    // Limitations & abilities
    (20, "I don't have access to {0}.", "limitations"),
    (21, "I don't have access to {0}. {1}", "limitations"),
    (22, "I cannot {0}.", "limitations"),
    (23, "I'm unable to {0}.", "limitations"),
    (24, "I can't {0}.", "limitations"),
    (25, "I can help with {0}.", "abilities"),
    (26, "I can help you {0}.", "abilities"),
    (27, "I'm able to {0}.", "abilities"),
    // Facts & definitions
    (40, "{0} is {1}.", "facts"),
    (41, "{0} are {1}.", "facts"),
    (42, "The {0} is {1}.", "facts"),
    (43, "The {0} are {1}.", "facts"),
    (44, "The {0} of {1} is {2}.", "facts"),
    (45, "{0} means {1}.", "definitions"),
    (46, "{0} refers to {1}.", "definitions"),
    // Questions
    (60, "What {0}?", "clarifications"),
    (61, "Why {0}?", "clarifications"),
    (62, "How {0}?", "clarifications"),
    (63, "When {0}?", "clarifications"),
    (64, "Where {0}?", "clarifications"),
    (65, "Can you {0}?", "clarifications"),
    (66, "Could you {0}?", "clarifications"),
    (67, "Would you {0}?", "clarifications"),
    (68, "Could you clarify {0}?", "clarifications"),
    (69, "What specific {0} would you like to know more about?", "clarifications"),
    // Instructions & recommendations
    (70, "To {0}, {1}.", "instructions"),
    (71, "To {0}, use {1}.", "instructions"),
    (72, "To {0}, use {1}: `{2}`", "instructions"),
    (73, "You can {0} by {1}.", "instructions"),
    (74, "Try {0}.", "recommendations"),
    (75, "I recommend {0}.", "recommendations"),
    (76, "I suggest {0}.", "recommendations"),
    (77, "Consider {0}.", "recommendations"),
    (78, "To {0}, I recommend: {1}", "recommendations"),
    // Explanations
    (90, "{0} works by {1}.", "explanations"),
    (91, "{0} is used for {1}.", "explanations"),
    (92, "The {0} of {1} is {2} because {3}.", "explanations"),
    (93, "{0} because {1}.", "explanations"),
    (94, "This is {0}.", "explanations"),
    (95, "This means {0}.", "explanations"),
    // Code examples
    (100, "```{0}\n{1}\n```", "code_examples"),
    (101, "Here's an example: `{0}`", "code_examples"),
    (102, "Here's how to {0}:\n\n```{1}\n{2}\n```", "code_examples"),
    (103, "For example: {0}", "code_examples"),
    // Lists & enumerations
    (110, "Common {0} include: {1}.", "enumerations"),
    (111, "The main {0} are: {1}.", "enumerations"),
    (112, "Examples include: {0}.", "enumerations"),
    (113, "{0}, {1}, and {2}.", "enumerations"),
    (114, "{0} and {1}.", "enumerations"),
    // Comparisons
    (120, "The main {0} between {1} are: {2}", "comparisons"),
    (122, "{0} is better than {1} because {2}.", "comparisons"),
    (123, "{0} is similar to {1}.", "comparisons"),
    (124, "{0} differs from {1} in {2}.", "comparisons"),
    (125, "Unlike {0}, {1} {2}.", "comparisons"),
    (126, "Both {0} and {1} {2}.", "comparisons"),
    (127, "Neither {0} nor {1} {2}.", "comparisons"),
];

/// An immutable, versioned view of the template store
#[derive(Debug)]
pub struct TemplateSnapshot {
    version: u64,
    templates: BTreeMap<u32, Arc<Template>>,
    index: MatchIndex,
}

impl TemplateSnapshot {
    fn build(version: u64, templates: BTreeMap<u32, Arc<Template>>) -> Self {
        let index = MatchIndex::build(&templates);
        Self {
            version,
            templates,
            index,
        }
    }

    /// Snapshot version (increments on every publish)
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Look up a template by ID
    pub fn get(&self, id: u32) -> Option<&Arc<Template>> {
        self.templates.get(&id)
    }

    /// Whether a template ID is present
    pub fn contains(&self, id: u32) -> bool {
        self.templates.contains_key(&id)
    }

    /// Whether any template has exactly this pattern
    pub fn contains_pattern(&self, pattern: &str) -> bool {
        self.templates.values().any(|t| t.pattern() == pattern)
    }

    /// Number of templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates in ascending ID order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Template>> {
        self.templates.values()
    }

    pub(super) fn index(&self) -> &MatchIndex {
        &self.index
    }

    fn first_free_id(&self, range: Range<u32>) -> Option<u32> {
        range.into_iter().find(|id| !self.templates.contains_key(id))
    }
}

/// Audit record emitted for every promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRecord {
    /// Assigned template ID
    pub template_id: u32,
    /// Promoted pattern
    pub pattern: String,
    /// Category
    pub category: String,
    /// Corpus occurrences at discovery time
    pub occurrences: usize,
    /// Estimated compression ratio at discovery time
    pub estimated_ratio: f64,
    /// Discovery confidence
    pub confidence: f64,
    /// Store version that first contains the template
    pub store_version: u64,
    /// Promotion time
    pub promoted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    templates: BTreeMap<u32, StoredTemplate>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredTemplate {
    pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
}

/// Shared, copy-on-write template store
#[derive(Debug)]
pub struct TemplateStore {
    current: RwLock<Arc<TemplateSnapshot>>,
    writer: Mutex<()>,
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateStore {
    /// Create a store holding the built-in templates
    pub fn new() -> Self {
        let mut templates = BTreeMap::new();
        for (id, pattern, category) in DEFAULT_TEMPLATES {
            match Template::new(*id, pattern, *category) {
                Ok(t) => {
                    templates.insert(*id, Arc::new(t));
                },
                Err(e) => tracing::error!("Built-in template {} rejected: {}", id, e),
            }
        }
        Self::from_map(templates)
    }

    /// Create a store with no templates
    pub fn empty() -> Self {
        Self::from_map(BTreeMap::new())
    }

    fn from_map(templates: BTreeMap<u32, Arc<Template>>) -> Self {
        Self {
            current: RwLock::new(Arc::new(TemplateSnapshot::build(1, templates))),
            writer: Mutex::new(()),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<TemplateSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Current snapshot version
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Build and publish the next snapshot from an edit of the current map.
    fn publish<T>(
        &self,
        edit: impl FnOnce(&TemplateSnapshot, &mut BTreeMap<u32, Arc<Template>>) -> Result<T>,
    ) -> Result<(T, u64)> {
        let _guard = self.writer.lock();
        let current = self.snapshot();
        let mut templates = current.templates.clone();
        let out = edit(&current, &mut templates)?;

        let version = current.version + 1;
        let next = Arc::new(TemplateSnapshot::build(version, templates));
        let previous = {
            let mut slot = self.current.write();
            std::mem::replace(&mut *slot, next)
        };
        // Freed outside the lock when this was the last reference
        drop(previous);
        tracing::debug!("Published template snapshot v{}", version);
        Ok((out, version))
    }

    /// Register a template. Re-registering the same pattern under the same
    /// ID is a no-op; a different pattern under an existing ID is rejected.
    pub fn register(&self, id: u32, pattern: &str, category: &str) -> Result<u64> {
        self.register_all([(id, pattern.to_string(), category.to_string())])
    }

    /// Register several templates in one snapshot.
    pub fn register_all(
        &self,
        entries: impl IntoIterator<Item = (u32, String, String)>,
    ) -> Result<u64> {
        let entries: Vec<_> = entries.into_iter().collect();
        let ((), version) = self.publish(|_, templates| {
            for (id, pattern, category) in entries {
                insert_checked(templates, id, &pattern, &category)?;
            }
            Ok(())
        })?;
        Ok(version)
    }

    /// Next free ID in the discovered range
    pub fn allocate_dynamic_id(&self) -> Result<u32> {
        self.snapshot()
            .first_free_id(DYNAMIC_RANGE)
            .ok_or_else(|| AuraError::Discovery("Dynamic template ID range exhausted".to_string()))
    }

    /// Promote a discovery candidate into the store.
    pub fn promote(&self, candidate: &TemplateCandidate) -> Result<PromotionRecord> {
        let (template_id, store_version) = self.publish(|current, templates| {
            if current.contains_pattern(&candidate.pattern) {
                return Err(AuraError::Discovery(format!(
                    "Pattern already registered: {:?}",
                    candidate.pattern
                )));
            }
            let id = current.first_free_id(DYNAMIC_RANGE).ok_or_else(|| {
                AuraError::Discovery("Dynamic template ID range exhausted".to_string())
            })?;
            insert_checked(templates, id, &candidate.pattern, &candidate.category)?;
            Ok(id)
        })?;

        let record = PromotionRecord {
            template_id,
            pattern: candidate.pattern.clone(),
            category: candidate.category.clone(),
            occurrences: candidate.occurrences,
            estimated_ratio: candidate.estimated_ratio,
            confidence: candidate.confidence,
            store_version,
            promoted_at: Utc::now(),
        };
        tracing::info!(
            template_id,
            pattern = %record.pattern,
            occurrences = record.occurrences,
            ratio = record.estimated_ratio,
            confidence = record.confidence,
            "Promoted template"
        );
        Ok(record)
    }

    /// Replace the client-synchronised range with `templates`.
    pub fn sync_client_templates(&self, templates: &BTreeMap<u32, String>) -> Result<u64> {
        if let Some(id) = templates.keys().find(|id| !CLIENT_SYNC_RANGE.contains(id)) {
            return Err(AuraError::InvalidTemplate(format!(
                "Client template ID {id} outside {CLIENT_SYNC_RANGE:?}"
            )));
        }
        let ((), version) = self.publish(|_, current| {
            current.retain(|id, _| !CLIENT_SYNC_RANGE.contains(id));
            for (id, pattern) in templates {
                insert_checked(current, *id, pattern, categorize(pattern))?;
            }
            Ok(())
        })?;
        Ok(version)
    }

    /// Remove a non-built-in template. In-flight containers that reference
    /// it will fail to decode against later snapshots.
    pub fn demote(&self, id: u32) -> Result<u64> {
        if BUILTIN_RANGE.contains(&id) {
            return Err(AuraError::InvalidTemplate(format!(
                "Built-in template {id} cannot be demoted"
            )));
        }
        let ((), version) = self.publish(|_, templates| {
            templates
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| AuraError::InvalidTemplate(format!("No template with ID {id}")))
        })?;
        tracing::info!(template_id = id, store_version = version, "Demoted template");
        Ok(version)
    }

    /// Demote non-built-in templates whose rolling ratio stays below
    /// `min_ratio` after at least `min_samples` uses. Returns demoted IDs.
    pub fn demote_underperformers(&self, min_samples: u64, min_ratio: f64) -> Result<Vec<u32>> {
        let snapshot = self.snapshot();
        let doomed: Vec<u32> = snapshot
            .iter()
            .filter(|t| !BUILTIN_RANGE.contains(&t.id()))
            .filter(|t| t.stats().uses() >= min_samples && t.stats().average_ratio() < min_ratio)
            .map(|t| t.id())
            .collect();
        if doomed.is_empty() {
            return Ok(doomed);
        }

        let ((), version) = self.publish(|_, templates| {
            for id in &doomed {
                templates.remove(id);
            }
            Ok(())
        })?;
        tracing::info!(
            demoted = ?doomed,
            store_version = version,
            "Demoted underperforming templates"
        );
        Ok(doomed)
    }

    /// Load templates from a JSON store file:
    /// `{"templates": {"<id>": {"pattern": "...", "category": "..."}}}`
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<u64> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let file: StoreFile = serde_json::from_str(&content)?;
        let entries = file.templates.into_iter().map(|(id, stored)| {
            let category = stored
                .category
                .unwrap_or_else(|| categorize(&stored.pattern).to_string());
            (id, stored.pattern, category)
        });
        let version = self.register_all(entries)?;
        tracing::info!(
            path = %path.as_ref().display(),
            store_version = version,
            "Loaded template store"
        );
        Ok(version)
    }

    /// Write the current snapshot to a JSON store file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = self.snapshot();
        let file = StoreFile {
            templates: snapshot
                .iter()
                .map(|t| {
                    (
                        t.id(),
                        StoredTemplate {
                            pattern: t.pattern().to_string(),
                            category: Some(t.category().to_string()),
                        },
                    )
                })
                .collect(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}

fn insert_checked(
    templates: &mut BTreeMap<u32, Arc<Template>>,
    id: u32,
    pattern: &str,
    category: &str,
) -> Result<()> {
    if let Some(existing) = templates.get(&id) {
        if existing.pattern() == pattern {
            return Ok(());
        }
        return Err(AuraError::InvalidTemplate(format!(
            "Template {id} already registered with a different pattern; use a new ID"
        )));
    }
    let template = Template::new(id, pattern, category)?;
    templates.insert(id, Arc::new(template));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryPass;

    fn candidate(pattern: &str) -> TemplateCandidate {
        TemplateCandidate {
            pattern: pattern.to_string(),
            category: "general".to_string(),
            occurrences: 5,
            example_slot_values: Vec::new(),
            estimated_ratio: 3.0,
            confidence: 0.9,
            source: DiscoveryPass::Clustering,
        }
    }

    #[test]
    fn test_builtins_loaded() {
        let store = TemplateStore::new();
        let snap = store.snapshot();
        assert!(snap.len() > 60);
        assert_eq!(snap.get(20).unwrap().pattern(), "I don't have access to {0}.");
        assert_eq!(snap.get(20).unwrap().category(), "limitations");
    }

    #[test]
    fn test_register_bumps_version() {
        let store = TemplateStore::empty();
        let v0 = store.version();
        let v1 = store.register(300, "Order {0} shipped.", "general").unwrap();
        assert_eq!(v1, v0 + 1);
        assert!(store.snapshot().contains(300));
    }

    #[test]
    fn test_pattern_immutable() {
        let store = TemplateStore::empty();
        store.register(300, "Order {0} shipped.", "general").unwrap();
        // Same pattern: fine
        assert!(store.register(300, "Order {0} shipped.", "general").is_ok());
        // Different pattern under same ID: rejected
        assert!(matches!(
            store.register(300, "Order {0} delivered.", "general"),
            Err(AuraError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_reject_ambiguous_registration() {
        let store = TemplateStore::empty();
        assert!(store.register(301, "{0}{1}", "general").is_err());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_old_snapshot_unaffected_by_demotion() {
        let store = TemplateStore::new();
        store.register(300, "Order {0} shipped.", "general").unwrap();
        let before = store.snapshot();
        store.demote(300).unwrap();
        assert!(before.contains(300));
        assert!(!store.snapshot().contains(300));
        assert!(store.demote(300).is_err());
    }

    #[test]
    fn test_builtins_cannot_be_demoted() {
        let store = TemplateStore::new();
        assert!(store.demote(20).is_err());
        assert!(store.snapshot().contains(20));
    }

    #[test]
    fn test_promote_assigns_dynamic_id() {
        let store = TemplateStore::new();
        let record = store.promote(&candidate("Your order {0} has shipped.")).unwrap();
        assert_eq!(record.template_id, DYNAMIC_RANGE.start);
        assert_eq!(record.store_version, store.version());

        let second = store.promote(&candidate("Your refund {0} was issued.")).unwrap();
        assert_eq!(second.template_id, DYNAMIC_RANGE.start + 1);

        // Duplicate pattern is refused
        assert!(store.promote(&candidate("Your order {0} has shipped.")).is_err());
    }

    #[test]
    fn test_demote_underperformers() {
        let store = TemplateStore::new();
        let record = store.promote(&candidate("Ticket {0} closed.")).unwrap();
        let snap = store.snapshot();
        let t = snap.get(record.template_id).unwrap();
        for _ in 0..10 {
            t.stats().record(20, 19);
        }
        // Built-in templates are never auto-demoted
        snap.get(20).unwrap().stats().record(10, 20);

        let demoted = store.demote_underperformers(10, 1.5).unwrap();
        assert_eq!(demoted, vec![record.template_id]);
        assert!(store.snapshot().contains(20));
    }

    #[test]
    fn test_stats_survive_republish() {
        let store = TemplateStore::new();
        store.snapshot().get(22).unwrap().stats().record(30, 10);
        store.register(400, "Build {0} passed.", "general").unwrap();
        assert_eq!(store.snapshot().get(22).unwrap().stats().uses(), 1);
    }

    #[test]
    fn test_client_sync_range() {
        let store = TemplateStore::new();
        let mut client = BTreeMap::new();
        client.insert(192, "Synced {0}.".to_string());
        store.sync_client_templates(&client).unwrap();
        assert!(store.snapshot().contains(192));

        store.sync_client_templates(&BTreeMap::new()).unwrap();
        assert!(!store.snapshot().contains(192));

        let mut bad = BTreeMap::new();
        bad.insert(5, "Nope {0}.".to_string());
        assert!(store.sync_client_templates(&bad).is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");

        let store = TemplateStore::empty();
        store.register(500, "Deploy {0} finished in {1}s.", "general").unwrap();
        store.save_to_file(&path).unwrap();

        let loaded = TemplateStore::empty();
        loaded.load_from_file(&path).unwrap();
        let snap = loaded.snapshot();
        assert_eq!(snap.get(500).unwrap().pattern(), "Deploy {0} finished in {1}s.");
    }

    #[test]
    fn test_load_rejects_bad_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"templates": {"7": {"pattern": "{0}{1}"}}}"#).unwrap();

        let store = TemplateStore::empty();
        assert!(store.load_from_file(&path).is_err());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_readers_see_consistent_snapshots_during_publish() {
        use crate::codec::{decode_payload, encode_payload};
        use std::sync::atomic::{AtomicBool, Ordering};

        let store = TemplateStore::new();
        let base = store.snapshot().len();
        let text = "Build 4711 passed all 52 checks.";
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let mut seen = 0u32;
                    while !done.load(Ordering::Acquire) || seen == 0 {
                        let snap = store.snapshot();
                        // Even versions follow a promote, odd ones a demote
                        let present = snap.contains(128);
                        assert_eq!(present, snap.version() % 2 == 0);
                        assert_eq!(snap.len(), base + usize::from(present));
                        assert_eq!(snap.match_template(128, text).is_some(), present);

                        let m = snap.find_match(text);
                        if m.as_ref().is_some_and(|m| m.template_id == 128) {
                            assert!(present);
                        }
                        if let Some(m) = m {
                            let payload = encode_payload(&m).unwrap();
                            assert_eq!(decode_payload(&payload, &snap).unwrap(), text);
                        }
                        seen += 1;
                    }
                });
            }

            let promoted = candidate("Build {0} passed all {1} checks.");
            for _ in 0..200 {
                assert_eq!(store.promote(&promoted).unwrap().template_id, 128);
                store.demote(128).unwrap();
            }
            done.store(true, Ordering::Release);
        });

        assert_eq!(store.version(), 401);
        assert!(!store.snapshot().contains(128));
    }
}
