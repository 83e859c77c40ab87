//! Discovery to promotion to live use, including store persistence.

use std::sync::Arc;

use aura::config::DiscoveryConfig;
use aura::template::DYNAMIC_RANGE;
use aura::{Config, Conversation, Method, TemplateDiscovery, TemplateStore};

fn support_corpus() -> Vec<String> {
    let tickets = ["billing", "login", "shipping", "refund", "upgrade", "export"];
    let agents = ["Alice", "Bob", "Carol", "Dave"];
    let mut corpus: Vec<String> = (0..24)
        .map(|i| {
            format!(
                "Ticket #{} about {} has been assigned to {} and will be handled within one business day.",
                5000 + i * 13,
                tickets[i % tickets.len()],
                agents[i % agents.len()],
            )
        })
        .collect();
    corpus.extend(
        [
            "Thanks for reaching out!",
            "Could you share a screenshot?",
            "Let me look into that.",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    corpus
}

#[test]
fn test_discover_promote_use() {
    let corpus = support_corpus();
    let store = Arc::new(TemplateStore::new());
    let engine = TemplateDiscovery::new(DiscoveryConfig::default()).unwrap();

    let candidates = engine.discover(&corpus, Some(&store.snapshot())).unwrap();
    assert!(!candidates.is_empty());
    let best = &candidates[0];
    assert!(best.occurrences >= 3);
    assert!(best.estimated_ratio >= 1.5);

    let version = store.version();
    let record = store.promote(best).unwrap();
    assert!(DYNAMIC_RANGE.contains(&record.template_id));
    assert!(record.store_version > version);

    // A fresh message of the same shape now uses the promoted template
    let config = Config::default();
    let mut sender = Conversation::from_config(&config, store.clone());
    let mut receiver = Conversation::from_config(&config, store.clone());
    let text = "Ticket #9999 about invoices has been assigned to Erin and will be handled within one business day.";
    let result = sender.compress(text);
    assert_eq!(result.method, Method::Template);
    assert_eq!(result.template_id, Some(record.template_id));
    assert_eq!(receiver.decompress(&result.data).unwrap().text, text);

    // Promoting the same candidate twice is rejected
    assert!(store.promote(best).is_err());
}

#[test]
fn test_rediscovery_skips_promoted_patterns() {
    let corpus = support_corpus();
    let store = TemplateStore::new();
    let engine = TemplateDiscovery::new(DiscoveryConfig::default()).unwrap();

    let first = engine.discover(&corpus, Some(&store.snapshot())).unwrap();
    store.promote(&first[0]).unwrap();

    let second = engine.discover(&corpus, Some(&store.snapshot())).unwrap();
    assert!(second.iter().all(|c| c.pattern != first[0].pattern));
}

#[test]
fn test_promoted_store_persists() {
    let corpus = support_corpus();
    let store = TemplateStore::new();
    let engine = TemplateDiscovery::new(DiscoveryConfig::default()).unwrap();
    let candidates = engine.discover(&corpus, Some(&store.snapshot())).unwrap();
    let record = store.promote(&candidates[0]).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("templates.json");
    store.save_to_file(&path).unwrap();

    let restored = TemplateStore::new();
    restored.load_from_file(&path).unwrap();
    let snapshot = restored.snapshot();
    let template = snapshot.get(record.template_id).unwrap();
    assert_eq!(template.pattern(), record.pattern);
    assert_eq!(snapshot.len(), store.snapshot().len());
}

#[test]
fn test_discovery_is_deterministic() {
    let corpus = support_corpus();
    let config = DiscoveryConfig {
        workers: 3,
        ..DiscoveryConfig::default()
    };
    let engine = TemplateDiscovery::new(config).unwrap();
    let a = engine.discover(&corpus, None).unwrap();
    let b = engine.discover(&corpus, None).unwrap();
    assert_eq!(a, b);
}
