//! End-to-end conversation tests.
//!
//! Drive a sender/receiver pair through the public API and check the
//! behaviours a consumer relies on: method choice, exact round-trip, cache
//! fast path, and explicit failure on store inconsistency.

use std::sync::Arc;

use aura::codec::LITERAL_OVERHEAD;
use aura::{
    AuraError, Config, Conversation, ConversationCache, HybridSelector, Method, MetadataKind,
    PlatformCache, TemplateStore,
};

struct Pair {
    sender: Conversation,
    receiver: Conversation,
    store: Arc<TemplateStore>,
}

fn pair_with(config: &Config, store: TemplateStore) -> Pair {
    let store = Arc::new(store);
    let selector = Arc::new(HybridSelector::new(config));
    let sender = Conversation::new(
        selector.clone(),
        store.clone(),
        ConversationCache::from_config(&config.cache),
    );
    let receiver = Conversation::new(
        selector,
        store.clone(),
        ConversationCache::from_config(&config.cache),
    )
    .with_id(sender.id());
    Pair {
        sender,
        receiver,
        store,
    }
}

fn pair() -> Pair {
    pair_with(&Config::default(), TemplateStore::new())
}

/// Deterministic pseudo-random bytes mapped onto Latin-1 characters
fn binary_like_text(len: usize, seed: u64) -> String {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            char::from((state >> 56) as u8)
        })
        .collect()
}

#[test]
fn test_short_message_is_literal() {
    let mut p = pair();
    let result = p.sender.compress("Yes");
    assert_eq!(result.method, Method::Literal);
    assert_eq!(result.data.len(), 3 + LITERAL_OVERHEAD);
    assert_eq!(p.receiver.decompress(&result.data).unwrap().text, "Yes");
}

#[test]
fn test_template_message_keeps_trailing_period() {
    let mut p = pair();
    let text = "I don't have access to your calendar.";
    let result = p.sender.compress(text);
    assert_eq!(result.method, Method::Template);
    assert_eq!(result.template_id, Some(20));
    assert!(result.compressed_bytes < text.len());

    let decoded = p.receiver.decompress(&result.data).unwrap();
    assert_eq!(decoded.text, text);
    assert_eq!(decoded.metadata[0].kind, MetadataKind::Template);
}

#[test]
fn test_repeated_shape_skips_matcher() {
    let mut p = pair();
    let first = p.sender.compress("I don't have access to your calendar.");
    let invocations = p.sender.selector().stats().matcher_invocations;

    let second = p.sender.compress("I don't have access to your contacts.");
    assert!(second.cache_hit);
    assert_eq!(second.method, Method::Template);
    assert_eq!(p.sender.selector().stats().matcher_invocations, invocations);
    assert_eq!(p.sender.selector().stats().cache_fast_path, 1);

    p.receiver.decompress(&first.data).unwrap();
    assert_eq!(
        p.receiver.decompress(&second.data).unwrap().text,
        "I don't have access to your contacts."
    );
}

#[test]
fn test_binary_blob_roundtrips() {
    let mut p = pair();
    let text = binary_like_text(200, 0x5eed);
    let result = p.sender.compress(&text);
    assert!(matches!(result.method, Method::Fallback | Method::Literal));
    assert!(result.data.len() <= text.len() + LITERAL_OVERHEAD);
    assert_eq!(p.receiver.decompress(&result.data).unwrap().text, text);
}

#[test]
fn test_demoted_template_fails_decode() {
    let store = TemplateStore::new();
    store
        .register(300, "Build {0} passed all {1} checks.", "general")
        .unwrap();
    let mut p = pair_with(&Config::default(), store);

    let result = p.sender.compress("Build 4711 passed all 52 checks.");
    assert_eq!(result.method, Method::Template);
    assert_eq!(result.template_id, Some(300));

    p.store.demote(300).unwrap();
    match p.receiver.decompress(&result.data) {
        Err(AuraError::TemplateStoreInconsistency { template_id, .. }) => {
            assert_eq!(template_id, 300);
        },
        other => panic!("expected TemplateStoreInconsistency, got {other:?}"),
    }
}

#[test]
fn test_demoted_template_is_not_reused_from_cache() {
    let store = TemplateStore::new();
    store
        .register(300, "Build {0} passed all {1} checks.", "general")
        .unwrap();
    let mut p = pair_with(&Config::default(), store);

    let first = p.sender.compress("Build 4711 passed all 52 checks.");
    assert_eq!(first.template_id, Some(300));
    p.store.demote(300).unwrap();

    let second = p.sender.compress("Build 4712 passed all 53 checks.");
    assert_ne!(second.template_id, Some(300));
    p.receiver.decompress(&first.data).unwrap_err();
}

#[test]
fn test_long_mixed_conversation() {
    let mut p = pair();
    let messages = [
        "Hello! How can I help you today?",
        "I don't have access to your calendar.",
        "I don't have access to your email.",
        "To reset your password, open Settings and choose Security.",
        "To reset your password, open Settings and choose Security again.",
        "The capital of France is Paris.",
        "Yes",
        "",
        "日本語のテキストも正しく往復する必要があります。",
        "Here's an example: `cargo build --release`",
        "I don't have access to your calendar.",
    ];
    for text in messages {
        let result = p.sender.compress(text);
        assert!(result.data.len() <= text.len() + LITERAL_OVERHEAD);
        let decoded = p.receiver.decompress(&result.data).unwrap();
        assert_eq!(decoded.text, text);
    }
    assert_eq!(p.receiver.stats().messages_received, messages.len() as u64);
}

#[test]
fn test_platform_cache_shares_decisions() {
    let config = Config::default();
    let store = Arc::new(TemplateStore::new());
    let platform = Arc::new(PlatformCache::new(config.cache.platform_capacity));

    let mut first = Conversation::from_config(&config, store.clone());
    first.compress("I don't have access to your calendar.");
    assert_eq!(first.merge_into(&platform), 1);

    let mut second = Conversation::from_config(&config, store).with_platform(platform.clone());
    let result = second.compress("I don't have access to your files.");
    assert!(result.cache_hit);
    assert_eq!(result.template_id, Some(20));
    assert_eq!(second.cache().stats().platform_hits, 1);
}

#[test]
fn test_classify_without_decoding() {
    let mut p = pair();
    let result = p.sender.compress("I don't have access to your calendar.");
    let mut bytes = result.data.clone();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let class = p.receiver.classify(&bytes).unwrap();
    assert_eq!(class.method, Method::Template);
    assert_eq!(class.template_id, Some(20));
    assert_eq!(class.category.as_deref(), Some("limitations"));
}

#[test]
fn test_corrupt_container_is_per_message() {
    let mut p = pair();
    assert!(matches!(
        p.receiver.decompress(&[0x7F, 0x00, 0x00]),
        Err(AuraError::CorruptContainer(_))
    ));

    let result = p.sender.compress("I don't have access to your calendar.");
    assert!(p.receiver.decompress(&result.data).is_ok());
}
