//! Per-conversation compression context.
//!
//! A [`Conversation`] owns everything that is private to one chat: the
//! dictionary history for each direction and the conversation cache. The
//! template store and selector are shared handles, so many conversations can
//! run on different threads without locking each other.
//!
//! ```text
//!   sender                                   receiver
//!   Conversation::compress ── bytes ──> Conversation::decompress
//!        │ encoder history                     │ decoder history
//!        │ conversation cache                  │ audit sink
//!        └──────── Arc<TemplateStore> ─────────┘
//! ```
//!
//! Both histories are appended with the plaintext after every message,
//! whatever method was used, so the two ends stay in step as long as every
//! container is delivered in order.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::cache::{ConversationCache, PlatformCache};
use crate::codec::{
    classify, Classification, CompressionResult, DecodedMessage, HistoryWindow, HybridSelector,
    MetadataEntry,
};
use crate::config::Config;
use crate::error::Result;
use crate::template::TemplateStore;

/// Receives every successfully decoded message.
///
/// Implementations get plaintext and metadata only, never the compressed
/// bytes.
pub trait AuditSink: Send + Sync + fmt::Debug {
    /// Record one decoded message
    fn record(&self, conversation_id: &str, text: &str, metadata: &[MetadataEntry]);
}

/// Audit sink that emits a `tracing` event per message
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, conversation_id: &str, text: &str, metadata: &[MetadataEntry]) {
        let kind = metadata.first().map(|m| m.kind);
        tracing::info!(
            target: "aura::audit",
            conversation_id,
            bytes = text.len(),
            kind = ?kind,
            entries = metadata.len(),
            "Decoded message"
        );
        tracing::debug!(target: "aura::audit", conversation_id, text, "Decoded plaintext");
    }
}

/// Compression context for one conversation
pub struct Conversation {
    id: String,
    selector: Arc<HybridSelector>,
    store: Arc<TemplateStore>,
    encoder_history: HistoryWindow,
    decoder_history: HistoryWindow,
    cache: ConversationCache,
    audit: Option<Arc<dyn AuditSink>>,
    stats: ConversationStats,
}

impl Conversation {
    /// Create a conversation with a fresh random ID.
    pub fn new(
        selector: Arc<HybridSelector>,
        store: Arc<TemplateStore>,
        cache: ConversationCache,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            encoder_history: selector.dictionary().new_history(),
            decoder_history: selector.dictionary().new_history(),
            stats: ConversationStats::new(&id),
            id,
            selector,
            store,
            cache,
            audit: None,
        }
    }

    /// Create a conversation with its own selector built from `config`.
    pub fn from_config(config: &Config, store: Arc<TemplateStore>) -> Self {
        Self::new(
            Arc::new(HybridSelector::new(config)),
            store,
            ConversationCache::from_config(&config.cache),
        )
    }

    /// Like [`Conversation::from_config`], falling through to `platform` on
    /// local cache misses when `cache.platform_enabled` is set.
    pub fn from_config_with_platform(
        config: &Config,
        store: Arc<TemplateStore>,
        platform: Option<&Arc<PlatformCache>>,
    ) -> Self {
        let conversation = Self::from_config(config, store);
        match platform {
            Some(platform) if config.cache.platform_enabled => {
                conversation.with_platform(Arc::clone(platform))
            },
            _ => conversation,
        }
    }

    /// Use an existing conversation ID (for example one assigned by the peer)
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self.stats.conversation_id = self.id.clone();
        self
    }

    /// Attach an audit sink
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Fall through to a platform-wide cache on local misses
    pub fn with_platform(mut self, platform: Arc<PlatformCache>) -> Self {
        self.cache = self.cache.with_platform(platform);
        self
    }

    /// Conversation ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Conversation cache
    pub fn cache(&self) -> &ConversationCache {
        &self.cache
    }

    /// Shared selector
    pub fn selector(&self) -> &HybridSelector {
        &self.selector
    }

    /// Shared template store
    pub fn store(&self) -> &Arc<TemplateStore> {
        &self.store
    }

    /// Compress an outgoing message.
    pub fn compress(&mut self, text: &str) -> CompressionResult {
        let snapshot = self.store.snapshot();
        let result = self.selector.compress(
            text,
            &snapshot,
            &self.encoder_history,
            Some(&mut self.cache),
        );
        self.encoder_history.push(text);

        self.stats.messages_sent += 1;
        self.stats.bytes_in += result.original_bytes as u64;
        self.stats.bytes_out += result.compressed_bytes as u64;
        if result.cache_hit {
            self.stats.cache_hits += 1;
        }
        result
    }

    /// Decompress an incoming container.
    ///
    /// On error the decoder history is left unchanged and nothing is sent
    /// to the audit sink.
    pub fn decompress(&mut self, bytes: &[u8]) -> Result<DecodedMessage> {
        let snapshot = self.store.snapshot();
        let decoded = self
            .selector
            .decompress(bytes, &snapshot, &self.decoder_history)?;
        self.decoder_history.push(&decoded.text);
        self.stats.messages_received += 1;

        if let Some(sink) = &self.audit {
            sink.record(&self.id, &decoded.text, &decoded.metadata);
        }
        Ok(decoded)
    }

    /// Classify a container against the current store, without decoding it.
    pub fn classify(&self, bytes: &[u8]) -> Result<Classification> {
        classify(bytes, Some(&self.store.snapshot()))
    }

    /// Fold this conversation's cache into a platform-wide cache.
    pub fn merge_into(&self, platform: &PlatformCache) -> usize {
        platform.merge_from(&self.cache)
    }

    /// Drop history and cached decisions, for example after a reconnect.
    pub fn reset(&mut self) {
        self.encoder_history.clear();
        self.decoder_history.clear();
        self.cache.clear();
        tracing::debug!(conversation_id = %self.id, "Conversation reset");
    }

    /// Conversation statistics
    pub fn stats(&self) -> ConversationStats {
        self.stats.clone()
    }
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("encoder_history", &self.encoder_history.len())
            .field("decoder_history", &self.decoder_history.len())
            .field("cache", &self.cache.len())
            .field("audit", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

/// Conversation statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConversationStats {
    /// Conversation ID
    pub conversation_id: String,
    /// Messages compressed
    pub messages_sent: u64,
    /// Messages decompressed
    pub messages_received: u64,
    /// Plaintext bytes compressed
    pub bytes_in: u64,
    /// Container bytes produced
    pub bytes_out: u64,
    /// Compressions served from the cache
    pub cache_hits: u64,
}

impl ConversationStats {
    fn new(id: &str) -> Self {
        Self {
            conversation_id: id.to_string(),
            messages_sent: 0,
            messages_received: 0,
            bytes_in: 0,
            bytes_out: 0,
            cache_hits: 0,
        }
    }

    /// Plaintext bytes per container byte
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_out == 0 {
            1.0
        } else {
            self.bytes_in as f64 / self.bytes_out as f64
        }
    }

    /// Bytes saved as a percentage of plaintext
    pub fn savings_percent(&self) -> f64 {
        if self.bytes_in == 0 || self.bytes_out >= self.bytes_in {
            0.0
        } else {
            (self.bytes_in - self.bytes_out) as f64 / self.bytes_in as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Method, MetadataKind};
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct RecordingSink {
        records: Mutex<Vec<(String, String, Vec<MetadataEntry>)>>,
    }

    impl AuditSink for RecordingSink {
        fn record(&self, conversation_id: &str, text: &str, metadata: &[MetadataEntry]) {
            self.records.lock().push((
                conversation_id.to_string(),
                text.to_string(),
                metadata.to_vec(),
            ));
        }
    }

    fn pair() -> (Conversation, Conversation) {
        let config = Config::default();
        let store = Arc::new(TemplateStore::new());
        let selector = Arc::new(HybridSelector::new(&config));
        let sender = Conversation::new(
            selector.clone(),
            store.clone(),
            ConversationCache::from_config(&config.cache),
        );
        let receiver = Conversation::new(
            selector,
            store,
            ConversationCache::from_config(&config.cache),
        )
        .with_id(sender.id());
        (sender, receiver)
    }

    #[test]
    fn test_conversation_roundtrip() {
        let (mut sender, mut receiver) = pair();
        let messages = [
            "Yes",
            "I don't have access to your calendar.",
            "The deployment finished and all services report a healthy status.",
            "The deployment finished and all services report a healthy status again.",
            "",
            "Zürich → 東京 ✓",
        ];
        for text in messages {
            let result = sender.compress(text);
            let decoded = receiver.decompress(&result.data).unwrap();
            assert_eq!(decoded.text, text);
            assert_eq!(decoded.method, result.method);
        }
        assert_eq!(sender.stats().messages_sent, messages.len() as u64);
        assert_eq!(receiver.stats().messages_received, messages.len() as u64);
    }

    #[test]
    fn test_history_enables_dictionary() {
        let (mut sender, mut receiver) = pair();
        let first = "Deployment of build 4711 to the staging cluster completed without errors.";
        let second = "Deployment of build 4712 to the staging cluster completed without errors!";

        let r1 = sender.compress(first);
        receiver.decompress(&r1.data).unwrap();
        // Different closing punctuation, so not a cache hit
        let r2 = sender.compress(second);
        assert_eq!(r2.method, Method::Dictionary);
        assert!(r2.compressed_bytes < second.len());
        assert_eq!(receiver.decompress(&r2.data).unwrap().text, second);
    }

    #[test]
    fn test_out_of_order_delivery_fails_loudly() {
        let (mut sender, mut receiver) = pair();
        let first = "Deployment of build 4711 to the staging cluster completed without errors.";
        let second = "Deployment of build 4712 to the staging cluster completed without errors!";
        let _r1 = sender.compress(first);
        let r2 = sender.compress(second);
        assert_eq!(r2.method, Method::Dictionary);
        // Receiver never saw the first message: the back-reference points
        // before the start of its history.
        assert!(receiver.decompress(&r2.data).unwrap_err().is_decode_error());
    }

    #[test]
    fn test_audit_sink_receives_plaintext_and_metadata() {
        let (mut sender, receiver) = pair();
        let sink = Arc::new(RecordingSink::default());
        let mut receiver = receiver.with_audit(sink.clone());

        let result = sender.compress("I don't have access to your calendar.");
        receiver.decompress(&result.data).unwrap();

        let records = sink.records.lock();
        assert_eq!(records.len(), 1);
        let (id, text, metadata) = &records[0];
        assert_eq!(id, sender.id());
        assert_eq!(text, "I don't have access to your calendar.");
        assert_eq!(metadata[0].kind, MetadataKind::Template);
    }

    #[test]
    fn test_failed_decode_is_not_audited() {
        let (_, receiver) = pair();
        let sink = Arc::new(RecordingSink::default());
        let mut receiver = receiver.with_audit(sink.clone());
        assert!(receiver.decompress(&[0x42, 0, 0]).is_err());
        assert!(sink.records.lock().is_empty());
        assert_eq!(receiver.stats().messages_received, 0);
    }

    #[test]
    fn test_cache_hit_on_repeated_shape() {
        let (mut sender, mut receiver) = pair();
        let first = sender.compress("I don't have access to your calendar.");
        let second = sender.compress("I don't have access to your contacts.");
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(second.template_id, Some(20));
        assert_eq!(sender.stats().cache_hits, 1);

        receiver.decompress(&first.data).unwrap();
        assert_eq!(
            receiver.decompress(&second.data).unwrap().text,
            "I don't have access to your contacts."
        );
    }

    #[test]
    fn test_classify_and_merge() {
        let (mut sender, _) = pair();
        let result = sender.compress("I don't have access to your calendar.");
        let class = sender.classify(&result.data).unwrap();
        assert_eq!(class.method, Method::Template);
        assert_eq!(class.template_id, Some(20));
        assert_eq!(class.category.as_deref(), Some("limitations"));

        let platform = PlatformCache::new(100);
        assert_eq!(sender.merge_into(&platform), 1);
        assert_eq!(platform.len(), 1);
    }

    #[test]
    fn test_platform_attached_only_when_enabled() {
        let store = Arc::new(TemplateStore::new());
        let mut config = Config::default();
        config.cache.platform_enabled = true;
        let platform = PlatformCache::from_config(&config.cache).unwrap();

        let mut first =
            Conversation::from_config_with_platform(&config, store.clone(), Some(&platform));
        first.compress("I don't have access to your calendar.");
        first.merge_into(&platform);

        let mut second =
            Conversation::from_config_with_platform(&config, store.clone(), Some(&platform));
        assert!(second.compress("I don't have access to your files.").cache_hit);
        assert_eq!(second.cache().stats().platform_hits, 1);

        config.cache.platform_enabled = false;
        let mut detached = Conversation::from_config_with_platform(&config, store, Some(&platform));
        assert!(!detached.compress("I don't have access to your email.").cache_hit);
        assert_eq!(detached.cache().stats().platform_hits, 0);
    }

    #[test]
    fn test_reset() {
        let (mut sender, _) = pair();
        sender.compress("I don't have access to your calendar.");
        assert_eq!(sender.cache().len(), 1);
        sender.reset();
        assert!(sender.cache().is_empty());
    }

    #[test]
    fn test_stats_ratio() {
        let stats = ConversationStats {
            conversation_id: "c".to_string(),
            messages_sent: 2,
            messages_received: 0,
            bytes_in: 200,
            bytes_out: 50,
            cache_hits: 0,
        };
        assert!((stats.compression_ratio() - 4.0).abs() < 1e-9);
        assert!((stats.savings_percent() - 75.0).abs() < 1e-9);
    }
}
