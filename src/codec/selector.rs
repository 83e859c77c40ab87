//! Hybrid selector: method choice, never-worse enforcement, and decode
//! dispatch.
//!
//! Encode policy, in order:
//!
//! 1. Shorter than `min_compression_size` → Literal, nothing else is tried.
//! 2. Conversation cache hit → reuse the cached method (and template)
//!    without running the matcher. Every `revalidate_every` hits the
//!    decision is re-derived from scratch instead.
//! 3. Template matcher and dictionary coder both run on a miss.
//! 4. Template wins if `template_size * template_advantage <= dictionary_size`;
//!    otherwise Dictionary if it beats Literal; otherwise the fallback codec
//!    (or Template, if that is still smaller).
//! 5. Whatever was chosen must be strictly smaller than the Literal
//!    container or the message goes out as Literal.
//! 6. The winning method is written back to the cache.
//!
//! Encoding never fails: any codec error degrades to a safer method.
//! Decoding is a one-shot dispatch on the method tag with no retries.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::container::{CompressedContainer, ContainerView, LITERAL_OVERHEAD};
use super::dictionary::{match_summary, DictionaryCoder, HistoryWindow};
use super::fallback::{codec_for_config, codec_for_id, FallbackCodec};
use super::metadata::{clamp_detail, MetadataEntry, MetadataKind};
use super::template::{encode_payload, TemplatePayload};
use super::{CompressionResult, Method};
use crate::cache::{signature, CacheEntry, ConversationCache};
use crate::config::{CompressionConfig, Config, DictionaryConfig};
use crate::error::{AuraError, Result};
use crate::template::{TemplateMatch, TemplateSnapshot};

/// Selector instrumentation
#[derive(Debug, Default)]
pub struct SelectorCounters {
    matcher_invocations: AtomicU64,
    cache_fast_path: AtomicU64,
    cache_stale: AtomicU64,
    revalidations: AtomicU64,
    template: AtomicU64,
    dictionary: AtomicU64,
    fallback: AtomicU64,
    literal: AtomicU64,
    fallback_failures: AtomicU64,
    never_worse_downgrades: AtomicU64,
}

/// Point-in-time copy of [`SelectorCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectorStats {
    /// Full template matcher runs
    pub matcher_invocations: u64,
    /// Messages served from a cached decision
    pub cache_fast_path: u64,
    /// Cached decisions that no longer applied
    pub cache_stale: u64,
    /// Forced re-derivations of cached decisions
    pub revalidations: u64,
    /// Messages sent as Template
    pub template: u64,
    /// Messages sent as Dictionary
    pub dictionary: u64,
    /// Messages sent as Fallback
    pub fallback: u64,
    /// Messages sent as Literal
    pub literal: u64,
    /// Fallback codec errors caught at encode time
    pub fallback_failures: u64,
    /// Choices replaced by Literal by the never-worse check
    pub never_worse_downgrades: u64,
}

impl SelectorCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, method: Method) {
        match method {
            Method::Template => Self::bump(&self.template),
            Method::Dictionary => Self::bump(&self.dictionary),
            Method::Fallback => Self::bump(&self.fallback),
            Method::Literal => Self::bump(&self.literal),
        }
    }

    /// Read all counters
    pub fn snapshot(&self) -> SelectorStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SelectorStats {
            matcher_invocations: load(&self.matcher_invocations),
            cache_fast_path: load(&self.cache_fast_path),
            cache_stale: load(&self.cache_stale),
            revalidations: load(&self.revalidations),
            template: load(&self.template),
            dictionary: load(&self.dictionary),
            fallback: load(&self.fallback),
            literal: load(&self.literal),
            fallback_failures: load(&self.fallback_failures),
            never_worse_downgrades: load(&self.never_worse_downgrades),
        }
    }
}

/// An encoded candidate
#[derive(Debug)]
struct Encoded {
    bytes: Vec<u8>,
    method: Method,
    template_id: Option<u32>,
}

impl Encoded {
    fn literal(text: &str) -> Self {
        Self {
            bytes: CompressedContainer::encode_literal(text),
            method: Method::Literal,
            template_id: None,
        }
    }
}

/// A decoded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Exact original text
    pub text: String,
    /// Method the container used
    pub method: Method,
    /// Metadata side-channel
    pub metadata: Vec<MetadataEntry>,
}

/// What a container is, read from its header and metadata only
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// Encoding method
    pub method: Method,
    /// Template ID, when known exactly
    pub template_id: Option<u32>,
    /// Template category, when the template is in the given snapshot
    pub category: Option<String>,
    /// Original size, when recorded exactly in the metadata
    pub original_size: Option<usize>,
    /// Payload size in bytes
    pub payload_size: usize,
    /// All metadata entries
    pub metadata: Vec<MetadataEntry>,
}

/// Classify a container without decoding its payload.
pub fn classify(bytes: &[u8], snapshot: Option<&TemplateSnapshot>) -> Result<Classification> {
    let view = ContainerView::parse(bytes)?;
    let metadata = view.metadata().iter().collect::<Result<Vec<_>>>()?;

    let template_id = metadata
        .iter()
        .find(|e| e.kind == MetadataKind::Template)
        .and_then(MetadataEntry::exact_value)
        .map(u32::from);
    let category = template_id
        .zip(snapshot)
        .and_then(|(id, snap)| snap.get(id))
        .map(|t| t.category().to_string());
    let original_size = metadata
        .iter()
        .find(|e| matches!(e.kind, MetadataKind::Literal | MetadataKind::Fallback))
        .and_then(MetadataEntry::exact_value)
        .map(usize::from);

    Ok(Classification {
        method: view.method(),
        template_id,
        category,
        original_size,
        payload_size: view.payload().len(),
        metadata,
    })
}

/// The hybrid compression engine
#[derive(Debug)]
pub struct HybridSelector {
    config: CompressionConfig,
    dictionary: DictionaryCoder,
    fallback: Box<dyn FallbackCodec>,
    counters: SelectorCounters,
}

impl Default for HybridSelector {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl HybridSelector {
    /// Create from the full config
    pub fn new(config: &Config) -> Self {
        Self::from_parts(config.compression.clone(), &config.dictionary)
    }

    /// Create from the compression and dictionary sections
    pub fn from_parts(compression: CompressionConfig, dictionary: &DictionaryConfig) -> Self {
        let fallback = codec_for_config(&compression);
        Self {
            config: compression,
            dictionary: DictionaryCoder::new(dictionary),
            fallback,
            counters: SelectorCounters::default(),
        }
    }

    /// Replace the encode-side fallback codec
    pub fn with_fallback(mut self, codec: Box<dyn FallbackCodec>) -> Self {
        self.fallback = codec;
        self
    }

    /// Compression settings
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Dictionary coder (for sizing history windows)
    pub fn dictionary(&self) -> &DictionaryCoder {
        &self.dictionary
    }

    /// Instrumentation counters
    pub fn stats(&self) -> SelectorStats {
        self.counters.snapshot()
    }

    /// Compress one message. Never fails.
    pub fn compress(
        &self,
        text: &str,
        snapshot: &TemplateSnapshot,
        history: &HistoryWindow,
        mut cache: Option<&mut ConversationCache>,
    ) -> CompressionResult {
        if text.len() < self.config.min_compression_size {
            self.counters.record(Method::Literal);
            tracing::trace!(len = text.len(), "Below min_compression_size, sending literal");
            return CompressionResult::new(
                CompressedContainer::encode_literal(text),
                Method::Literal,
                text.len(),
            );
        }

        let sig = signature(text);
        let mut cached: Option<Encoded> = None;
        let mut stale = false;
        let mut revalidating: Option<(Method, Option<u32>)> = None;

        if let Some(cache) = cache.as_deref_mut() {
            if let Some(entry) = cache.get(sig) {
                if entry.hits_since_validation >= self.config.revalidate_every {
                    revalidating = Some((entry.method, entry.template_id));
                    SelectorCounters::bump(&self.counters.revalidations);
                    tracing::debug!(signature = sig, "Revalidating cached decision");
                } else {
                    cached = self.fast_path(text, &entry, snapshot, history);
                    if cached.is_some() {
                        SelectorCounters::bump(&self.counters.cache_fast_path);
                    } else {
                        SelectorCounters::bump(&self.counters.cache_stale);
                        stale = true;
                        tracing::warn!(
                            signature = sig,
                            method = %entry.method,
                            template_id = ?entry.template_id,
                            "Cached decision no longer applies, re-selecting"
                        );
                    }
                }
            }
        }

        let cache_hit = cached.is_some();
        let encoded = match cached {
            Some(encoded) => encoded,
            None => self.select(text, snapshot, history),
        };
        let encoded = self.enforce_never_worse(text, encoded);

        if !cache_hit {
            if let Some(cache) = cache {
                if encoded.method == Method::Literal {
                    if stale || revalidating.is_some() {
                        cache.invalidate(sig);
                    }
                } else if revalidating == Some((encoded.method, encoded.template_id)) {
                    cache.mark_validated(sig);
                } else {
                    cache.put(sig, encoded.method, encoded.template_id);
                }
            }
        }

        if let Some(template) = encoded.template_id.and_then(|id| snapshot.get(id)) {
            template.stats().record(text.len(), encoded.bytes.len());
        }
        self.counters.record(encoded.method);
        tracing::debug!(
            method = %encoded.method,
            template_id = ?encoded.template_id,
            original = text.len(),
            encoded = encoded.bytes.len(),
            cache_hit,
            "Compressed message"
        );

        let result = CompressionResult::new(encoded.bytes, encoded.method, text.len())
            .with_cache_hit(cache_hit);
        match encoded.template_id {
            Some(id) => result.with_template(id),
            None => result,
        }
    }

    /// Re-apply a cached decision. `None` when it no longer applies or no
    /// longer beats Literal.
    fn fast_path(
        &self,
        text: &str,
        entry: &CacheEntry,
        snapshot: &TemplateSnapshot,
        history: &HistoryWindow,
    ) -> Option<Encoded> {
        let encoded = match (entry.method, entry.template_id) {
            (Method::Template, Some(id)) => {
                let m = snapshot.match_template(id, text)?;
                self.encode_template(&m).ok()?
            },
            (Method::Dictionary, _) => self.encode_dictionary(text, history).ok()?,
            (Method::Fallback, _) => self.encode_fallback(text).ok()?,
            _ => return None,
        };
        (encoded.bytes.len() < literal_len(text)).then_some(encoded)
    }

    /// Full selection on a cache miss.
    fn select(&self, text: &str, snapshot: &TemplateSnapshot, history: &HistoryWindow) -> Encoded {
        SelectorCounters::bump(&self.counters.matcher_invocations);
        let literal = literal_len(text);

        let template = snapshot
            .find_match(text)
            .and_then(|m| match self.encode_template(&m) {
                Ok(encoded) => Some(encoded),
                Err(e) => {
                    tracing::debug!("Template encode skipped: {}", e);
                    None
                },
            });
        let dictionary = match self.encode_dictionary(text, history) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                tracing::debug!("Dictionary encode skipped: {}", e);
                None
            },
        };

        let advantage = self.config.template_advantage;
        match (template, dictionary) {
            (Some(t), d)
                if d.as_ref().map_or(true, |d| {
                    t.bytes.len() as f64 * advantage <= d.bytes.len() as f64
                }) =>
            {
                t
            },
            (_, Some(d)) if d.bytes.len() < literal => d,
            (t, _) => self.fallback_or(text, t),
        }
    }

    /// Last resort: the fallback codec, unless a leftover template match is
    /// smaller.
    fn fallback_or(&self, text: &str, template: Option<Encoded>) -> Encoded {
        let fallback = match self.encode_fallback(text) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                SelectorCounters::bump(&self.counters.fallback_failures);
                tracing::warn!("Fallback codec failed, degrading: {}", e);
                None
            },
        };
        match (template, fallback) {
            (Some(t), Some(f)) if t.bytes.len() <= f.bytes.len() => t,
            (_, Some(f)) => f,
            (Some(t), None) => t,
            (None, None) => Encoded::literal(text),
        }
    }

    fn enforce_never_worse(&self, text: &str, encoded: Encoded) -> Encoded {
        if encoded.method == Method::Literal || encoded.bytes.len() < literal_len(text) {
            return encoded;
        }
        SelectorCounters::bump(&self.counters.never_worse_downgrades);
        tracing::trace!(
            method = %encoded.method,
            encoded = encoded.bytes.len(),
            literal = literal_len(text),
            "Not smaller than literal, downgrading"
        );
        Encoded::literal(text)
    }

    fn encode_template(&self, m: &TemplateMatch) -> Result<Encoded> {
        let payload = encode_payload(m)?;
        let container = CompressedContainer::new(
            Method::Template,
            vec![MetadataEntry::template(m.template_id, m.slots.len())],
            payload,
        );
        Ok(Encoded {
            bytes: container.to_bytes()?,
            method: Method::Template,
            template_id: Some(m.template_id),
        })
    }

    fn encode_dictionary(&self, text: &str, history: &HistoryWindow) -> Result<Encoded> {
        let tokens = self.dictionary.encode(text, history);
        let (copied, matches) = match_summary(&tokens);
        let container = CompressedContainer::new(
            Method::Dictionary,
            vec![MetadataEntry::back_reference(copied, matches)],
            self.dictionary.write_tokens(&tokens),
        );
        Ok(Encoded {
            bytes: container.to_bytes()?,
            method: Method::Dictionary,
            template_id: None,
        })
    }

    fn encode_fallback(&self, text: &str) -> Result<Encoded> {
        if text.len() > self.config.max_message_size {
            return Err(AuraError::FallbackCodec(format!(
                "{} bytes exceeds max_message_size {}",
                text.len(),
                self.config.max_message_size
            )));
        }
        let payload = self.fallback.compress(text.as_bytes())?;
        let container = CompressedContainer::new(
            Method::Fallback,
            vec![MetadataEntry::fallback(text.len(), self.fallback.id())],
            payload,
        );
        Ok(Encoded {
            bytes: container.to_bytes()?,
            method: Method::Fallback,
            template_id: None,
        })
    }

    /// Decode one container.
    ///
    /// `snapshot` must contain every template the container references and
    /// `history` must equal the encoder's history at encode time.
    ///
    /// Metadata is checked against what the payload actually decodes to, so
    /// a container that decodes successfully always classifies the same way.
    pub fn decompress(
        &self,
        bytes: &[u8],
        snapshot: &TemplateSnapshot,
        history: &HistoryWindow,
    ) -> Result<DecodedMessage> {
        let view = ContainerView::parse(bytes)?;
        let metadata = view.metadata().iter().collect::<Result<Vec<_>>>()?;
        let payload = view.payload();
        let entry = |kind| metadata.iter().find(|e| e.kind == kind);

        let text = match view.method() {
            Method::Literal => {
                if let Some(e) = entry(MetadataKind::Literal) {
                    check_value(e, payload.len() as u64, "Literal length")?;
                }
                utf8(payload.to_vec(), "Literal")?
            },
            Method::Template => {
                let parsed = TemplatePayload::parse(payload)?;
                if let Some(e) = entry(MetadataKind::Template) {
                    check_value(e, u64::from(parsed.template_id), "Template ID")?;
                    let slots = clamp_detail(parsed.slots.len());
                    if e.detail() != slots {
                        return Err(AuraError::CorruptContainer(format!(
                            "Metadata slot count {} disagrees with payload ({})",
                            e.detail(),
                            parsed.slots.len()
                        )));
                    }
                }
                parsed.render(snapshot)?
            },
            Method::Dictionary => {
                let tokens = self.dictionary.read_tokens(payload)?;
                self.dictionary.decode(&tokens, history)?
            },
            Method::Fallback => {
                let e = entry(MetadataKind::Fallback).ok_or_else(|| {
                    AuraError::CorruptContainer("Fallback container without codec entry".to_string())
                })?;
                let limit = e
                    .exact_value()
                    .map_or(self.config.max_message_size, usize::from);
                let codec = codec_for_id(e.detail())?;
                let out = codec.decompress(payload, limit)?;
                check_value(e, out.len() as u64, "Fallback length")?;
                utf8(out, "Fallback")?
            },
        };

        Ok(DecodedMessage {
            text,
            method: view.method(),
            metadata,
        })
    }
}

/// A saturated value only promises "more than `u16::MAX`".
fn check_value(entry: &MetadataEntry, actual: u64, what: &str) -> Result<()> {
    let agrees = match entry.exact_value() {
        Some(v) => u64::from(v) == actual,
        None => actual > u64::from(u16::MAX),
    };
    if agrees {
        return Ok(());
    }
    Err(AuraError::CorruptContainer(format!(
        "{what} in metadata ({}{}) disagrees with payload ({actual})",
        entry.value,
        if entry.is_saturated() { "+" } else { "" }
    )))
}

fn literal_len(text: &str) -> usize {
    text.len() + LITERAL_OVERHEAD
}

fn utf8(bytes: Vec<u8>, method: &str) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| AuraError::CorruptContainer(format!("{method} payload is not valid UTF-8: {e}")))
}
