//! Hybrid compression engine.
//!
//! Short, template-like chat messages are encoded with whichever of four
//! methods yields the smallest container, subject to a never-worse check
//! against plain Literal encoding.
//!
//! # Methods
//!
//! | Method       | Tag    | Payload                                      |
//! |--------------|--------|----------------------------------------------|
//! | [`Template`] | `0x00` | template ID + slot values                    |
//! | [`Dictionary`] | `0x01` | literal runs and back-references into history |
//! | [`Fallback`] | `0x02` | Brotli or zlib output                        |
//! | [`Literal`]  | `0xFF` | raw UTF-8                                    |
//!
//! # Wire Format
//!
//! ```text
//! [1B method tag][2B metadata count N][N x 6B metadata][payload]
//! ```
//!
//! The metadata block is fixed-width and count-prefixed, so routing and
//! analytics can [`classify`] a container without touching its payload.
//!
//! # Usage
//!
//! ```rust,ignore
//! use aura::codec::HybridSelector;
//! use aura::template::TemplateStore;
//!
//! let selector = HybridSelector::default();
//! let store = TemplateStore::new();
//! let history = selector.dictionary().new_history();
//!
//! let snap = store.snapshot();
//! let result = selector.compress("I don't have access to your calendar.", &snap, &history, None);
//! let decoded = selector.decompress(&result.data, &snap, &history)?;
//! ```
//!
//! [`Template`]: Method::Template
//! [`Dictionary`]: Method::Dictionary
//! [`Fallback`]: Method::Fallback
//! [`Literal`]: Method::Literal

mod container;
mod dictionary;
mod fallback;
mod metadata;
mod method;
mod selector;
mod template;

pub use container::{CompressedContainer, ContainerView, HEADER_SIZE, LITERAL_OVERHEAD};
pub use dictionary::{DictionaryCoder, DictionaryToken, HistoryWindow, MAX_LITERAL_RUN, MAX_MATCH_LEN};
pub use fallback::{
    codec_for_config, codec_for_id, BrotliCodec, FallbackCodec, ZlibCodec, BROTLI_CODEC_ID,
    ZLIB_CODEC_ID,
};
pub use metadata::{
    decode_metadata, encode_metadata, MetadataEntry, MetadataKind, MetadataView,
    FLAG_DETAIL_MASK, FLAG_SATURATED, METADATA_ENTRY_SIZE,
};
pub use method::{CompressionResult, Method};
pub use selector::{
    classify, Classification, DecodedMessage, HybridSelector, SelectorCounters, SelectorStats,
};
pub use template::{decode_payload, encode_payload, TemplatePayload};

/// Detect the method of a container from its first byte
pub fn detect_method(bytes: &[u8]) -> Option<Method> {
    bytes.first().and_then(|&tag| Method::from_tag(tag))
}
