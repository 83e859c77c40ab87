//! # AURA - Hybrid compression for AI chat messages
//!
//! Compresses short, semi-structured chat messages for the wire while
//! guaranteeing that the receiving side can always recover the exact
//! plaintext for logging and audit.
//!
//! ## Features
//!
//! - **Hybrid method selection**: template, dictionary, fallback codec or
//!   literal, whichever is smallest, never larger than literal
//! - **Templates**: parameterized patterns with slot extraction, a built-in
//!   library and a versioned copy-on-write store
//! - **Dictionary coding**: back-references into a per-conversation history
//! - **Metadata side-channel**: classify and route a container without
//!   decoding its payload
//! - **Conversation cache**: memoized decisions per message shape, with an
//!   optional platform-wide shared cache
//! - **Offline discovery**: mine a corpus for new templates, promote them
//!   explicitly
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────── Conversation ────────────────┐
//!   text ──> │ cache ─> HybridSelector ─> container bytes    │ ──> wire
//!            │            │    │    │                       │
//!            │     Template  Dictionary  Fallback           │
//!            └────────│──────────│───────────────────────────┘
//!                     │          └── history window (per direction)
//!              TemplateStore (Arc<TemplateSnapshot>, versioned)
//!                     ^
//!                     └── promote ── TemplateDiscovery (offline)
//! ```
//!
//! ## Wire Format
//!
//! | Field     | Size    | Notes                                  |
//! |-----------|---------|----------------------------------------|
//! | method    | 1 byte  | `0x00` Template, `0x01` Dictionary, `0x02` Fallback, `0xFF` Literal |
//! | count     | 2 bytes | number of metadata entries (BE)        |
//! | metadata  | 6 bytes each | position, kind, value, flags      |
//! | payload   | rest    | method specific                        |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use aura::{Config, Conversation, TemplateStore};
//!
//! let config = Config::default();
//! let store = Arc::new(TemplateStore::new());
//!
//! let mut sender = Conversation::from_config(&config, store.clone());
//! let mut receiver = Conversation::from_config(&config, store).with_id(sender.id());
//!
//! let result = sender.compress("I don't have access to your calendar.");
//! println!("{} -> {} bytes via {}", result.original_bytes, result.compressed_bytes, result.method);
//!
//! let decoded = receiver.decompress(&result.data)?;
//! assert_eq!(decoded.text, "I don't have access to your calendar.");
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: Wire container, metadata, per-method codecs, hybrid selector
//! - [`template`]: Template model, matcher and versioned store
//! - [`cache`]: Conversation and platform-wide decision caches
//! - [`conversation`]: Per-conversation context and audit hook
//! - [`discovery`]: Offline template mining
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod cache;
pub mod codec;
pub mod config;
pub mod conversation;
pub mod discovery;
pub mod error;
pub mod template;

// Re-exports for convenience
pub use cache::{signature, ConversationCache, PlatformCache};
pub use codec::{
    classify, Classification, CompressionResult, DecodedMessage, HybridSelector, MetadataEntry,
    MetadataKind, Method,
};
pub use config::Config;
pub use conversation::{AuditSink, Conversation, ConversationStats, TracingAuditSink};
pub use discovery::{DiscoveryPass, TemplateCandidate, TemplateDiscovery};
pub use error::{AuraError, Result};
pub use template::{PromotionRecord, Template, TemplateSnapshot, TemplateStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
