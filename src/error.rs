//! AURA error types.
//!
//! # Error Classification
//!
//! Errors split along the encode/decode boundary:
//!
//! - **Encode side**: every failure is recoverable. The selector degrades to a
//!   safer method (ultimately Literal), so these variants are only surfaced by
//!   lower-level codecs and never escape [`crate::codec::HybridSelector::compress`].
//! - **Decode side**: failures are explicit and fatal for the one message.
//!   A decoder never guesses or returns partially reconstructed text.
//!
//! Routing outcomes such as "input too short" or "no template matched" are
//! not errors and have no variant here.

use thiserror::Error;

/// AURA errors.
#[derive(Error, Debug)]
pub enum AuraError {
    /// Unknown method tag, truncated header, or metadata/payload length mismatch.
    #[error("Corrupt container: {0}")]
    CorruptContainer(String),

    /// A container references a template ID absent from the current store snapshot.
    ///
    /// Raised instead of substituting text, since silent corruption is worse
    /// than a visible failure.
    #[error("Template {template_id} not present in template store (version {store_version})")]
    TemplateStoreInconsistency {
        /// Template ID referenced by the container.
        template_id: u32,
        /// Version of the snapshot used for decoding.
        store_version: u64,
    },

    /// The general-purpose fallback codec failed. At decode time this means
    /// the Fallback payload is not a valid stream for its codec.
    #[error("Fallback codec error: {0}")]
    FallbackCodec(String),

    /// Template definition rejected at registration or load time.
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// Compression operation failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompression operation failed.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Template discovery or promotion failed.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for AURA operations
pub type Result<T> = std::result::Result<T, AuraError>;

impl AuraError {
    /// Whether this error was raised while decoding a container.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            AuraError::CorruptContainer(_)
                | AuraError::TemplateStoreInconsistency { .. }
                | AuraError::FallbackCodec(_)
                | AuraError::Decompression(_)
        )
    }
}

impl From<toml::de::Error> for AuraError {
    fn from(err: toml::de::Error) -> Self {
        AuraError::Config(err.to_string())
    }
}

impl From<base64::DecodeError> for AuraError {
    fn from(err: base64::DecodeError) -> Self {
        AuraError::CorruptContainer(format!("Base64 decode error: {err}"))
    }
}

impl From<regex::Error> for AuraError {
    fn from(err: regex::Error) -> Self {
        AuraError::Config(format!("Invalid structural rule regex: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CompressedContainer, HybridSelector, MetadataEntry, Method};
    use crate::template::TemplateStore;

    #[test]
    fn test_undecodable_fallback_is_decode_error() {
        let bytes = CompressedContainer::new(
            Method::Fallback,
            vec![MetadataEntry::fallback(12, crate::codec::ZLIB_CODEC_ID)],
            b"not a zlib stream".to_vec(),
        )
        .to_bytes()
        .unwrap();
        let selector = HybridSelector::default();
        let store = TemplateStore::new();
        let history = selector.dictionary().new_history();

        let err = selector
            .decompress(&bytes, &store.snapshot(), &history)
            .unwrap_err();
        assert!(matches!(err, AuraError::FallbackCodec(_)));
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_config_errors_are_not_decode_errors() {
        assert!(!AuraError::Config("bad".to_string()).is_decode_error());
        assert!(!AuraError::InvalidTemplate("bad".to_string()).is_decode_error());
    }
}
