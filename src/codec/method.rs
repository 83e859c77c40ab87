//! Compression methods and results.

use serde::{Deserialize, Serialize};

/// Encoding method, carried as the first byte of every container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Method {
    /// Template ID plus slot values
    Template = 0x00,
    /// Back-references into the conversation history
    Dictionary = 0x01,
    /// General-purpose compressor
    Fallback = 0x02,
    /// Raw UTF-8, uncompressed
    Literal = 0xFF,
}

impl Method {
    /// Parse a method tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(Method::Template),
            0x01 => Some(Method::Dictionary),
            0x02 => Some(Method::Fallback),
            0xFF => Some(Method::Literal),
            _ => None,
        }
    }

    /// Wire tag
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Method::Template => "TEMPLATE",
            Method::Dictionary => "DICTIONARY",
            Method::Fallback => "FALLBACK",
            Method::Literal => "LITERAL",
        }
    }

    /// All methods in selector preference order
    pub fn all() -> &'static [Method] {
        &[
            Method::Template,
            Method::Dictionary,
            Method::Fallback,
            Method::Literal,
        ]
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Result of one compress call
#[derive(Debug, Clone)]
pub struct CompressionResult {
    /// Encoded container
    pub data: Vec<u8>,
    /// Method used
    pub method: Method,
    /// Template used, if any
    pub template_id: Option<u32>,
    /// Original size in bytes
    pub original_bytes: usize,
    /// Container size in bytes
    pub compressed_bytes: usize,
    /// Decision came from the conversation cache
    pub cache_hit: bool,
}

impl CompressionResult {
    /// Create new compression result
    pub fn new(data: Vec<u8>, method: Method, original_bytes: usize) -> Self {
        let compressed_bytes = data.len();
        Self {
            data,
            method,
            template_id: None,
            original_bytes,
            compressed_bytes,
            cache_hit: false,
        }
    }

    /// Set the template ID
    pub fn with_template(mut self, template_id: u32) -> Self {
        self.template_id = Some(template_id);
        self
    }

    /// Mark as served from the cache fast path
    pub fn with_cache_hit(mut self, hit: bool) -> Self {
        self.cache_hit = hit;
        self
    }

    /// Calculate byte compression ratio
    pub fn byte_ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            0.0
        } else {
            self.original_bytes as f64 / self.compressed_bytes as f64
        }
    }

    /// Check if compression was beneficial
    pub fn is_beneficial(&self) -> bool {
        self.compressed_bytes < self.original_bytes
    }
}
