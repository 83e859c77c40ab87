//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`AURA_*`)
//! - CLI arguments (for the `aura` binary)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AuraError, Result};

/// Largest dictionary window the match encoding supports (24-bit offsets).
pub const MAX_WINDOW_SIZE: usize = 1 << 24;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Hybrid selector configuration
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Dictionary coder configuration
    #[serde(default)]
    pub dictionary: DictionaryConfig,

    /// Conversation cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Template discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Template store configuration
    #[serde(default)]
    pub templates: TemplateStoreConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| AuraError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AuraError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse("AURA_MIN_COMPRESSION_SIZE") {
            config.compression.min_compression_size = val;
        }
        if let Some(val) = env_parse("AURA_TEMPLATE_ADVANTAGE") {
            config.compression.template_advantage = val;
        }
        if let Ok(val) = std::env::var("AURA_FALLBACK_CODEC") {
            match val.to_lowercase().as_str() {
                "brotli" => config.compression.fallback_codec = FallbackKind::Brotli,
                "zlib" => config.compression.fallback_codec = FallbackKind::Zlib,
                other => tracing::warn!("Ignoring unknown AURA_FALLBACK_CODEC={}", other),
            }
        }
        if let Some(val) = env_parse("AURA_MAX_MESSAGE_SIZE") {
            config.compression.max_message_size = val;
        }
        if let Some(val) = env_parse("AURA_WINDOW_SIZE") {
            config.dictionary.window_size = val;
        }
        if let Some(val) = env_parse("AURA_CACHE_CAPACITY") {
            config.cache.capacity = val;
        }
        if let Some(val) = env_parse("AURA_PLATFORM_CACHE") {
            config.cache.platform_enabled = val;
        }
        if let Some(val) = env_parse("AURA_DISCOVERY_WORKERS") {
            config.discovery.workers = val;
        }
        if let Ok(path) = std::env::var("AURA_TEMPLATE_STORE") {
            config.templates.store_path = Some(PathBuf::from(path));
        }

        config
    }

    /// Load from `path` if given, else from `$CONFIG_DIR/aura/config.toml` if
    /// it exists, else from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Some(default_path) = Self::default_path() {
            if default_path.exists() {
                return Self::from_file(default_path);
            }
        }
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("aura").join("config.toml"))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.compression.template_advantage < 1.0 {
            return Err(AuraError::Config(format!(
                "template_advantage must be >= 1.0, got {}",
                self.compression.template_advantage
            )));
        }
        if self.compression.max_message_size < usize::from(u16::MAX) {
            return Err(AuraError::Config(format!(
                "max_message_size must be >= {}, got {}",
                u16::MAX,
                self.compression.max_message_size
            )));
        }
        if self.dictionary.window_size == 0 || self.dictionary.window_size > MAX_WINDOW_SIZE {
            return Err(AuraError::Config(format!(
                "window_size must be in 1..={MAX_WINDOW_SIZE}, got {}",
                self.dictionary.window_size
            )));
        }
        if self.dictionary.min_match < 3 || self.dictionary.min_match > 255 {
            return Err(AuraError::Config(format!(
                "min_match must be in 3..=255, got {}",
                self.dictionary.min_match
            )));
        }
        if self.cache.capacity == 0 {
            return Err(AuraError::Config("cache capacity must be > 0".to_string()));
        }
        if self.discovery.workers == 0 {
            return Err(AuraError::Config("discovery workers must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.discovery.similarity_threshold) {
            return Err(AuraError::Config(format!(
                "similarity_threshold must be in 0.0..=1.0, got {}",
                self.discovery.similarity_threshold
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// General-purpose codec used as the encoding of last resort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackKind {
    /// Brotli
    #[default]
    Brotli,
    /// Zlib/deflate
    Zlib,
}

/// Hybrid selector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Messages shorter than this (bytes) are always sent as Literal
    pub min_compression_size: usize,

    /// Template wins only if `template_size * template_advantage <= dictionary_size`
    pub template_advantage: f64,

    /// Fallback codec
    pub fallback_codec: FallbackKind,

    /// Brotli quality (0-11)
    pub brotli_quality: u32,

    /// Cache hits between forced full revalidations of a cached decision
    pub revalidate_every: u32,

    /// Largest plaintext a decoder will produce when the metadata length is
    /// saturated
    pub max_message_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_compression_size: 20,
            template_advantage: 1.1,
            fallback_codec: FallbackKind::Brotli,
            brotli_quality: 11,
            revalidate_every: 16,
            max_message_size: 1 << 20,
        }
    }
}

/// Dictionary coder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DictionaryConfig {
    /// History window size in bytes
    pub window_size: usize,

    /// Minimum back-reference length
    pub min_match: usize,

    /// Hash chain links followed per position
    pub max_chain: usize,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            window_size: 4096,
            min_match: 4,
            max_chain: 32,
        }
    }
}

/// Eviction policy for conversation caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Evict the least recently used entry
    #[default]
    Lru,
    /// Evict the entry with the lowest hit count (LRU among ties)
    HitCount,
}

/// Conversation cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Per-conversation capacity
    pub capacity: usize,

    /// Eviction policy
    pub eviction: EvictionPolicy,

    /// Consult the platform-wide cache on a local miss
    pub platform_enabled: bool,

    /// Platform-wide capacity
    pub platform_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            eviction: EvictionPolicy::Lru,
            platform_enabled: false,
            platform_capacity: 10_000,
        }
    }
}

/// A declarative structural matcher used by discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralRuleConfig {
    /// Rule name
    pub name: String,
    /// Regex a message must fully match
    pub regex: String,
    /// Template pattern proposed for matching messages
    pub template: String,
    /// Category assigned to the proposed template
    #[serde(default)]
    pub category: Option<String>,
}

/// Template discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Minimum matching messages for a candidate
    pub min_occurrences: usize,

    /// Minimum estimated compression ratio
    pub min_ratio: f64,

    /// Minimum confidence (0.0-1.0)
    pub min_confidence: f64,

    /// Clustering similarity threshold (0.0-1.0)
    pub similarity_threshold: f64,

    /// Worker pool size
    pub workers: usize,

    /// Maximum candidates returned
    pub max_candidates: usize,

    /// Extra structural rules appended to the built-in library
    pub structural_rules: Vec<StructuralRuleConfig>,

    /// Keywords that disqualify a candidate
    pub blocked_keywords: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            min_occurrences: 3,
            min_ratio: 1.5,
            min_confidence: 0.5,
            similarity_threshold: 0.6,
            workers: 4,
            max_candidates: 100,
            structural_rules: Vec::new(),
            blocked_keywords: [
                "password",
                "secret",
                "api_key",
                "credentials",
                "exploit",
                "weapon",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Template store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateStoreConfig {
    /// JSON template store loaded on startup
    pub store_path: Option<PathBuf>,
}
