//! Fallback codecs (Method::Fallback).
//!
//! Thin adapters over general-purpose compressors. The codec used is
//! recorded in the Fallback metadata entry, so a decoder never depends on
//! its own configuration to pick one.

use std::io::{Read, Write};

use brotli::{CompressorWriter, Decompressor};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::config::{CompressionConfig, FallbackKind};
use crate::error::{AuraError, Result};

/// Codec ID carried in the metadata flags for Brotli
pub const BROTLI_CODEC_ID: u8 = 1;

/// Codec ID carried in the metadata flags for zlib
pub const ZLIB_CODEC_ID: u8 = 2;

/// Brotli compression quality (0-11, higher = better compression, slower)
const DEFAULT_QUALITY: u32 = 11;

/// Brotli window (log2). Messages are short; a small window keeps the
/// encoder state small.
const DEFAULT_LGWIN: u32 = 18;

/// Internal buffer size for the Brotli reader/writer
const BUFFER_SIZE: usize = 4096;

/// A deterministic, exactly round-tripping byte compressor
pub trait FallbackCodec: Send + Sync + std::fmt::Debug {
    /// Wire ID stored in the Fallback metadata entry
    fn id(&self) -> u8;

    /// Human-readable name
    fn name(&self) -> &'static str;

    /// Compress bytes
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress bytes, producing at most `max_len` of output.
    ///
    /// Output beyond `max_len` is a [`AuraError::CorruptContainer`]: the
    /// limit comes from the container's own metadata, so exceeding it means
    /// the container lies about its contents.
    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>>;
}

/// Drain `reader`, failing once more than `max_len` bytes come out.
fn read_bounded(reader: impl Read, max_len: usize, codec: &str) -> Result<Vec<u8>> {
    let limit = u64::try_from(max_len).unwrap_or(u64::MAX).saturating_add(1);
    let mut out = Vec::new();
    reader
        .take(limit)
        .read_to_end(&mut out)
        .map_err(|e| AuraError::FallbackCodec(format!("{codec}: {e}")))?;
    if out.len() > max_len {
        return Err(AuraError::CorruptContainer(format!(
            "{codec} output exceeds the {max_len} bytes recorded in metadata"
        )));
    }
    Ok(out)
}

/// Brotli codec
#[derive(Debug, Clone)]
pub struct BrotliCodec {
    /// Compression quality (0-11)
    pub quality: u32,
    /// Window size (10-24)
    pub window_size: u32,
}

impl Default for BrotliCodec {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            window_size: DEFAULT_LGWIN,
        }
    }
}

impl BrotliCodec {
    /// Create new Brotli codec with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create codec with custom quality
    pub fn with_quality(quality: u32) -> Self {
        Self {
            quality: quality.min(11),
            ..Default::default()
        }
    }
}

impl FallbackCodec for BrotliCodec {
    fn id(&self) -> u8 {
        BROTLI_CODEC_ID
    }

    fn name(&self) -> &'static str {
        "brotli"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut compressed = Vec::new();
        {
            let mut writer = CompressorWriter::new(
                &mut compressed,
                BUFFER_SIZE,
                self.quality,
                self.window_size,
            );
            writer
                .write_all(data)
                .map_err(|e| AuraError::FallbackCodec(format!("brotli: {e}")))?;
        }
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>> {
        read_bounded(Decompressor::new(data, BUFFER_SIZE), max_len, "brotli")
    }
}

/// Zlib/deflate codec
#[derive(Debug, Clone, Default)]
pub struct ZlibCodec;

impl FallbackCodec for ZlibCodec {
    fn id(&self) -> u8 {
        ZLIB_CODEC_ID
    }

    fn name(&self) -> &'static str {
        "zlib"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder
            .write_all(data)
            .map_err(|e| AuraError::FallbackCodec(format!("zlib: {e}")))?;
        encoder
            .finish()
            .map_err(|e| AuraError::FallbackCodec(format!("zlib: {e}")))
    }

    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>> {
        read_bounded(ZlibDecoder::new(data), max_len, "zlib")
    }
}

/// Encoder-side codec for a config
pub fn codec_for_config(config: &CompressionConfig) -> Box<dyn FallbackCodec> {
    match config.fallback_codec {
        FallbackKind::Brotli => Box::new(BrotliCodec::with_quality(config.brotli_quality)),
        FallbackKind::Zlib => Box::new(ZlibCodec),
    }
}

/// Decoder-side codec for a wire ID
pub fn codec_for_id(id: u8) -> Result<Box<dyn FallbackCodec>> {
    match id {
        BROTLI_CODEC_ID => Ok(Box::new(BrotliCodec::new())),
        ZLIB_CODEC_ID => Ok(Box::new(ZlibCodec)),
        other => Err(AuraError::CorruptContainer(format!(
            "Unknown fallback codec ID: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"Hello, Brotli! This is a test of byte compression. \
        Hello, Brotli! This is a test of byte compression.";

    #[test]
    fn test_brotli_roundtrip() {
        let codec = BrotliCodec::new();
        let compressed = codec.compress(SAMPLE).unwrap();
        assert!(compressed.len() < SAMPLE.len());
        assert_eq!(codec.decompress(&compressed, SAMPLE.len()).unwrap(), SAMPLE);
    }

    #[test]
    fn test_zlib_roundtrip() {
        let codec = ZlibCodec;
        let compressed = codec.compress(SAMPLE).unwrap();
        assert_eq!(codec.decompress(&compressed, SAMPLE.len()).unwrap(), SAMPLE);
    }

    #[test]
    fn test_deterministic() {
        let codec = BrotliCodec::new();
        assert_eq!(codec.compress(SAMPLE).unwrap(), codec.compress(SAMPLE).unwrap());
    }

    #[test]
    fn test_empty_input() {
        for codec in [codec_for_id(1).unwrap(), codec_for_id(2).unwrap()] {
            let compressed = codec.compress(b"").unwrap();
            assert!(codec.decompress(&compressed, 0).unwrap().is_empty());
        }
    }

    #[test]
    fn test_garbage_fails() {
        assert!(ZlibCodec.decompress(b"definitely not zlib", 64).is_err());
    }

    #[test]
    fn test_output_bounded_by_limit() {
        let bomb = vec![0u8; 20_000];
        for codec in [codec_for_id(1).unwrap(), codec_for_id(2).unwrap()] {
            let compressed = codec.compress(&bomb).unwrap();
            assert!(matches!(
                codec.decompress(&compressed, 10),
                Err(AuraError::CorruptContainer(_))
            ));
            assert_eq!(codec.decompress(&compressed, bomb.len()).unwrap().len(), bomb.len());
        }
    }

    #[test]
    fn test_codec_ids() {
        let config = CompressionConfig {
            fallback_codec: FallbackKind::Zlib,
            ..Default::default()
        };
        assert_eq!(codec_for_config(&config).id(), ZLIB_CODEC_ID);
        assert_eq!(codec_for_id(BROTLI_CODEC_ID).unwrap().name(), "brotli");
        assert!(codec_for_id(9).is_err());
    }
}
