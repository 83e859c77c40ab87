//! Dictionary coder (Method::Dictionary).
//!
//! Back-references into a bounded sliding window of previously seen
//! conversation text. The search space for a message is the window followed
//! by the already-encoded prefix of the message itself, so repeats inside a
//! single message are found too.
//!
//! # Token format
//!
//! ```text
//! literal: [0x00][2B len][bytes]
//! match:   [0x01][offset: W bytes][1B length]
//! ```
//!
//! `W` is the smallest byte width that holds `window_size - 1`; offsets are
//! stored minus one. Matches longer than 255 bytes are split; literal runs
//! longer than 65535 bytes are split.

use std::collections::HashMap;

use bytes::BufMut;

use crate::config::DictionaryConfig;
use crate::error::{AuraError, Result};

/// Literal token marker
const TOKEN_LITERAL: u8 = 0x00;

/// Match token marker
const TOKEN_MATCH: u8 = 0x01;

/// Longest match a single token can carry
pub const MAX_MATCH_LEN: usize = u8::MAX as usize;

/// Longest literal run a single token can carry
pub const MAX_LITERAL_RUN: usize = u16::MAX as usize;

/// Bytes hashed to seed the match finder
const HASH_LEN: usize = 3;

/// One dictionary token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictionaryToken {
    /// Raw bytes
    Literal(Vec<u8>),
    /// Copy `length` bytes starting `offset` bytes back
    Match {
        /// Distance back from the current position (>= 1)
        offset: usize,
        /// Bytes to copy
        length: usize,
    },
}

/// Bounded window of previously seen text
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    capacity: usize,
    buf: Vec<u8>,
}

impl HistoryWindow {
    /// Create an empty window
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Append text, dropping the oldest bytes past capacity.
    pub fn push(&mut self, text: &str) {
        let bytes = text.as_bytes();
        if bytes.len() >= self.capacity {
            self.buf.clear();
            self.buf
                .extend_from_slice(&bytes[bytes.len() - self.capacity..]);
            return;
        }
        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Window contents, oldest first
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Bytes currently held
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been seen yet
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Maximum bytes held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget all history
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Hash-chain LZ77 coder over a [`HistoryWindow`]
#[derive(Debug, Clone)]
pub struct DictionaryCoder {
    window_size: usize,
    min_match: usize,
    max_chain: usize,
    offset_width: usize,
}

impl Default for DictionaryCoder {
    fn default() -> Self {
        Self::new(&DictionaryConfig::default())
    }
}

impl DictionaryCoder {
    /// Create a coder from config
    pub fn new(config: &DictionaryConfig) -> Self {
        let window_size = config.window_size.max(1);
        Self {
            window_size,
            min_match: config.min_match.clamp(HASH_LEN, MAX_MATCH_LEN),
            max_chain: config.max_chain.max(1),
            offset_width: offset_width(window_size),
        }
    }

    /// Window size in bytes
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Bytes per encoded offset
    pub fn offset_width(&self) -> usize {
        self.offset_width
    }

    /// A history window sized for this coder
    pub fn new_history(&self) -> HistoryWindow {
        HistoryWindow::new(self.window_size)
    }

    /// Tokenize `text` against `history`.
    pub fn encode(&self, text: &str, history: &HistoryWindow) -> Vec<DictionaryToken> {
        let hist = history.as_bytes();
        let hist = &hist[hist.len().saturating_sub(self.window_size)..];
        let mut data = Vec::with_capacity(hist.len() + text.len());
        data.extend_from_slice(hist);
        data.extend_from_slice(text.as_bytes());
        let start = hist.len();

        let mut chains: HashMap<[u8; HASH_LEN], Vec<usize>> = HashMap::new();
        let insert = |chains: &mut HashMap<[u8; HASH_LEN], Vec<usize>>, pos: usize| {
            if let Some(key) = hash_key(&data, pos) {
                chains.entry(key).or_default().push(pos);
            }
        };
        for pos in 0..start {
            insert(&mut chains, pos);
        }

        let mut tokens = Vec::new();
        let mut literal: Vec<u8> = Vec::new();
        let mut pos = start;

        while pos < data.len() {
            if let Some((offset, length)) = self.longest_match(&data, pos, &chains) {
                if !literal.is_empty() {
                    tokens.push(DictionaryToken::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(DictionaryToken::Match { offset, length });
                for p in pos..pos + length {
                    insert(&mut chains, p);
                }
                pos += length;
            } else {
                literal.push(data[pos]);
                insert(&mut chains, pos);
                pos += 1;
                if literal.len() == MAX_LITERAL_RUN {
                    tokens.push(DictionaryToken::Literal(std::mem::take(&mut literal)));
                }
            }
        }
        if !literal.is_empty() {
            tokens.push(DictionaryToken::Literal(literal));
        }
        tokens
    }

    fn longest_match(
        &self,
        data: &[u8],
        pos: usize,
        chains: &HashMap<[u8; HASH_LEN], Vec<usize>>,
    ) -> Option<(usize, usize)> {
        let key = hash_key(data, pos)?;
        let chain = chains.get(&key)?;
        let limit = (data.len() - pos).min(MAX_MATCH_LEN);

        let mut best: Option<(usize, usize)> = None;
        for &candidate in chain.iter().rev().take(self.max_chain) {
            let offset = pos - candidate;
            if offset > self.window_size {
                break;
            }
            // Overlapping copies are allowed: the source may run into `pos`.
            let length = (0..limit)
                .take_while(|&i| data[candidate + i] == data[pos + i])
                .count();
            if length >= self.min_match && best.map_or(true, |(_, l)| length > l) {
                best = Some((offset, length));
                if length == limit {
                    break;
                }
            }
        }
        best
    }

    /// Rebuild text from tokens and the same history used to encode.
    pub fn decode(&self, tokens: &[DictionaryToken], history: &HistoryWindow) -> Result<String> {
        let hist = history.as_bytes();
        let hist = &hist[hist.len().saturating_sub(self.window_size)..];
        let start = hist.len();
        let mut data = hist.to_vec();

        for token in tokens {
            match token {
                DictionaryToken::Literal(bytes) => data.extend_from_slice(bytes),
                DictionaryToken::Match { offset, length } => {
                    if *offset == 0 || *offset > data.len() || *offset > self.window_size {
                        return Err(AuraError::CorruptContainer(format!(
                            "Back-reference offset {offset} outside window of {} bytes",
                            data.len()
                        )));
                    }
                    let from = data.len() - offset;
                    for i in 0..*length {
                        let b = data[from + i];
                        data.push(b);
                    }
                },
            }
        }

        String::from_utf8(data.split_off(start)).map_err(|e| {
            AuraError::CorruptContainer(format!("Dictionary output is not valid UTF-8: {e}"))
        })
    }

    /// Serialize tokens to payload bytes
    pub fn write_tokens(&self, tokens: &[DictionaryToken]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.tokens_size(tokens));
        for token in tokens {
            match token {
                DictionaryToken::Literal(bytes) => {
                    for chunk in bytes.chunks(MAX_LITERAL_RUN) {
                        buf.put_u8(TOKEN_LITERAL);
                        buf.put_u16(chunk.len() as u16);
                        buf.put_slice(chunk);
                    }
                },
                DictionaryToken::Match { offset, length } => {
                    let stored = (*offset - 1) as u64;
                    let mut remaining = *length;
                    while remaining > 0 {
                        let part = remaining.min(MAX_MATCH_LEN);
                        buf.put_u8(TOKEN_MATCH);
                        buf.put_uint(stored, self.offset_width);
                        buf.put_u8(part as u8);
                        remaining -= part;
                    }
                },
            }
        }
        buf
    }

    /// Parse payload bytes into tokens
    pub fn read_tokens(&self, payload: &[u8]) -> Result<Vec<DictionaryToken>> {
        let mut tokens = Vec::new();
        let mut pos = 0usize;
        let truncated =
            |what: &str| AuraError::CorruptContainer(format!("Dictionary payload truncated in {what}"));

        while pos < payload.len() {
            let marker = payload[pos];
            pos += 1;
            match marker {
                TOKEN_LITERAL => {
                    let len_bytes = payload.get(pos..pos + 2).ok_or_else(|| truncated("literal length"))?;
                    let len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
                    pos += 2;
                    let bytes = payload.get(pos..pos + len).ok_or_else(|| truncated("literal run"))?;
                    tokens.push(DictionaryToken::Literal(bytes.to_vec()));
                    pos += len;
                },
                TOKEN_MATCH => {
                    let end = pos + self.offset_width;
                    let raw = payload.get(pos..end).ok_or_else(|| truncated("match offset"))?;
                    let stored = raw.iter().fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
                    let length = *payload.get(end).ok_or_else(|| truncated("match length"))?;
                    pos = end + 1;
                    tokens.push(DictionaryToken::Match {
                        offset: stored + 1,
                        length: usize::from(length),
                    });
                },
                other => {
                    return Err(AuraError::CorruptContainer(format!(
                        "Unknown dictionary token marker: {other:#04x}"
                    )));
                },
            }
        }
        Ok(tokens)
    }

    /// Serialized size of `tokens`
    pub fn tokens_size(&self, tokens: &[DictionaryToken]) -> usize {
        tokens
            .iter()
            .map(|t| match t {
                DictionaryToken::Literal(bytes) => {
                    bytes.len() + 3 * bytes.len().div_ceil(MAX_LITERAL_RUN)
                },
                DictionaryToken::Match { length, .. } => {
                    (2 + self.offset_width) * length.div_ceil(MAX_MATCH_LEN)
                },
            })
            .sum()
    }
}

/// Total bytes copied from history and number of match tokens
pub fn match_summary(tokens: &[DictionaryToken]) -> (usize, usize) {
    tokens.iter().fold((0, 0), |(bytes, count), t| match t {
        DictionaryToken::Match { length, .. } => (bytes + length, count + 1),
        DictionaryToken::Literal(_) => (bytes, count),
    })
}

fn hash_key(data: &[u8], pos: usize) -> Option<[u8; HASH_LEN]> {
    let slice = data.get(pos..pos + HASH_LEN)?;
    let mut key = [0u8; HASH_LEN];
    key.copy_from_slice(slice);
    Some(key)
}

fn offset_width(window_size: usize) -> usize {
    let max_stored = window_size.saturating_sub(1);
    match max_stored {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coder() -> DictionaryCoder {
        DictionaryCoder::default()
    }

    fn roundtrip(coder: &DictionaryCoder, text: &str, history: &HistoryWindow) -> Vec<DictionaryToken> {
        let tokens = coder.encode(text, history);
        let bytes = coder.write_tokens(&tokens);
        assert_eq!(bytes.len(), coder.tokens_size(&tokens));
        let parsed = coder.read_tokens(&bytes).unwrap();
        assert_eq!(coder.decode(&parsed, history).unwrap(), text);
        tokens
    }

    #[test]
    fn test_no_history_is_literal() {
        let coder = coder();
        let history = coder.new_history();
        let tokens = roundtrip(&coder, "abcdefgh", &history);
        assert_eq!(tokens, vec![DictionaryToken::Literal(b"abcdefgh".to_vec())]);
    }

    #[test]
    fn test_match_against_history() {
        let coder = coder();
        let mut history = coder.new_history();
        history.push("The quick brown fox jumps over the lazy dog.");

        let tokens = roundtrip(&coder, "The quick brown fox sleeps.", &history);
        assert!(matches!(tokens[0], DictionaryToken::Match { length, .. } if length >= 20));
    }

    #[test]
    fn test_self_overlapping_match() {
        let coder = coder();
        let history = coder.new_history();
        let text = "ab".repeat(200);
        let tokens = roundtrip(&coder, &text, &history);
        let (copied, _) = match_summary(&tokens);
        assert!(copied > 390);
    }

    #[test]
    fn test_long_match_split() {
        let coder = coder();
        let mut history = coder.new_history();
        let text = "0123456789".repeat(60);
        history.push(&text);
        let tokens = roundtrip(&coder, &text, &history);
        assert!(tokens.iter().all(|t| match t {
            DictionaryToken::Match { length, .. } => *length <= MAX_MATCH_LEN,
            DictionaryToken::Literal(_) => true,
        }));
    }

    #[test]
    fn test_unicode_roundtrip() {
        let coder = coder();
        let mut history = coder.new_history();
        history.push("Grüße aus München 👋 und 日本語");
        roundtrip(&coder, "Grüße aus Köln 👋 und 日本語テキスト", &history);
    }

    #[test]
    fn test_offset_width() {
        assert_eq!(offset_width(256), 1);
        assert_eq!(offset_width(4096), 2);
        assert_eq!(offset_width(65536), 2);
        assert_eq!(offset_width(65537), 3);
        assert_eq!(offset_width(1 << 24), 3);
    }

    #[test]
    fn test_small_window_limits_offsets() {
        let config = DictionaryConfig {
            window_size: 16,
            ..Default::default()
        };
        let coder = DictionaryCoder::new(&config);
        let mut history = coder.new_history();
        history.push("abcdefgh-abcdefgh-abcdefgh-abcdefgh");
        assert_eq!(history.len(), 16);

        let tokens = roundtrip(&coder, "abcdefgh-abcdefgh", &history);
        for token in &tokens {
            if let DictionaryToken::Match { offset, .. } = token {
                assert!(*offset <= 16);
            }
        }
    }

    #[test]
    fn test_history_window_eviction() {
        let mut history = HistoryWindow::new(8);
        history.push("abcd");
        history.push("efgh");
        history.push("ij");
        assert_eq!(history.as_bytes(), b"cdefghij");
        history.push("0123456789");
        assert_eq!(history.as_bytes(), b"23456789");
    }

    #[test]
    fn test_decode_rejects_bad_offset() {
        let coder = coder();
        let history = coder.new_history();
        let tokens = vec![DictionaryToken::Match { offset: 5, length: 4 }];
        assert!(matches!(
            coder.decode(&tokens, &history),
            Err(AuraError::CorruptContainer(_))
        ));
    }

    #[test]
    fn test_read_rejects_garbage() {
        let coder = coder();
        assert!(coder.read_tokens(&[0x07]).is_err());
        assert!(coder.read_tokens(&[0x00, 0x00, 0x05, b'a']).is_err());
        assert!(coder.read_tokens(&[0x01, 0x00]).is_err());
    }
}
