//! Metadata side-channel.
//!
//! Every container carries a count-prefixed array of fixed-width entries
//! between the method tag and the payload:
//!
//! ```text
//! [2B count N, BE][N x 6B entries][payload...]
//!
//! entry: [2B position][1B kind][2B value][1B flags]
//! ```
//!
//! Because the width is fixed and the count is explicit, entry `n` lives at
//! a known offset and can be read without decoding entries `0..n` or any
//! payload byte.
//!
//! # Flags
//!
//! The high bit marks a `value` that was too large for 16 bits and has been
//! clamped to `u16::MAX`. The low seven bits are kind-specific: slot count
//! for templates, match count for back-references, codec ID for fallback.

#![allow(missing_docs)]

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::error::{AuraError, Result};

/// Size of one encoded entry
pub const METADATA_ENTRY_SIZE: usize = 6;

/// Size of the entry count field
pub const METADATA_COUNT_SIZE: usize = 2;

/// `value` was clamped to `u16::MAX`
pub const FLAG_SATURATED: u8 = 0x80;

/// Mask for the kind-specific low bits of `flags`
pub const FLAG_DETAIL_MASK: u8 = 0x7F;

/// What a metadata entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MetadataKind {
    /// Template reference: value = template ID
    Template = 0,
    /// Back-reference summary: value = bytes copied from history
    BackReference = 1,
    /// Uncompressed text: value = byte length
    Literal = 3,
    /// Fallback codec: value = original byte length
    Fallback = 4,
}

impl MetadataKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(MetadataKind::Template),
            1 => Some(MetadataKind::BackReference),
            3 => Some(MetadataKind::Literal),
            4 => Some(MetadataKind::Fallback),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One fixed-width metadata record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// Payload offset the entry refers to
    pub position: u16,
    pub kind: MetadataKind,
    pub value: u16,
    pub flags: u8,
}

impl MetadataEntry {
    /// Build an entry, clamping `value` and setting [`FLAG_SATURATED`] if
    /// it does not fit in 16 bits.
    pub fn new(kind: MetadataKind, position: u16, value: u64, detail: u8) -> Self {
        let (value, saturated) = match u16::try_from(value) {
            Ok(v) => (v, false),
            Err(_) => (u16::MAX, true),
        };
        let mut flags = detail & FLAG_DETAIL_MASK;
        if saturated {
            flags |= FLAG_SATURATED;
        }
        Self {
            position,
            kind,
            value,
            flags,
        }
    }

    /// Template reference
    pub fn template(template_id: u32, slot_count: usize) -> Self {
        Self::new(
            MetadataKind::Template,
            0,
            u64::from(template_id),
            clamp_detail(slot_count),
        )
    }

    /// Back-reference summary
    pub fn back_reference(copied_bytes: usize, match_count: usize) -> Self {
        Self::new(
            MetadataKind::BackReference,
            0,
            copied_bytes as u64,
            clamp_detail(match_count),
        )
    }

    /// Uncompressed text
    pub fn literal(len: usize) -> Self {
        Self::new(MetadataKind::Literal, 0, len as u64, 0)
    }

    /// Fallback codec output
    pub fn fallback(original_len: usize, codec_id: u8) -> Self {
        Self::new(MetadataKind::Fallback, 0, original_len as u64, codec_id)
    }

    /// Whether `value` was clamped
    pub fn is_saturated(&self) -> bool {
        self.flags & FLAG_SATURATED != 0
    }

    /// Kind-specific low bits of `flags`
    pub fn detail(&self) -> u8 {
        self.flags & FLAG_DETAIL_MASK
    }

    /// `value`, unless it was clamped
    pub fn exact_value(&self) -> Option<u16> {
        (!self.is_saturated()).then_some(self.value)
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.position);
        buf.put_u8(self.kind.as_byte());
        buf.put_u16(self.value);
        buf.put_u8(self.flags);
    }

    /// Parse one 6-byte record
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < METADATA_ENTRY_SIZE {
            return Err(AuraError::CorruptContainer(format!(
                "Metadata entry too short: {} bytes",
                bytes.len()
            )));
        }
        let kind = MetadataKind::from_byte(bytes[2]).ok_or_else(|| {
            AuraError::CorruptContainer(format!("Unknown metadata kind: {}", bytes[2]))
        })?;
        Ok(Self {
            position: u16::from_be_bytes([bytes[0], bytes[1]]),
            kind,
            value: u16::from_be_bytes([bytes[3], bytes[4]]),
            flags: bytes[5],
        })
    }
}

pub(crate) fn clamp_detail(n: usize) -> u8 {
    u8::try_from(n).map_or(FLAG_DETAIL_MASK, |n| n.min(FLAG_DETAIL_MASK))
}

/// Encode `[count][entries]`
pub fn encode_metadata(entries: &[MetadataEntry], buf: &mut impl BufMut) -> Result<()> {
    let count = u16::try_from(entries.len()).map_err(|_| {
        AuraError::Compression(format!("Too many metadata entries: {}", entries.len()))
    })?;
    buf.put_u16(count);
    for entry in entries {
        entry.write_to(buf);
    }
    Ok(())
}

/// Decode `[count][entries]` from the front of `bytes`
pub fn decode_metadata(bytes: &[u8]) -> Result<Vec<MetadataEntry>> {
    MetadataView::parse(bytes)?.iter().collect()
}

/// Zero-copy, random-access view over an encoded metadata block
#[derive(Debug, Clone, Copy)]
pub struct MetadataView<'a> {
    count: usize,
    records: &'a [u8],
}

impl<'a> MetadataView<'a> {
    /// Read the count field and bound the record array. Only the count and
    /// the record bytes are touched.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < METADATA_COUNT_SIZE {
            return Err(AuraError::CorruptContainer(
                "Missing metadata count".to_string(),
            ));
        }
        let count = usize::from(u16::from_be_bytes([bytes[0], bytes[1]]));
        let end = METADATA_COUNT_SIZE + count * METADATA_ENTRY_SIZE;
        if bytes.len() < end {
            return Err(AuraError::CorruptContainer(format!(
                "Metadata declares {count} entries but only {} bytes follow",
                bytes.len() - METADATA_COUNT_SIZE
            )));
        }
        Ok(Self {
            count,
            records: &bytes[METADATA_COUNT_SIZE..end],
        })
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Encoded size including the count field
    pub fn encoded_len(&self) -> usize {
        METADATA_COUNT_SIZE + self.records.len()
    }

    /// Read entry `n` directly
    pub fn entry(&self, n: usize) -> Result<MetadataEntry> {
        if n >= self.count {
            return Err(AuraError::CorruptContainer(format!(
                "Metadata entry {n} out of range (count {})",
                self.count
            )));
        }
        let start = n * METADATA_ENTRY_SIZE;
        MetadataEntry::from_bytes(&self.records[start..start + METADATA_ENTRY_SIZE])
    }

    /// All entries in order
    pub fn iter(&self) -> impl Iterator<Item = Result<MetadataEntry>> + 'a {
        self.records
            .chunks_exact(METADATA_ENTRY_SIZE)
            .map(MetadataEntry::from_bytes)
    }

    /// First entry of the given kind
    pub fn find(&self, kind: MetadataKind) -> Result<Option<MetadataEntry>> {
        for entry in self.iter() {
            let entry = entry?;
            if entry.kind == kind {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(entries: &[MetadataEntry]) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_metadata(entries, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_entry_layout() {
        let entry = MetadataEntry {
            position: 0x0102,
            kind: MetadataKind::Fallback,
            value: 0x0304,
            flags: 0x05,
        };
        let bytes = encode(&[entry]);
        assert_eq!(bytes, vec![0x00, 0x01, 0x01, 0x02, 0x04, 0x03, 0x04, 0x05]);
    }

    #[test]
    fn test_length_is_count_times_six() {
        let entries = vec![
            MetadataEntry::template(20, 1),
            MetadataEntry::literal(12),
            MetadataEntry::fallback(300, 1),
        ];
        let bytes = encode(&entries);
        assert_eq!(bytes.len(), METADATA_COUNT_SIZE + 3 * METADATA_ENTRY_SIZE);
        assert_eq!(decode_metadata(&bytes).unwrap(), entries);
    }

    #[test]
    fn test_random_access() {
        let entries: Vec<_> = (0..10).map(|i| MetadataEntry::literal(i * 7)).collect();
        let bytes = encode(&entries);
        let view = MetadataView::parse(&bytes).unwrap();
        assert_eq!(view.entry(7).unwrap(), entries[7]);
        assert!(view.entry(10).is_err());
    }

    #[test]
    fn test_random_access_skips_corrupt_earlier_records() {
        let entries = vec![MetadataEntry::literal(1), MetadataEntry::literal(2)];
        let mut bytes = encode(&entries);
        // Corrupt the kind byte of entry 0
        bytes[METADATA_COUNT_SIZE + 2] = 0x99;
        let view = MetadataView::parse(&bytes).unwrap();
        assert!(view.entry(0).is_err());
        assert_eq!(view.entry(1).unwrap(), entries[1]);
    }

    #[test]
    fn test_saturation() {
        let entry = MetadataEntry::template(70_000, 2);
        assert_eq!(entry.value, u16::MAX);
        assert!(entry.is_saturated());
        assert_eq!(entry.detail(), 2);
        assert_eq!(entry.exact_value(), None);

        let small = MetadataEntry::template(20, 1);
        assert_eq!(small.exact_value(), Some(20));
    }

    #[test]
    fn test_detail_clamped() {
        let entry = MetadataEntry::template(1, 300);
        assert_eq!(entry.detail(), FLAG_DETAIL_MASK);
        assert!(!entry.is_saturated());
    }

    #[test]
    fn test_truncated_metadata() {
        let bytes = encode(&[MetadataEntry::literal(5)]);
        assert!(MetadataView::parse(&bytes[..bytes.len() - 1]).is_err());
        assert!(MetadataView::parse(&[0x00]).is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut bytes = encode(&[MetadataEntry::literal(5)]);
        bytes[METADATA_COUNT_SIZE + 2] = 2;
        assert!(matches!(
            decode_metadata(&bytes),
            Err(AuraError::CorruptContainer(_))
        ));
    }
}
