//! Template payload codec.
//!
//! ```text
//! [4B template_id][1B slot_count]([2B slot_len][slot bytes])*
//! ```

use bytes::BufMut;

use crate::error::{AuraError, Result};
use crate::template::{TemplateMatch, TemplateSnapshot, MAX_SLOTS, MAX_SLOT_LEN};

/// Encode a matched template as a payload.
pub fn encode_payload(m: &TemplateMatch) -> Result<Vec<u8>> {
    if m.slots.len() > MAX_SLOTS {
        return Err(AuraError::Compression(format!(
            "Too many slots: {}",
            m.slots.len()
        )));
    }
    let mut buf = Vec::with_capacity(m.encoded_size);
    buf.put_u32(m.template_id);
    buf.put_u8(m.slots.len() as u8);
    for slot in &m.slots {
        let len = u16::try_from(slot.len()).map_err(|_| {
            AuraError::Compression(format!(
                "Slot of {} bytes exceeds {MAX_SLOT_LEN}",
                slot.len()
            ))
        })?;
        buf.put_u16(len);
        buf.put_slice(slot.as_bytes());
    }
    Ok(buf)
}

/// Parsed template payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePayload<'a> {
    /// Referenced template
    pub template_id: u32,
    /// Slot values in order
    pub slots: Vec<&'a str>,
}

impl<'a> TemplatePayload<'a> {
    /// Parse payload bytes. The payload must be consumed exactly.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut reader = Reader::new(payload);
        let template_id = u32::from_be_bytes(reader.array::<4>()?);
        let count = reader.array::<1>()?[0];

        let mut slots = Vec::with_capacity(usize::from(count));
        for i in 0..count {
            let len = usize::from(u16::from_be_bytes(reader.array::<2>()?));
            let bytes = reader.take(len)?;
            let slot = std::str::from_utf8(bytes).map_err(|e| {
                AuraError::CorruptContainer(format!("Slot {i} is not valid UTF-8: {e}"))
            })?;
            slots.push(slot);
        }
        if !reader.is_empty() {
            return Err(AuraError::CorruptContainer(format!(
                "{} trailing bytes after template payload",
                reader.remaining()
            )));
        }

        Ok(Self { template_id, slots })
    }
}

/// Decode a template payload against a snapshot.
///
/// A template ID absent from the snapshot is a
/// [`AuraError::TemplateStoreInconsistency`], never a best-effort guess.
pub fn decode_payload(payload: &[u8], snapshot: &TemplateSnapshot) -> Result<String> {
    TemplatePayload::parse(payload)?.render(snapshot)
}

impl TemplatePayload<'_> {
    /// Render against a snapshot. See [`decode_payload`].
    pub fn render(&self, snapshot: &TemplateSnapshot) -> Result<String> {
        let template =
            snapshot
                .get(self.template_id)
                .ok_or(AuraError::TemplateStoreInconsistency {
                    template_id: self.template_id,
                    store_version: snapshot.version(),
                })?;

        if self.slots.len() != template.slot_count() {
            return Err(AuraError::CorruptContainer(format!(
                "Template {} has {} slots, payload carries {}",
                self.template_id,
                template.slot_count(),
                self.slots.len()
            )));
        }
        template.render(&self.slots)
    }
}

/// Bounds-checked big-endian cursor
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len());
        let Some(end) = end else {
            return Err(AuraError::CorruptContainer(format!(
                "Payload truncated: need {n} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            )));
        };
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
