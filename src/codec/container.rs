//! Wire container.
//!
//! ```text
//! [1B method tag][2B metadata count N][N x 6B metadata][payload]
//! ```
//!
//! Method tags: `0x00` Template, `0x01` Dictionary, `0x02` Fallback,
//! `0xFF` Literal. Any other tag is a corrupt container.

use bytes::{BufMut, BytesMut};

use super::metadata::{encode_metadata, MetadataEntry, MetadataView, METADATA_ENTRY_SIZE};
use super::Method;
use crate::error::{AuraError, Result};

/// Tag byte plus the metadata count
pub const HEADER_SIZE: usize = 3;

/// Total overhead of a Literal container (header plus one metadata entry)
pub const LITERAL_OVERHEAD: usize = HEADER_SIZE + METADATA_ENTRY_SIZE;

/// An owned container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedContainer {
    /// Encoding method
    pub method: Method,
    /// Metadata side-channel
    pub metadata: Vec<MetadataEntry>,
    /// Method-specific payload
    pub payload: Vec<u8>,
}

impl CompressedContainer {
    /// Create a container
    pub fn new(method: Method, metadata: Vec<MetadataEntry>, payload: Vec<u8>) -> Self {
        Self {
            method,
            metadata,
            payload,
        }
    }

    /// Literal container for `text`
    pub fn literal(text: &str) -> Self {
        Self::new(
            Method::Literal,
            vec![MetadataEntry::literal(text.len())],
            text.as_bytes().to_vec(),
        )
    }

    /// Encode a Literal container directly. Infallible: one metadata entry.
    pub fn encode_literal(text: &str) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(text.len() + LITERAL_OVERHEAD);
        buf.put_u8(Method::Literal.tag());
        buf.put_u16(1);
        MetadataEntry::literal(text.len()).write_to(&mut buf);
        buf.put_slice(text.as_bytes());
        buf.to_vec()
    }

    /// Size of the encoded container
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.metadata.len() * METADATA_ENTRY_SIZE + self.payload.len()
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.method.tag());
        encode_metadata(&self.metadata, &mut buf)?;
        buf.put_slice(&self.payload);
        Ok(buf.to_vec())
    }

    /// Parse and validate wire bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let view = ContainerView::parse(bytes)?;
        let metadata = view.metadata().iter().collect::<Result<Vec<_>>>()?;
        Ok(Self {
            method: view.method(),
            metadata,
            payload: view.payload().to_vec(),
        })
    }
}

/// Borrowed view over encoded container bytes
#[derive(Debug, Clone, Copy)]
pub struct ContainerView<'a> {
    method: Method,
    metadata: MetadataView<'a>,
    payload: &'a [u8],
}

impl<'a> ContainerView<'a> {
    /// Validate the header and metadata block.
    ///
    /// Payload bytes are not read; only the payload length is used to check
    /// that no entry points past the end of the payload.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let view = Self::parse_header(bytes)?;
        let payload_len = view.payload.len();
        for entry in view.metadata.iter() {
            let entry = entry?;
            if usize::from(entry.position) > payload_len {
                return Err(AuraError::CorruptContainer(format!(
                    "Metadata position {} beyond payload length {payload_len}",
                    entry.position
                )));
            }
        }
        Ok(view)
    }

    /// Split tag, metadata and payload without checking entries.
    fn parse_header(bytes: &'a [u8]) -> Result<Self> {
        let (&tag, rest) = bytes
            .split_first()
            .ok_or_else(|| AuraError::CorruptContainer("Empty container".to_string()))?;
        let method = Method::from_tag(tag)
            .ok_or_else(|| AuraError::CorruptContainer(format!("Unknown method tag: {tag:#04x}")))?;
        let metadata = MetadataView::parse(rest)?;
        let payload = &rest[metadata.encoded_len()..];
        Ok(Self {
            method,
            metadata,
            payload,
        })
    }

    /// Encoding method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Metadata side-channel
    pub fn metadata(&self) -> MetadataView<'a> {
        self.metadata
    }

    /// Payload bytes
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}
