//! Block types: the addressable units of a binary.
//!
//! Byte blocks ([`CodeBlock`], [`DataBlock`]) live inside a byte interval at
//! an offset and cover `size` bytes of it. A [`ProxyBlock`] has no bytes; it
//! stands in for an external or unresolved code target and can only appear
//! as a CFG node or a symbol referent.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core::id::{new_identifier, Identified, NodeKind};

/// Variations on decoding a particular ISA.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum DecodeMode {
    /// Default decode mode for all ISAs
    #[default]
    Default,
    /// Thumb decode mode for ARM32
    Thumb,
}

/// A run of instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    uuid: Uuid,
    size: u64,
    offset: u64,
    decode_mode: DecodeMode,
}

impl CodeBlock {
    pub fn new(size: u64) -> Self {
        Self::with_uuid(new_identifier(), size)
    }

    /// Create a block with a caller-chosen identifier.
    pub fn with_uuid(uuid: Uuid, size: u64) -> Self {
        Self {
            uuid,
            size,
            offset: 0,
            decode_mode: DecodeMode::Default,
        }
    }

    pub fn with_decode_mode(mut self, decode_mode: DecodeMode) -> Self {
        self.decode_mode = decode_mode;
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Offset of the block within its byte interval.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn decode_mode(&self) -> DecodeMode {
        self.decode_mode
    }

    pub fn set_decode_mode(&mut self, decode_mode: DecodeMode) {
        self.decode_mode = decode_mode;
    }
}

/// A run of plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    uuid: Uuid,
    size: u64,
    offset: u64,
}

impl DataBlock {
    pub fn new(size: u64) -> Self {
        Self::with_uuid(new_identifier(), size)
    }

    pub fn with_uuid(uuid: Uuid, size: u64) -> Self {
        Self {
            uuid,
            size,
            offset: 0,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// A block that owns bytes in a byte interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteBlock {
    Code(CodeBlock),
    Data(DataBlock),
}

impl ByteBlock {
    pub fn uuid(&self) -> Uuid {
        match self {
            ByteBlock::Code(b) => b.uuid,
            ByteBlock::Data(b) => b.uuid,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            ByteBlock::Code(b) => b.size,
            ByteBlock::Data(b) => b.size,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            ByteBlock::Code(b) => b.offset,
            ByteBlock::Data(b) => b.offset,
        }
    }

    /// One past the last byte covered, relative to the interval start.
    pub fn end(&self) -> u64 {
        self.offset().saturating_add(self.size())
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            ByteBlock::Code(_) => NodeKind::CodeBlock,
            ByteBlock::Data(_) => NodeKind::DataBlock,
        }
    }

    pub fn as_code(&self) -> Option<&CodeBlock> {
        match self {
            ByteBlock::Code(b) => Some(b),
            ByteBlock::Data(_) => None,
        }
    }

    pub fn as_data(&self) -> Option<&DataBlock> {
        match self {
            ByteBlock::Data(b) => Some(b),
            ByteBlock::Code(_) => None,
        }
    }

    pub fn as_code_mut(&mut self) -> Option<&mut CodeBlock> {
        match self {
            ByteBlock::Code(b) => Some(b),
            ByteBlock::Data(_) => None,
        }
    }

    /// Whether the block has any byte in `[start, end)`.
    ///
    /// Zero-sized blocks overlap a range when they sit inside it.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        let offset = self.offset();
        if self.size() == 0 {
            return offset >= start && offset < end;
        }
        offset < end && self.end() > start
    }

    pub(crate) fn set_offset(&mut self, offset: u64) {
        match self {
            ByteBlock::Code(b) => b.offset = offset,
            ByteBlock::Data(b) => b.offset = offset,
        }
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        match self {
            ByteBlock::Code(b) => b.size = size,
            ByteBlock::Data(b) => b.size = size,
        }
    }
}

impl Identified for ByteBlock {
    fn node_id(&self) -> Uuid {
        self.uuid()
    }
}

impl From<CodeBlock> for ByteBlock {
    fn from(block: CodeBlock) -> Self {
        ByteBlock::Code(block)
    }
}

impl From<DataBlock> for ByteBlock {
    fn from(block: DataBlock) -> Self {
        ByteBlock::Data(block)
    }
}

impl fmt::Display for ByteBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}, offset={:#x}, size={})",
            self.kind(),
            self.uuid(),
            self.offset(),
            self.size()
        )
    }
}

/// Placeholder block for an external or unknown code target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyBlock {
    uuid: Uuid,
}

impl ProxyBlock {
    pub fn new() -> Self {
        Self::with_uuid(new_identifier())
    }

    pub fn with_uuid(uuid: Uuid) -> Self {
        Self { uuid }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl Identified for ProxyBlock {
    fn node_id(&self) -> Uuid {
        self.uuid
    }
}

impl Default for ProxyBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_block_defaults() {
        let block = CodeBlock::new(4);
        assert_eq!(block.size(), 4);
        assert_eq!(block.offset(), 0);
        assert_eq!(block.decode_mode(), DecodeMode::Default);

        let thumb = CodeBlock::new(2).with_decode_mode(DecodeMode::Thumb);
        assert_eq!(thumb.decode_mode(), DecodeMode::Thumb);
    }

    #[test]
    fn test_byte_block_overlap() {
        let mut block: ByteBlock = DataBlock::new(4).into();
        block.set_offset(8);
        assert!(block.overlaps(0, 9));
        assert!(block.overlaps(11, 20));
        assert!(!block.overlaps(12, 20));
        assert!(!block.overlaps(0, 8));
        assert_eq!(block.end(), 12);
        assert_eq!(block.kind(), NodeKind::DataBlock);
    }

    #[test]
    fn test_zero_sized_block_overlap() {
        let mut block: ByteBlock = CodeBlock::new(0).into();
        block.set_offset(4);
        assert!(block.overlaps(4, 5));
        assert!(!block.overlaps(0, 4));
    }

    #[test]
    fn test_proxy_identity() {
        let id = Uuid::from_u128(7);
        assert_eq!(ProxyBlock::with_uuid(id).uuid(), id);
        assert_ne!(ProxyBlock::new().uuid(), ProxyBlock::new().uuid());
    }
}
