//! ByteInterval: a contiguous, possibly unplaced, run of bytes.
//!
//! An interval owns the blocks that cover its bytes and the symbolic
//! expressions embedded in them. Blocks may overlap one another freely.
//! Bytes in `[contents.len(), size)` are uninitialized (e.g. `.bss`), so the
//! initialized buffer may be shorter than the blocks covering it, but nothing
//! (block, expression or byte) may extend past `size`.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use uuid::Uuid;

use crate::core::address::Addr;
use crate::core::block::{ByteBlock, CodeBlock, DataBlock};
use crate::core::id::{new_identifier, NodeVec};
use crate::core::symbolic_expression::SymbolicExpression;
use crate::error::{IrError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ByteInterval {
    uuid: Uuid,
    address: Option<Addr>,
    size: u64,
    contents: Vec<u8>,
    // Sorted by offset; equal offsets keep insertion order.
    blocks: NodeVec<ByteBlock>,
    symbolic_expressions: BTreeMap<u64, Vec<SymbolicExpression>>,
}

impl ByteInterval {
    /// An unplaced interval of `size` bytes, all uninitialized.
    pub fn new(size: u64) -> Self {
        Self::with_uuid(new_identifier(), size)
    }

    pub fn with_uuid(uuid: Uuid, size: u64) -> Self {
        Self {
            uuid,
            address: None,
            size,
            contents: Vec::new(),
            blocks: NodeVec::new(),
            symbolic_expressions: BTreeMap::new(),
        }
    }

    /// An interval whose size and initialized bytes are `contents`.
    pub fn from_bytes(contents: Vec<u8>) -> Self {
        let mut interval = Self::new(contents.len() as u64);
        interval.contents = contents;
        interval
    }

    /// Builder-style placement, for intervals not yet attached to an IR.
    pub fn with_address(mut self, address: Addr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Fixed address, or `None` when the interval is unplaced.
    pub fn address(&self) -> Option<Addr> {
        self.address
    }

    pub(crate) fn set_address(&mut self, address: Option<Addr>) {
        self.address = address;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of leading bytes that carry initialized contents.
    pub fn initialized_size(&self) -> u64 {
        self.contents.len() as u64
    }

    /// Initialized contents.
    pub fn bytes(&self) -> &[u8] {
        &self.contents
    }

    /// Address range covered when placed.
    pub fn address_range(&self) -> Option<Range<u64>> {
        self.address
            .map(|a| a.value()..a.value().saturating_add(self.size))
    }

    pub fn contains_address(&self, addr: Addr) -> bool {
        self.address_range()
            .map(|r| r.contains(&addr.value()))
            .unwrap_or(false)
    }

    /// Largest `offset + size` over all blocks.
    pub fn max_block_extent(&self) -> u64 {
        self.blocks().iter().map(ByteBlock::end).max().unwrap_or(0)
    }

    /// Change the interval size.
    ///
    /// Fails when blocks or symbolic expressions would fall outside the new
    /// extent. Initialized bytes past the new size are dropped.
    pub fn set_size(&mut self, size: u64) -> Result<()> {
        let required = self.max_block_extent();
        if size < required {
            return Err(IrError::LengthMismatch {
                required,
                available: size,
            });
        }
        if let Some((&offset, _)) = self.symbolic_expressions.range(size..).next() {
            return Err(IrError::OffsetOutOfBounds {
                offset,
                interval_size: size,
            });
        }
        self.size = size;
        self.contents.truncate(size as usize);
        Ok(())
    }

    /// Replace the initialized contents.
    pub fn set_contents(&mut self, contents: Vec<u8>) -> Result<()> {
        let required = contents.len() as u64;
        if required > self.size {
            return Err(IrError::LengthMismatch {
                required,
                available: self.size,
            });
        }
        self.contents = contents;
        Ok(())
    }

    /// Overwrite bytes starting at `offset`, initializing any gap with zeros.
    pub fn set_bytes_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len() as u64)
            .ok_or(IrError::LengthMismatch {
                required: u64::MAX,
                available: self.size,
            })?;
        if end > self.size {
            return Err(IrError::LengthMismatch {
                required: end,
                available: self.size,
            });
        }
        let (start, end) = (offset as usize, end as usize);
        if self.contents.len() < end {
            self.contents.resize(end, 0);
        }
        self.contents[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Mark everything from `initialized` onwards as uninitialized, or
    /// zero-fill up to it.
    pub fn set_initialized_size(&mut self, initialized: u64) -> Result<()> {
        if initialized > self.size {
            return Err(IrError::LengthMismatch {
                required: initialized,
                available: self.size,
            });
        }
        self.contents.resize(initialized as usize, 0);
        Ok(())
    }

    // ----- blocks -----

    /// All blocks in ascending offset order.
    pub fn blocks(&self) -> &[ByteBlock] {
        self.blocks.as_slice()
    }

    pub fn block(&self, id: &Uuid) -> Option<&ByteBlock> {
        self.blocks.get(id)
    }

    pub fn code_blocks(&self) -> impl Iterator<Item = &CodeBlock> {
        self.blocks().iter().filter_map(ByteBlock::as_code)
    }

    pub fn data_blocks(&self) -> impl Iterator<Item = &DataBlock> {
        self.blocks().iter().filter_map(ByteBlock::as_data)
    }

    pub fn code_block_mut(&mut self, id: &Uuid) -> Option<&mut CodeBlock> {
        self.blocks.get_mut(id).and_then(ByteBlock::as_code_mut)
    }

    /// Blocks with at least one byte in `[start, end)`, ascending by offset.
    pub fn blocks_overlapping(&self, start: u64, end: u64) -> impl Iterator<Item = &ByteBlock> {
        // Blocks starting at or past `end` cannot overlap.
        let blocks = self.blocks();
        let limit = blocks.partition_point(|b| b.offset() < end);
        blocks[..limit]
            .iter()
            .filter(move |b| b.overlaps(start, end))
    }

    /// Blocks that start exactly at `offset`.
    pub fn blocks_at(&self, offset: u64) -> impl Iterator<Item = &ByteBlock> {
        let blocks = self.blocks();
        let first = blocks.partition_point(|b| b.offset() < offset);
        blocks[first..]
            .iter()
            .take_while(move |b| b.offset() == offset)
    }

    /// Initialized bytes covered by a block. Shorter than the block when it
    /// runs into the uninitialized tail.
    pub fn block_bytes(&self, id: &Uuid) -> Option<&[u8]> {
        let block = self.block(id)?;
        let len = self.contents.len() as u64;
        let start = block.offset().min(len) as usize;
        let end = block.end().min(len) as usize;
        Some(&self.contents[start..end])
    }

    pub(crate) fn check_block_fits(&self, offset: u64, size: u64) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(IrError::BlockOutOfBounds {
                offset,
                size,
                interval_size: self.size,
            }),
        }
    }

    pub(crate) fn insert_block(&mut self, offset: u64, mut block: ByteBlock) -> Result<()> {
        self.check_block_fits(offset, block.size())?;
        block.set_offset(offset);
        let position = self.blocks().partition_point(|b| b.offset() <= offset);
        self.blocks.insert(position, block);
        Ok(())
    }

    pub(crate) fn remove_block(&mut self, id: &Uuid) -> Option<ByteBlock> {
        self.blocks.remove(id)
    }

    /// Change a block's size in place.
    pub fn resize_block(&mut self, id: &Uuid, size: u64) -> Result<()> {
        let offset = self
            .block(id)
            .map(ByteBlock::offset)
            .ok_or(IrError::UnknownNode(*id))?;
        self.check_block_fits(offset, size)?;
        if let Some(block) = self.blocks.get_mut(id) {
            block.set_size(size);
        }
        Ok(())
    }

    // ----- symbolic expressions -----

    /// Attach a symbolic expression at `offset`. Several expressions may
    /// share an offset; they keep insertion order.
    pub fn add_symbolic_expression(&mut self, offset: u64, expr: SymbolicExpression) -> Result<()> {
        if offset >= self.size {
            return Err(IrError::OffsetOutOfBounds {
                offset,
                interval_size: self.size,
            });
        }
        self.symbolic_expressions
            .entry(offset)
            .or_default()
            .push(expr);
        Ok(())
    }

    pub fn symbolic_expressions_at(&self, offset: u64) -> &[SymbolicExpression] {
        self.symbolic_expressions
            .get(&offset)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every `(offset, expression)` pair in ascending offset order.
    pub fn symbolic_expressions(&self) -> impl Iterator<Item = (u64, &SymbolicExpression)> {
        self.symbolic_expressions
            .iter()
            .flat_map(|(offset, exprs)| exprs.iter().map(move |e| (*offset, e)))
    }

    pub fn symbolic_expressions_in(
        &self,
        range: Range<u64>,
    ) -> impl Iterator<Item = (u64, &SymbolicExpression)> {
        self.symbolic_expressions
            .range(range)
            .flat_map(|(offset, exprs)| exprs.iter().map(move |e| (*offset, e)))
    }

    pub fn symbolic_expression_count(&self) -> usize {
        self.symbolic_expressions.values().map(Vec::len).sum()
    }

    /// Remove the `index`-th expression at `offset`.
    pub fn remove_symbolic_expression(
        &mut self,
        offset: u64,
        index: usize,
    ) -> Option<SymbolicExpression> {
        let exprs = self.symbolic_expressions.get_mut(&offset)?;
        if index >= exprs.len() {
            return None;
        }
        let removed = exprs.remove(index);
        if exprs.is_empty() {
            self.symbolic_expressions.remove(&offset);
        }
        Some(removed)
    }

    pub fn remove_symbolic_expressions_at(&mut self, offset: u64) -> Vec<SymbolicExpression> {
        self.symbolic_expressions
            .remove(&offset)
            .unwrap_or_default()
    }
}

impl fmt::Display for ByteInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(addr) => write!(f, "ByteInterval({} @ {}, size={})", self.uuid, addr, self.size),
            None => write!(f, "ByteInterval({}, unplaced, size={})", self.uuid, self.size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval_with_blocks() -> (ByteInterval, Uuid, Uuid, Uuid) {
        let mut interval = ByteInterval::from_bytes(vec![0x90; 16]);
        let a = CodeBlock::new(8);
        let b = DataBlock::new(4);
        let c = CodeBlock::new(4);
        let (ia, ib, ic) = (a.uuid(), b.uuid(), c.uuid());
        interval.insert_block(4, a.into()).unwrap();
        interval.insert_block(0, b.into()).unwrap();
        interval.insert_block(4, c.into()).unwrap();
        (interval, ia, ib, ic)
    }

    #[test]
    fn test_blocks_sorted_with_insertion_ties() {
        let (interval, a, b, c) = interval_with_blocks();
        let order: Vec<Uuid> = interval.blocks().iter().map(ByteBlock::uuid).collect();
        assert_eq!(order, vec![b, a, c]);
        let at_four: Vec<Uuid> = interval.blocks_at(4).map(ByteBlock::uuid).collect();
        assert_eq!(at_four, vec![a, c]);
    }

    #[test]
    fn test_blocks_overlapping() {
        let (interval, a, b, c) = interval_with_blocks();
        let hits: Vec<Uuid> = interval
            .blocks_overlapping(3, 6)
            .map(ByteBlock::uuid)
            .collect();
        assert_eq!(hits, vec![b, a, c]);
        let hits: Vec<Uuid> = interval
            .blocks_overlapping(8, 16)
            .map(ByteBlock::uuid)
            .collect();
        assert_eq!(hits, vec![a]);
        assert_eq!(interval.blocks_overlapping(12, 16).count(), 0);
    }

    #[test]
    fn test_block_must_fit() {
        let mut interval = ByteInterval::new(8);
        let err = interval
            .insert_block(6, CodeBlock::new(4).into())
            .unwrap_err();
        assert!(matches!(err, IrError::BlockOutOfBounds { offset: 6, .. }));
        assert!(interval
            .insert_block(u64::MAX, DataBlock::new(2).into())
            .is_err());
        assert!(interval.insert_block(4, CodeBlock::new(4).into()).is_ok());
    }

    #[test]
    fn test_set_size_respects_blocks() {
        let (mut interval, a, _, _) = interval_with_blocks();
        assert_eq!(interval.max_block_extent(), 12);
        assert!(matches!(
            interval.set_size(10),
            Err(IrError::LengthMismatch {
                required: 12,
                available: 10
            })
        ));
        interval.set_size(12).unwrap();
        assert_eq!(interval.initialized_size(), 12);
        assert!(interval.resize_block(&a, 16).is_err());
        interval.resize_block(&a, 2).unwrap();
        assert_eq!(interval.block(&a).unwrap().size(), 2);
    }

    #[test]
    fn test_contents_and_uninitialized_tail() {
        let mut interval = ByteInterval::new(8);
        assert_eq!(interval.initialized_size(), 0);
        assert!(interval.set_contents(vec![0; 9]).is_err());
        interval.set_bytes_at(2, &[1, 2]).unwrap();
        assert_eq!(interval.bytes(), &[0, 0, 1, 2]);
        assert!(matches!(
            interval.set_bytes_at(7, &[1, 2]),
            Err(IrError::LengthMismatch { required: 9, .. })
        ));

        let block = DataBlock::new(6);
        let id = block.uuid();
        interval.insert_block(1, block.into()).unwrap();
        assert_eq!(interval.block_bytes(&id).unwrap(), &[0, 1, 2]);

        interval.set_initialized_size(2).unwrap();
        assert_eq!(interval.bytes(), &[0, 0]);
    }

    #[test]
    fn test_symbolic_expressions() {
        let mut interval = ByteInterval::new(16);
        let sym = Uuid::from_u128(9);
        interval
            .add_symbolic_expression(4, SymbolicExpression::addr_const(sym, 0))
            .unwrap();
        interval
            .add_symbolic_expression(4, SymbolicExpression::addr_const(sym, 8))
            .unwrap();
        interval
            .add_symbolic_expression(12, SymbolicExpression::stack_const(sym, -4))
            .unwrap();
        assert!(interval
            .add_symbolic_expression(16, SymbolicExpression::addr_const(sym, 0))
            .is_err());

        assert_eq!(interval.symbolic_expressions_at(4).len(), 2);
        assert_eq!(interval.symbolic_expression_count(), 3);
        assert_eq!(interval.symbolic_expressions_in(5..16).count(), 1);
        assert!(matches!(
            interval.set_size(12),
            Err(IrError::OffsetOutOfBounds { offset: 12, .. })
        ));

        let removed = interval.remove_symbolic_expression(4, 0).unwrap();
        assert_eq!(removed, SymbolicExpression::addr_const(sym, 0));
        assert_eq!(interval.symbolic_expressions_at(4).len(), 1);
        assert!(interval.remove_symbolic_expression(4, 3).is_none());
        assert_eq!(interval.remove_symbolic_expressions_at(12).len(), 1);
    }

    #[test]
    fn test_address_range() {
        let interval = ByteInterval::new(0x10).with_address(Addr(0x1000));
        assert_eq!(interval.address_range(), Some(0x1000..0x1010));
        assert!(interval.contains_address(Addr(0x100f)));
        assert!(!interval.contains_address(Addr(0x1010)));
        assert!(ByteInterval::new(4).address_range().is_none());
    }
}
