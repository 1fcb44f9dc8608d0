//! Module: one loaded binary image.
//!
//! A module owns its sections, its symbol table, its proxy blocks and an
//! AuxData table. Container-level mutation (adding, removing or moving
//! children) goes through [`Ir`](crate::core::ir::Ir) so the identity
//! registry and CFG stay in step; scalar metadata is public.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core::address::Addr;
use crate::core::aux_data::AuxDataContainer;
use crate::core::block::ProxyBlock;
use crate::core::byte_interval::ByteInterval;
use crate::core::id::{new_identifier, NodeVec};
use crate::core::section::Section;
use crate::core::symbol::Symbol;

/// Container format the image was read from.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum FileFormat {
    #[default]
    Undefined,
    Coff,
    Elf,
    Pe,
    /// IDA Pro database file
    IdaProDb32,
    /// IDA Pro database file
    IdaProDb64,
    Xcoff,
    Macho,
    /// Raw binary with no container
    Raw,
}

/// Instruction set architecture.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum Isa {
    #[default]
    Undefined,
    Ia32,
    Ppc32,
    X64,
    Arm,
    /// A known architecture with no dedicated value here
    ValidButUnsupported,
    Ppc64,
    Arm64,
    Mips32,
    Mips64,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum ByteOrder {
    #[default]
    Undefined,
    Big,
    Little,
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Undefined => write!(f, "undefined"),
            FileFormat::Coff => write!(f, "COFF"),
            FileFormat::Elf => write!(f, "ELF"),
            FileFormat::Pe => write!(f, "PE"),
            FileFormat::IdaProDb32 => write!(f, "IDB32"),
            FileFormat::IdaProDb64 => write!(f, "IDB64"),
            FileFormat::Xcoff => write!(f, "XCOFF"),
            FileFormat::Macho => write!(f, "Mach-O"),
            FileFormat::Raw => write!(f, "raw"),
        }
    }
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Isa::Undefined => write!(f, "undefined"),
            Isa::Ia32 => write!(f, "ia32"),
            Isa::Ppc32 => write!(f, "ppc32"),
            Isa::X64 => write!(f, "x64"),
            Isa::Arm => write!(f, "arm"),
            Isa::ValidButUnsupported => write!(f, "valid-but-unsupported"),
            Isa::Ppc64 => write!(f, "ppc64"),
            Isa::Arm64 => write!(f, "arm64"),
            Isa::Mips32 => write!(f, "mips32"),
            Isa::Mips64 => write!(f, "mips64"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    uuid: Uuid,
    pub name: String,
    /// Path of the file the image was loaded from
    pub binary_path: String,
    pub file_format: FileFormat,
    pub isa: Isa,
    pub byte_order: ByteOrder,
    /// Address the image prefers to be loaded at
    pub preferred_address: Addr,
    /// Difference between the load address and the preferred address
    pub rebase_delta: i64,
    pub aux_data: AuxDataContainer,
    entry_point: Option<Uuid>,
    sections: Vec<Section>,
    symbols: NodeVec<Symbol>,
    proxy_blocks: NodeVec<ProxyBlock>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_uuid(new_identifier(), name)
    }

    pub fn with_uuid(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            binary_path: String::new(),
            file_format: FileFormat::Undefined,
            isa: Isa::Undefined,
            byte_order: ByteOrder::Undefined,
            preferred_address: Addr(0),
            rebase_delta: 0,
            aux_data: AuxDataContainer::new(),
            entry_point: None,
            sections: Vec::new(),
            symbols: NodeVec::new(),
            proxy_blocks: NodeVec::new(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the image was loaded somewhere other than its preferred
    /// address.
    pub fn is_relocated(&self) -> bool {
        self.rebase_delta != 0
    }

    /// Identifier of the entry-point symbol, if any.
    pub fn entry_point(&self) -> Option<Uuid> {
        self.entry_point
    }

    pub fn entry_point_symbol(&self) -> Option<&Symbol> {
        self.entry_point.and_then(|id| self.symbol(&id))
    }

    // ----- sections -----

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, id: &Uuid) -> Option<&Section> {
        self.sections.iter().find(|s| s.uuid() == *id)
    }

    pub fn section_mut(&mut self, id: &Uuid) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.uuid() == *id)
    }

    pub fn sections_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Section> {
        self.sections.iter().filter(move |s| s.name == name)
    }

    /// Sections with a placed interval covering `addr`.
    pub fn sections_on(&self, addr: Addr) -> impl Iterator<Item = &Section> {
        self.sections
            .iter()
            .filter(move |s| s.byte_intervals_on(addr).next().is_some())
    }

    /// First section with a placed interval covering `addr`.
    pub fn section_containing(&self, addr: Addr) -> Option<&Section> {
        self.sections_on(addr).next()
    }

    /// Every byte interval, section by section.
    pub fn byte_intervals(&self) -> impl Iterator<Item = &ByteInterval> {
        self.sections.iter().flat_map(|s| s.byte_intervals().iter())
    }

    // ----- symbols -----

    /// Symbols in insertion order.
    pub fn symbols(&self) -> &[Symbol] {
        self.symbols.as_slice()
    }

    pub fn symbol(&self, id: &Uuid) -> Option<&Symbol> {
        self.symbols.get(id)
    }

    pub fn symbol_mut(&mut self, id: &Uuid) -> Option<&mut Symbol> {
        self.symbols.get_mut(id)
    }

    pub fn symbols_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Symbol> {
        self.symbols().iter().filter(move |s| s.name == name)
    }

    /// Symbols whose referent is the block `id`.
    pub fn symbols_by_referent(&self, id: Uuid) -> impl Iterator<Item = &Symbol> {
        self.symbols()
            .iter()
            .filter(move |s| s.referent() == Some(id))
    }

    // ----- proxy blocks -----

    pub fn proxy_blocks(&self) -> &[ProxyBlock] {
        self.proxy_blocks.as_slice()
    }

    pub fn proxy_block(&self, id: &Uuid) -> Option<&ProxyBlock> {
        self.proxy_blocks.get(id)
    }

    // ----- crate-internal mutation, driven by Ir -----

    pub(crate) fn set_entry_point(&mut self, symbol: Option<Uuid>) {
        self.entry_point = symbol;
    }

    pub(crate) fn insert_section(&mut self, section: Section) {
        self.sections.push(section);
    }

    pub(crate) fn remove_section(&mut self, id: &Uuid) -> Option<Section> {
        let position = self.sections.iter().position(|s| s.uuid() == *id)?;
        Some(self.sections.remove(position))
    }

    pub(crate) fn insert_symbol(&mut self, symbol: Symbol) {
        self.symbols.push(symbol);
    }

    pub(crate) fn remove_symbol(&mut self, id: &Uuid) -> Option<Symbol> {
        self.symbols.remove(id)
    }

    pub(crate) fn insert_proxy_block(&mut self, proxy: ProxyBlock) {
        self.proxy_blocks.push(proxy);
    }

    pub(crate) fn remove_proxy_block(&mut self, id: &Uuid) -> Option<ProxyBlock> {
        self.proxy_blocks.remove(id)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Module '{}' ({} {}, {} sections, {} symbols)",
            self.name,
            self.file_format,
            self.isa,
            self.sections.len(),
            self.symbols.len()
        )
    }
}
