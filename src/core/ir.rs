//! The IR root: modules, the shared CFG, and the identity registry.
//!
//! All structural mutation goes through [`Ir`]. Attaching a node moves it
//! (with any children it already carries) under its new owner and registers
//! every identifier in the subtree; removing one hands the detached subtree
//! back to the caller. Removal is refused while CFG edges or symbols still
//! point at a block being removed. Weak references (symbol referents, CFG
//! endpoints, symbolic-expression symbols) are identifiers resolved through
//! the registry on demand.

use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use tracing::debug;
use uuid::Uuid;

use crate::core::address::Addr;
use crate::core::aux_data::AuxDataContainer;
use crate::core::block::{ByteBlock, CodeBlock, DataBlock, ProxyBlock};
use crate::core::byte_interval::ByteInterval;
use crate::core::control_flow_graph::{Cfg, Edge, EdgeLabel};
use crate::core::id::{new_identifier, NodeKind, NodeRegistry};
use crate::core::module::Module;
use crate::core::section::Section;
use crate::core::symbol::{Symbol, SymbolPayload};
use crate::core::symbolic_expression::SymbolicExpression;
use crate::error::{IrError, Result};

/// Borrowed view of any node, as returned by [`Ir::get_node`].
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Ir(&'a Ir),
    Module(&'a Module),
    Section(&'a Section),
    ByteInterval(&'a ByteInterval),
    CodeBlock(&'a CodeBlock),
    DataBlock(&'a DataBlock),
    ProxyBlock(&'a ProxyBlock),
    Symbol(&'a Symbol),
}

impl NodeRef<'_> {
    pub fn uuid(&self) -> Uuid {
        match self {
            NodeRef::Ir(n) => n.uuid(),
            NodeRef::Module(n) => n.uuid(),
            NodeRef::Section(n) => n.uuid(),
            NodeRef::ByteInterval(n) => n.uuid(),
            NodeRef::CodeBlock(n) => n.uuid(),
            NodeRef::DataBlock(n) => n.uuid(),
            NodeRef::ProxyBlock(n) => n.uuid(),
            NodeRef::Symbol(n) => n.uuid(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeRef::Ir(_) => NodeKind::Ir,
            NodeRef::Module(_) => NodeKind::Module,
            NodeRef::Section(_) => NodeKind::Section,
            NodeRef::ByteInterval(_) => NodeKind::ByteInterval,
            NodeRef::CodeBlock(_) => NodeKind::CodeBlock,
            NodeRef::DataBlock(_) => NodeKind::DataBlock,
            NodeRef::ProxyBlock(_) => NodeKind::ProxyBlock,
            NodeRef::Symbol(_) => NodeKind::Symbol,
        }
    }
}

// (id, kind, owner) for one node of a subtree being attached or detached.
type Entry = (Uuid, NodeKind, Uuid);

fn interval_entries(interval: &ByteInterval, owner: Uuid, out: &mut Vec<Entry>) {
    out.push((interval.uuid(), NodeKind::ByteInterval, owner));
    for block in interval.blocks() {
        out.push((block.uuid(), block.kind(), interval.uuid()));
    }
}

fn section_entries(section: &Section, owner: Uuid, out: &mut Vec<Entry>) {
    out.push((section.uuid(), NodeKind::Section, owner));
    for interval in section.byte_intervals() {
        interval_entries(interval, section.uuid(), out);
    }
}

fn module_entries(module: &Module, owner: Uuid, out: &mut Vec<Entry>) {
    out.push((module.uuid(), NodeKind::Module, owner));
    for section in module.sections() {
        section_entries(section, module.uuid(), out);
    }
    for symbol in module.symbols() {
        out.push((symbol.uuid(), NodeKind::Symbol, module.uuid()));
    }
    for proxy in module.proxy_blocks() {
        out.push((proxy.uuid(), NodeKind::ProxyBlock, module.uuid()));
    }
}

fn placed_range(address: Addr, size: u64) -> Range<u64> {
    address.value()..address.value().saturating_add(size)
}

fn overlap_start(a: &Range<u64>, b: &Range<u64>) -> Option<u64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    (a.start < b.end && b.start < a.end).then(|| a.start.max(b.start))
}

/// Check an interval range belonging to `section_id` against the intervals
/// of every other section in `module`. Overlap is only tolerated when
/// neither section is loaded.
fn check_interval_placement(
    module: &Module,
    section_id: Uuid,
    loaded: bool,
    range: &Range<u64>,
    exclude: Option<Uuid>,
) -> Result<()> {
    for other in module.sections() {
        if other.uuid() == section_id || !(loaded || other.is_loaded()) {
            continue;
        }
        for interval in other.byte_intervals() {
            if Some(interval.uuid()) == exclude {
                continue;
            }
            let Some(existing) = interval.address_range() else {
                continue;
            };
            if let Some(address) = overlap_start(range, &existing) {
                return Err(IrError::SectionOverlap {
                    first: section_id,
                    second: other.uuid(),
                    address,
                });
            }
        }
    }
    Ok(())
}

fn check_section_placement(module: &Module, section: &Section) -> Result<()> {
    for interval in section.byte_intervals() {
        if let Some(range) = interval.address_range() {
            check_interval_placement(module, section.uuid(), section.is_loaded(), &range, None)?;
        }
    }
    Ok(())
}

fn check_module_overlaps(module: &Module) -> Result<()> {
    for section in module.sections() {
        check_section_placement(module, section)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ir {
    uuid: Uuid,
    modules: Vec<Module>,
    cfg: Cfg,
    pub aux_data: AuxDataContainer,
    registry: NodeRegistry,
}

impl Default for Ir {
    fn default() -> Self {
        Self::new()
    }
}

impl Ir {
    pub fn new() -> Self {
        Self::with_uuid(new_identifier())
    }

    pub fn with_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            modules: Vec::new(),
            cfg: Cfg::new(),
            aux_data: AuxDataContainer::new(),
            registry: NodeRegistry::with_root(uuid),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Number of live nodes, the root included.
    pub fn node_count(&self) -> usize {
        self.registry.len()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.registry.contains(id)
    }

    pub fn kind_of(&self, id: &Uuid) -> Option<NodeKind> {
        self.registry.kind_of(id)
    }

    /// Owning container of `id`; `None` for the root and unknown ids.
    pub fn parent_of(&self, id: &Uuid) -> Option<Uuid> {
        self.registry.parent_of(id)
    }

    /// Resolve any identifier to the node it names.
    pub fn get_node(&self, id: &Uuid) -> Option<NodeRef<'_>> {
        match self.registry.kind_of(id)? {
            NodeKind::Ir => Some(NodeRef::Ir(self)),
            NodeKind::Module => self.module(id).map(NodeRef::Module),
            NodeKind::Section => self.section(id).map(NodeRef::Section),
            NodeKind::ByteInterval => self.byte_interval(id).map(NodeRef::ByteInterval),
            NodeKind::CodeBlock => self.code_block(id).map(NodeRef::CodeBlock),
            NodeKind::DataBlock => self.data_block(id).map(NodeRef::DataBlock),
            NodeKind::ProxyBlock => self.proxy_block(id).map(NodeRef::ProxyBlock),
            NodeKind::Symbol => self.symbol(id).map(NodeRef::Symbol),
        }
    }

    // ----- typed lookups -----

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn module(&self, id: &Uuid) -> Option<&Module> {
        self.modules.iter().find(|m| m.uuid() == *id)
    }

    pub fn module_mut(&mut self, id: &Uuid) -> Option<&mut Module> {
        self.modules.iter_mut().find(|m| m.uuid() == *id)
    }

    pub fn modules_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Module> {
        self.modules.iter().filter(move |m| m.name == name)
    }

    pub fn section(&self, id: &Uuid) -> Option<&Section> {
        let owner = self.registry.parent_of(id)?;
        self.module(&owner)?.section(id)
    }

    pub fn section_mut(&mut self, id: &Uuid) -> Option<&mut Section> {
        let owner = self.registry.parent_of(id)?;
        self.module_mut(&owner)?.section_mut(id)
    }

    pub fn byte_interval(&self, id: &Uuid) -> Option<&ByteInterval> {
        let owner = self.registry.parent_of(id)?;
        self.section(&owner)?.byte_interval(id)
    }

    pub fn byte_interval_mut(&mut self, id: &Uuid) -> Option<&mut ByteInterval> {
        let owner = self.registry.parent_of(id)?;
        self.section_mut(&owner)?.byte_interval_mut(id)
    }

    /// A code or data block.
    pub fn block(&self, id: &Uuid) -> Option<&ByteBlock> {
        let owner = self.registry.parent_of(id)?;
        self.byte_interval(&owner)?.block(id)
    }

    pub fn code_block(&self, id: &Uuid) -> Option<&CodeBlock> {
        self.block(id).and_then(ByteBlock::as_code)
    }

    pub fn code_block_mut(&mut self, id: &Uuid) -> Option<&mut CodeBlock> {
        let owner = self.registry.parent_of(id)?;
        self.byte_interval_mut(&owner)?.code_block_mut(id)
    }

    pub fn data_block(&self, id: &Uuid) -> Option<&DataBlock> {
        self.block(id).and_then(ByteBlock::as_data)
    }

    pub fn proxy_block(&self, id: &Uuid) -> Option<&ProxyBlock> {
        let owner = self.registry.parent_of(id)?;
        self.module(&owner)?.proxy_block(id)
    }

    pub fn symbol(&self, id: &Uuid) -> Option<&Symbol> {
        let owner = self.registry.parent_of(id)?;
        self.module(&owner)?.symbol(id)
    }

    pub fn symbol_mut(&mut self, id: &Uuid) -> Option<&mut Symbol> {
        let owner = self.registry.parent_of(id)?;
        self.module_mut(&owner)?.symbol_mut(id)
    }

    /// Every symbol in every module.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.modules.iter().flat_map(|m| m.symbols().iter())
    }

    // ----- address queries -----

    /// Address of a code or data block, when its interval is placed.
    pub fn block_address(&self, id: &Uuid) -> Option<Addr> {
        let owner = self.registry.parent_of(id)?;
        let interval = self.byte_interval(&owner)?;
        let block = interval.block(id)?;
        interval.address()?.checked_add(block.offset())
    }

    /// Address a symbol stands for, following its referent if it has one.
    /// Proxy referents and unplaced blocks have no address.
    pub fn symbol_address(&self, id: &Uuid) -> Option<Addr> {
        let symbol = self.symbol(id)?;
        match symbol.payload() {
            SymbolPayload::None => None,
            SymbolPayload::Address(addr) => Some(addr),
            SymbolPayload::Referent(block) => {
                let start = self.block_address(&block)?;
                if symbol.at_end {
                    start.checked_add(self.block(&block)?.size())
                } else {
                    Some(start)
                }
            }
        }
    }

    pub fn symbols_at_address(&self, addr: Addr) -> Vec<&Symbol> {
        self.symbols()
            .filter(|s| self.symbol_address(&s.uuid()) == Some(addr))
            .collect()
    }

    /// Code and data blocks covering `addr`.
    pub fn blocks_on(&self, addr: Addr) -> Vec<&ByteBlock> {
        let mut found = Vec::new();
        for module in &self.modules {
            for interval in module.byte_intervals() {
                let Some(base) = interval.address() else {
                    continue;
                };
                if let Some(offset) = addr.distance_from(base) {
                    if offset < interval.size() {
                        found.extend(interval.blocks_overlapping(offset, offset + 1));
                    }
                }
            }
        }
        found
    }

    /// Resolve the symbols an expression names; dangling ones map to `None`.
    pub fn expression_symbols(&self, expr: &SymbolicExpression) -> Vec<Option<&Symbol>> {
        expr.symbols().iter().map(|id| self.symbol(id)).collect()
    }

    /// `(interval, offset, symbol)` for every symbolic expression naming a
    /// symbol that is not in this IR.
    pub fn dangling_symbolic_references(&self) -> Vec<(Uuid, u64, Uuid)> {
        let mut dangling = Vec::new();
        for module in &self.modules {
            for interval in module.byte_intervals() {
                for (offset, expr) in interval.symbolic_expressions() {
                    for symbol in expr.symbols() {
                        if self.registry.kind_of(&symbol) != Some(NodeKind::Symbol) {
                            dangling.push((interval.uuid(), offset, symbol));
                        }
                    }
                }
            }
        }
        dangling
    }

    // ----- registry bookkeeping -----

    fn register_subtree(&mut self, entries: &[Entry]) -> Result<()> {
        let mut seen = HashSet::new();
        for (id, _, owner) in entries {
            if !seen.insert(*id) {
                return Err(IrError::DuplicateIdentifier(*id));
            }
            self.registry.check_vacant(*id, Some(*owner))?;
        }
        for &(id, kind, owner) in entries {
            self.registry.insert(id, kind, Some(owner))?;
            if kind.is_cfg_node() {
                self.cfg.add_node(id);
            }
        }
        Ok(())
    }

    fn unregister_subtree(&mut self, entries: &[Entry]) -> Result<()> {
        for (id, kind, _) in entries {
            if kind.is_cfg_node() {
                self.cfg.remove_node(id)?;
            }
            self.registry.remove(id);
        }
        Ok(())
    }

    fn referring_symbol(&self, block: &Uuid, exempt: &HashSet<Uuid>) -> Option<&Symbol> {
        self.symbols()
            .find(|s| s.referent() == Some(*block) && !exempt.contains(&s.uuid()))
    }

    /// Fail if any block in `entries` still has CFG edges or is the
    /// referent of a symbol outside `exempt`.
    fn check_removable(&self, entries: &[Entry], exempt: &HashSet<Uuid>) -> Result<()> {
        for (id, kind, _) in entries {
            if !kind.is_block() {
                continue;
            }
            let edges = self.cfg.degree(id);
            if edges > 0 {
                return Err(IrError::NodeHasEdges { id: *id, edges });
            }
            if let Some(symbol) = self.referring_symbol(id, exempt) {
                return Err(IrError::StillReferenced {
                    id: *id,
                    referrer: format!("symbol '{}' ({})", symbol.name, symbol.uuid()),
                });
            }
        }
        Ok(())
    }

    /// A symbol referent must be a code, data or proxy block, either live
    /// or about to be attached in `pending`.
    fn check_referent(&self, block: Uuid, pending: &[Entry]) -> Result<()> {
        let kind = pending
            .iter()
            .find(|(id, _, _)| *id == block)
            .map(|(_, kind, _)| *kind)
            .or_else(|| self.registry.kind_of(&block))
            .ok_or(IrError::UnknownNode(block))?;
        if !kind.is_block() {
            return Err(IrError::WrongNodeKind {
                id: block,
                expected: NodeKind::CodeBlock,
                found: kind,
            });
        }
        Ok(())
    }

    fn owner_of(&self, id: &Uuid) -> Result<Uuid> {
        self.registry.parent_of(id).ok_or(IrError::UnknownNode(*id))
    }

    fn expect_byte_block(&self, id: &Uuid) -> Result<NodeKind> {
        let kind = self.registry.kind_of(id).ok_or(IrError::UnknownNode(*id))?;
        match kind {
            NodeKind::CodeBlock | NodeKind::DataBlock => Ok(kind),
            found => Err(IrError::WrongNodeKind {
                id: *id,
                expected: NodeKind::CodeBlock,
                found,
            }),
        }
    }

    // ----- modules -----

    /// Attach a module with everything it already owns.
    pub fn add_module(&mut self, module: Module) -> Result<Uuid> {
        let mut entries = Vec::new();
        module_entries(&module, self.uuid, &mut entries);
        check_module_overlaps(&module)?;
        if let Some(entry) = module.entry_point() {
            if module.symbol(&entry).is_none() {
                return Err(IrError::UnknownNode(entry));
            }
        }
        for symbol in module.symbols() {
            if let Some(block) = symbol.referent() {
                self.check_referent(block, &entries)?;
            }
        }
        self.register_subtree(&entries)?;

        let id = module.uuid();
        debug!(module = %id, name = %module.name, nodes = entries.len(), "attached module");
        self.modules.push(module);
        Ok(id)
    }

    /// Detach a module and everything it owns.
    pub fn remove_module(&mut self, id: &Uuid) -> Result<Module> {
        self.registry.expect_kind(*id, NodeKind::Module)?;
        let module = self.module(id).ok_or(IrError::UnknownNode(*id))?;
        let mut entries = Vec::new();
        module_entries(module, self.uuid, &mut entries);
        let exempt: HashSet<Uuid> = module.symbols().iter().map(Symbol::uuid).collect();
        self.check_removable(&entries, &exempt)?;
        self.unregister_subtree(&entries)?;

        let position = self
            .modules
            .iter()
            .position(|m| m.uuid() == *id)
            .ok_or(IrError::UnknownNode(*id))?;
        debug!(module = %id, "detached module");
        Ok(self.modules.remove(position))
    }

    // ----- sections -----

    pub fn add_section(&mut self, module_id: Uuid, section: Section) -> Result<Uuid> {
        self.registry.expect_kind(module_id, NodeKind::Module)?;
        let module = self.module(&module_id).ok_or(IrError::UnknownNode(module_id))?;
        check_section_placement(module, &section)?;
        let mut entries = Vec::new();
        section_entries(&section, module_id, &mut entries);
        self.register_subtree(&entries)?;

        let id = section.uuid();
        debug!(section = %id, name = %section.name, module = %module_id, "attached section");
        self.module_mut(&module_id)
            .ok_or(IrError::UnknownNode(module_id))?
            .insert_section(section);
        Ok(id)
    }

    pub fn remove_section(&mut self, id: &Uuid) -> Result<Section> {
        self.registry.expect_kind(*id, NodeKind::Section)?;
        let module_id = self.owner_of(id)?;
        let section = self.section(id).ok_or(IrError::UnknownNode(*id))?;
        let mut entries = Vec::new();
        section_entries(section, module_id, &mut entries);
        self.check_removable(&entries, &HashSet::new())?;
        self.unregister_subtree(&entries)?;

        debug!(section = %id, "detached section");
        self.module_mut(&module_id)
            .and_then(|m| m.remove_section(id))
            .ok_or(IrError::UnknownNode(*id))
    }

    /// Re-parent a section under another module.
    pub fn move_section(&mut self, id: &Uuid, new_module: Uuid) -> Result<()> {
        self.registry.expect_kind(*id, NodeKind::Section)?;
        self.registry.expect_kind(new_module, NodeKind::Module)?;
        let old_module = self.owner_of(id)?;
        if old_module == new_module {
            return Ok(());
        }
        let section = self.section(id).ok_or(IrError::UnknownNode(*id))?;
        let target = self.module(&new_module).ok_or(IrError::UnknownNode(new_module))?;
        check_section_placement(target, section)?;

        let section = self
            .module_mut(&old_module)
            .and_then(|m| m.remove_section(id))
            .ok_or(IrError::UnknownNode(*id))?;
        self.registry.reparent(*id, new_module)?;
        self.module_mut(&new_module)
            .ok_or(IrError::UnknownNode(new_module))?
            .insert_section(section);
        debug!(section = %id, from = %old_module, to = %new_module, "moved section");
        Ok(())
    }

    // ----- byte intervals -----

    pub fn add_byte_interval(&mut self, section_id: Uuid, interval: ByteInterval) -> Result<Uuid> {
        self.registry.expect_kind(section_id, NodeKind::Section)?;
        let module_id = self.owner_of(&section_id)?;
        let module = self.module(&module_id).ok_or(IrError::UnknownNode(module_id))?;
        let section = module
            .section(&section_id)
            .ok_or(IrError::UnknownNode(section_id))?;
        if let Some(range) = interval.address_range() {
            check_interval_placement(module, section_id, section.is_loaded(), &range, None)?;
        }
        let mut entries = Vec::new();
        interval_entries(&interval, section_id, &mut entries);
        self.register_subtree(&entries)?;

        let id = interval.uuid();
        debug!(interval = %id, section = %section_id, size = interval.size(), "attached byte interval");
        self.section_mut(&section_id)
            .ok_or(IrError::UnknownNode(section_id))?
            .insert_byte_interval(interval);
        Ok(id)
    }

    pub fn remove_byte_interval(&mut self, id: &Uuid) -> Result<ByteInterval> {
        self.registry.expect_kind(*id, NodeKind::ByteInterval)?;
        let section_id = self.owner_of(id)?;
        let interval = self.byte_interval(id).ok_or(IrError::UnknownNode(*id))?;
        let mut entries = Vec::new();
        interval_entries(interval, section_id, &mut entries);
        self.check_removable(&entries, &HashSet::new())?;
        self.unregister_subtree(&entries)?;

        debug!(interval = %id, "detached byte interval");
        self.section_mut(&section_id)
            .and_then(|s| s.remove_byte_interval(id))
            .ok_or(IrError::UnknownNode(*id))
    }

    /// Re-parent a byte interval under another section.
    pub fn move_byte_interval(&mut self, id: &Uuid, new_section: Uuid) -> Result<()> {
        self.registry.expect_kind(*id, NodeKind::ByteInterval)?;
        self.registry.expect_kind(new_section, NodeKind::Section)?;
        let old_section = self.owner_of(id)?;
        if old_section == new_section {
            return Ok(());
        }
        let range = self
            .byte_interval(id)
            .ok_or(IrError::UnknownNode(*id))?
            .address_range();
        if let Some(range) = range {
            let module_id = self.owner_of(&new_section)?;
            let module = self.module(&module_id).ok_or(IrError::UnknownNode(module_id))?;
            let loaded = module
                .section(&new_section)
                .map(Section::is_loaded)
                .unwrap_or(false);
            check_interval_placement(module, new_section, loaded, &range, Some(*id))?;
        }

        let interval = self
            .section_mut(&old_section)
            .and_then(|s| s.remove_byte_interval(id))
            .ok_or(IrError::UnknownNode(*id))?;
        self.registry.reparent(*id, new_section)?;
        self.section_mut(&new_section)
            .ok_or(IrError::UnknownNode(new_section))?
            .insert_byte_interval(interval);
        debug!(interval = %id, from = %old_section, to = %new_section, "moved byte interval");
        Ok(())
    }

    /// Place, move or unplace a byte interval.
    pub fn set_byte_interval_address(&mut self, id: &Uuid, address: Option<Addr>) -> Result<()> {
        self.registry.expect_kind(*id, NodeKind::ByteInterval)?;
        let section_id = self.owner_of(id)?;
        if let Some(addr) = address {
            let size = self
                .byte_interval(id)
                .ok_or(IrError::UnknownNode(*id))?
                .size();
            let module_id = self.owner_of(&section_id)?;
            let module = self.module(&module_id).ok_or(IrError::UnknownNode(module_id))?;
            let loaded = module
                .section(&section_id)
                .map(Section::is_loaded)
                .unwrap_or(false);
            check_interval_placement(module, section_id, loaded, &placed_range(addr, size), Some(*id))?;
        }
        self.byte_interval_mut(id)
            .ok_or(IrError::UnknownNode(*id))?
            .set_address(address);
        Ok(())
    }

    // ----- blocks -----

    /// Attach a code or data block at `offset` within an interval.
    pub fn add_block(&mut self, interval_id: Uuid, offset: u64, block: impl Into<ByteBlock>) -> Result<Uuid> {
        let block = block.into();
        let id = block.uuid();
        self.registry.expect_kind(interval_id, NodeKind::ByteInterval)?;
        self.registry.check_vacant(id, Some(interval_id))?;
        self.byte_interval(&interval_id)
            .ok_or(IrError::UnknownNode(interval_id))?
            .check_block_fits(offset, block.size())?;

        let kind = block.kind();
        self.byte_interval_mut(&interval_id)
            .ok_or(IrError::UnknownNode(interval_id))?
            .insert_block(offset, block)?;
        self.registry.insert(id, kind, Some(interval_id))?;
        if kind.is_cfg_node() {
            self.cfg.add_node(id);
        }
        debug!(block = %id, %kind, interval = %interval_id, offset, "attached block");
        Ok(id)
    }

    pub fn add_code_block(&mut self, interval_id: Uuid, offset: u64, block: CodeBlock) -> Result<Uuid> {
        self.add_block(interval_id, offset, block)
    }

    pub fn add_data_block(&mut self, interval_id: Uuid, offset: u64, block: DataBlock) -> Result<Uuid> {
        self.add_block(interval_id, offset, block)
    }

    /// Detach a code or data block. Fails while edges or symbols refer to it.
    pub fn remove_block(&mut self, id: &Uuid) -> Result<ByteBlock> {
        let kind = self.expect_byte_block(id)?;
        let interval_id = self.owner_of(id)?;
        let entries = [(*id, kind, interval_id)];
        self.check_removable(&entries, &HashSet::new())?;
        self.unregister_subtree(&entries)?;

        debug!(block = %id, "detached block");
        self.byte_interval_mut(&interval_id)
            .and_then(|bi| bi.remove_block(id))
            .ok_or(IrError::UnknownNode(*id))
    }

    /// Move a block to `offset` in `new_interval`, which may be its current
    /// interval. CFG edges and symbol referents follow the block.
    pub fn move_block(&mut self, id: &Uuid, new_interval: Uuid, offset: u64) -> Result<()> {
        self.expect_byte_block(id)?;
        self.registry.expect_kind(new_interval, NodeKind::ByteInterval)?;
        let old_interval = self.owner_of(id)?;
        let size = self.block(id).ok_or(IrError::UnknownNode(*id))?.size();
        self.byte_interval(&new_interval)
            .ok_or(IrError::UnknownNode(new_interval))?
            .check_block_fits(offset, size)?;

        let block = self
            .byte_interval_mut(&old_interval)
            .and_then(|bi| bi.remove_block(id))
            .ok_or(IrError::UnknownNode(*id))?;
        self.registry.reparent(*id, new_interval)?;
        self.byte_interval_mut(&new_interval)
            .ok_or(IrError::UnknownNode(new_interval))?
            .insert_block(offset, block)?;
        debug!(block = %id, to = %new_interval, offset, "moved block");
        Ok(())
    }

    pub fn add_proxy_block(&mut self, module_id: Uuid, proxy: ProxyBlock) -> Result<Uuid> {
        self.registry.expect_kind(module_id, NodeKind::Module)?;
        let id = proxy.uuid();
        self.registry.insert(id, NodeKind::ProxyBlock, Some(module_id))?;
        self.cfg.add_node(id);
        self.module_mut(&module_id)
            .ok_or(IrError::UnknownNode(module_id))?
            .insert_proxy_block(proxy);
        debug!(proxy = %id, module = %module_id, "attached proxy block");
        Ok(id)
    }

    pub fn remove_proxy_block(&mut self, id: &Uuid) -> Result<ProxyBlock> {
        self.registry.expect_kind(*id, NodeKind::ProxyBlock)?;
        let module_id = self.owner_of(id)?;
        let entries = [(*id, NodeKind::ProxyBlock, module_id)];
        self.check_removable(&entries, &HashSet::new())?;
        self.unregister_subtree(&entries)?;

        debug!(proxy = %id, "detached proxy block");
        self.module_mut(&module_id)
            .and_then(|m| m.remove_proxy_block(id))
            .ok_or(IrError::UnknownNode(*id))
    }

    // ----- symbols -----

    pub fn add_symbol(&mut self, module_id: Uuid, symbol: Symbol) -> Result<Uuid> {
        self.registry.expect_kind(module_id, NodeKind::Module)?;
        let id = symbol.uuid();
        self.registry.check_vacant(id, Some(module_id))?;
        if let Some(block) = symbol.referent() {
            self.check_referent(block, &[])?;
        }
        self.registry.insert(id, NodeKind::Symbol, Some(module_id))?;
        debug!(symbol = %id, name = %symbol.name, module = %module_id, "attached symbol");
        self.module_mut(&module_id)
            .ok_or(IrError::UnknownNode(module_id))?
            .insert_symbol(symbol);
        Ok(id)
    }

    /// Detach a symbol. Fails while it is its module's entry point.
    /// Symbolic expressions naming it are left dangling.
    pub fn remove_symbol(&mut self, id: &Uuid) -> Result<Symbol> {
        self.registry.expect_kind(*id, NodeKind::Symbol)?;
        let module_id = self.owner_of(id)?;
        let module = self.module(&module_id).ok_or(IrError::UnknownNode(module_id))?;
        if module.entry_point() == Some(*id) {
            return Err(IrError::StillReferenced {
                id: *id,
                referrer: format!("entry point of module '{}'", module.name),
            });
        }
        self.registry.remove(id);
        debug!(symbol = %id, "detached symbol");
        self.module_mut(&module_id)
            .and_then(|m| m.remove_symbol(id))
            .ok_or(IrError::UnknownNode(*id))
    }

    /// Replace a symbol's payload, checking that a referent names a block.
    pub fn set_symbol_payload(&mut self, id: &Uuid, payload: SymbolPayload) -> Result<()> {
        self.registry.expect_kind(*id, NodeKind::Symbol)?;
        if let SymbolPayload::Referent(block) = payload {
            self.check_referent(block, &[])?;
        }
        self.symbol_mut(id)
            .ok_or(IrError::UnknownNode(*id))?
            .set_payload(payload);
        Ok(())
    }

    pub fn set_symbol_referent(&mut self, id: &Uuid, block: Uuid) -> Result<()> {
        self.set_symbol_payload(id, SymbolPayload::Referent(block))
    }

    /// Set or clear a module's entry point. The symbol must belong to the
    /// module.
    pub fn set_entry_point(&mut self, module_id: Uuid, symbol: Option<Uuid>) -> Result<()> {
        self.registry.expect_kind(module_id, NodeKind::Module)?;
        if let Some(symbol_id) = symbol {
            let entry = self.registry.expect_kind(symbol_id, NodeKind::Symbol)?;
            if entry.parent != Some(module_id) {
                return Err(IrError::ForeignNode {
                    id: symbol_id,
                    container: module_id,
                });
            }
        }
        self.module_mut(&module_id)
            .ok_or(IrError::UnknownNode(module_id))?
            .set_entry_point(symbol);
        Ok(())
    }

    // ----- CFG -----

    /// Add an edge between two code or proxy blocks. Returns `false` if
    /// the identical edge already exists.
    pub fn add_edge(&mut self, source: Uuid, target: Uuid, label: Option<EdgeLabel>) -> Result<bool> {
        for id in [source, target] {
            let kind = self.registry.kind_of(&id).ok_or(IrError::UnknownNode(id))?;
            if !kind.is_cfg_node() {
                return Err(IrError::WrongNodeKind {
                    id,
                    expected: NodeKind::CodeBlock,
                    found: kind,
                });
            }
        }
        let added = self.cfg.add_edge(source, target, label)?;
        debug!(%source, %target, added, "added CFG edge");
        Ok(added)
    }

    pub fn remove_edge(&mut self, edge: &Edge) -> bool {
        self.cfg.remove_edge(edge)
    }

    /// Drop every edge touching `id`, returning how many were removed.
    pub fn remove_edges_of(&mut self, id: &Uuid) -> usize {
        self.cfg.remove_edges_of(id)
    }

    // ----- validation -----

    /// Check the invariants that in-place edits (section flags, interval
    /// sizes) can break behind the IR's back: loaded sections must not
    /// overlap, entry points must be symbols of their module, and symbol
    /// referents must name live blocks.
    pub fn validate(&self) -> Result<()> {
        for module in &self.modules {
            check_module_overlaps(module)?;
            if let Some(entry) = module.entry_point() {
                if module.symbol(&entry).is_none() {
                    return Err(IrError::ForeignNode {
                        id: entry,
                        container: module.uuid(),
                    });
                }
            }
            for symbol in module.symbols() {
                if let Some(block) = symbol.referent() {
                    self.check_referent(block, &[])?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Ir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ir({}, {} module(s), {})",
            self.uuid,
            self.modules.len(),
            self.cfg
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::control_flow_graph::EdgeType;
    use crate::core::section::SectionFlags;

    struct Fixture {
        ir: Ir,
        module: Uuid,
        section: Uuid,
        interval: Uuid,
        b0: Uuid,
        b1: Uuid,
    }

    fn fixture() -> Fixture {
        let mut ir = Ir::new();
        let module = ir.add_module(Module::new("test")).unwrap();
        let section = ir
            .add_section(
                module,
                Section::new(".text", SectionFlags::EXECUTABLE | SectionFlags::LOADED),
            )
            .unwrap();
        let interval = ir
            .add_byte_interval(section, ByteInterval::new(16).with_address(Addr(0x1000)))
            .unwrap();
        let b0 = ir.add_code_block(interval, 0, CodeBlock::new(4)).unwrap();
        let b1 = ir.add_code_block(interval, 4, CodeBlock::new(4)).unwrap();
        Fixture {
            ir,
            module,
            section,
            interval,
            b0,
            b1,
        }
    }

    #[test]
    fn test_ir_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Ir>();
    }

    #[test]
    fn test_registry_tracks_tree() {
        let f = fixture();
        assert_eq!(f.ir.node_count(), 6);
        assert_eq!(f.ir.parent_of(&f.b0), Some(f.interval));
        assert_eq!(f.ir.parent_of(&f.interval), Some(f.section));
        assert_eq!(f.ir.parent_of(&f.module), Some(f.ir.uuid()));
        assert_eq!(f.ir.parent_of(&f.ir.uuid()), None);
        assert!(matches!(f.ir.get_node(&f.b1), Some(NodeRef::CodeBlock(_))));
        assert_eq!(f.ir.get_node(&f.section).map(|n| n.kind()), Some(NodeKind::Section));
        assert!(f.ir.cfg().contains_node(&f.b0));
        assert_eq!(f.ir.block_address(&f.b1), Some(Addr(0x1004)));
    }

    #[test]
    fn test_attach_rejects_second_owner() {
        let mut f = fixture();
        let other = f.ir.add_module(Module::new("other")).unwrap();
        let section = Section::new(".text", SectionFlags::empty());
        let copy = section.clone();
        f.ir.add_section(f.module, section).unwrap();
        assert!(matches!(
            f.ir.add_section(other, copy.clone()),
            Err(IrError::AlreadyOwned { .. })
        ));
        assert!(matches!(
            f.ir.add_section(f.module, copy),
            Err(IrError::DuplicateIdentifier(_))
        ));
    }

    #[test]
    fn test_block_bounds_and_kind_checks() {
        let mut f = fixture();
        assert!(matches!(
            f.ir.add_code_block(f.interval, 14, CodeBlock::new(4)),
            Err(IrError::BlockOutOfBounds { .. })
        ));
        assert!(matches!(
            f.ir.add_code_block(f.section, 0, CodeBlock::new(4)),
            Err(IrError::WrongNodeKind { .. })
        ));
        let data = f.ir.add_data_block(f.interval, 8, DataBlock::new(8)).unwrap();
        assert!(!f.ir.cfg().contains_node(&data));
        assert!(matches!(
            f.ir.add_edge(f.b0, data, None),
            Err(IrError::WrongNodeKind { .. })
        ));
    }

    #[test]
    fn test_remove_block_requires_detached_edges_and_symbols() {
        let mut f = fixture();
        let label = Some(EdgeLabel::unconditional(EdgeType::Fallthrough));
        f.ir.add_edge(f.b0, f.b1, label).unwrap();
        let sym = f.ir.add_symbol(f.module, Symbol::with_referent("main", f.b0)).unwrap();

        assert!(matches!(
            f.ir.remove_block(&f.b0),
            Err(IrError::NodeHasEdges { edges: 1, .. })
        ));
        f.ir.remove_edge(&Edge::new(f.b0, f.b1, label));
        assert!(matches!(
            f.ir.remove_block(&f.b0),
            Err(IrError::StillReferenced { .. })
        ));
        f.ir.remove_symbol(&sym).unwrap();

        let removed = f.ir.remove_block(&f.b0).unwrap();
        assert_eq!(removed.uuid(), f.b0);
        assert!(!f.ir.contains(&f.b0));
        assert!(!f.ir.cfg().contains_node(&f.b0));
    }

    #[test]
    fn test_remove_interval_is_atomic() {
        let mut f = fixture();
        f.ir.add_edge(f.b1, f.b1, None).unwrap();
        let before = f.ir.clone();
        assert!(f.ir.remove_byte_interval(&f.interval).is_err());
        assert_eq!(f.ir, before);

        f.ir.remove_edges_of(&f.b1);
        let interval = f.ir.remove_byte_interval(&f.interval).unwrap();
        assert_eq!(interval.blocks().len(), 2);
        assert!(!f.ir.contains(&f.b0));
        assert_eq!(f.ir.node_count(), 3);
    }

    #[test]
    fn test_reattach_detached_subtree() {
        let mut f = fixture();
        let section = f.ir.remove_section(&f.section).unwrap();
        let other = f.ir.add_module(Module::new("other")).unwrap();
        f.ir.add_section(other, section).unwrap();
        assert_eq!(f.ir.parent_of(&f.section), Some(other));
        assert_eq!(f.ir.parent_of(&f.b0), Some(f.interval));
        assert!(f.ir.cfg().contains_node(&f.b1));
    }

    #[test]
    fn test_move_block_keeps_edges() {
        let mut f = fixture();
        f.ir.add_edge(f.b0, f.b1, None).unwrap();
        let second = f
            .ir
            .add_byte_interval(f.section, ByteInterval::new(8).with_address(Addr(0x2000)))
            .unwrap();
        f.ir.move_block(&f.b1, second, 4).unwrap();
        assert_eq!(f.ir.parent_of(&f.b1), Some(second));
        assert_eq!(f.ir.block_address(&f.b1), Some(Addr(0x2004)));
        assert_eq!(f.ir.cfg().successors(&f.b0), vec![f.b1]);
        assert_eq!(f.ir.byte_interval(&f.interval).unwrap().blocks().len(), 1);

        assert!(f.ir.move_block(&f.b1, second, 6).is_err());
        f.ir.move_block(&f.b1, second, 0).unwrap();
        assert_eq!(f.ir.block(&f.b1).map(ByteBlock::offset), Some(0));
    }

    #[test]
    fn test_move_section_between_modules() {
        let mut f = fixture();
        let other = f.ir.add_module(Module::new("other")).unwrap();
        f.ir.move_section(&f.section, other).unwrap();
        assert_eq!(f.ir.parent_of(&f.section), Some(other));
        assert!(f.ir.module(&f.module).unwrap().sections().is_empty());
        assert_eq!(f.ir.module(&other).unwrap().sections().len(), 1);
        assert_eq!(f.ir.block_address(&f.b0), Some(Addr(0x1000)));
    }

    #[test]
    fn test_loaded_sections_must_not_overlap() {
        let mut f = fixture();
        let data = f
            .ir
            .add_section(f.module, Section::new(".data", SectionFlags::LOADED))
            .unwrap();
        let err = f
            .ir
            .add_byte_interval(data, ByteInterval::new(8).with_address(Addr(0x100c)))
            .unwrap_err();
        assert_eq!(
            err,
            IrError::SectionOverlap {
                first: data,
                second: f.section,
                address: 0x100c
            }
        );

        let interval = f.ir.add_byte_interval(data, ByteInterval::new(8)).unwrap();
        assert!(f
            .ir
            .set_byte_interval_address(&interval, Some(Addr(0x0ffc)))
            .is_err());
        f.ir.set_byte_interval_address(&interval, Some(Addr(0x1010)))
            .unwrap();
        assert!(f.ir.validate().is_ok());
    }

    #[test]
    fn test_unloaded_sections_may_overlap() {
        let mut f = fixture();
        f.ir.section_mut(&f.section).unwrap().flags = SectionFlags::EXECUTABLE;
        let overlay = f
            .ir
            .add_section(f.module, Section::new(".overlay", SectionFlags::empty()))
            .unwrap();
        f.ir.add_byte_interval(overlay, ByteInterval::new(16).with_address(Addr(0x1000)))
            .unwrap();
        assert!(f.ir.validate().is_ok());

        // Flag edits bypass the attach checks; validate catches them.
        f.ir.section_mut(&overlay).unwrap().flags = SectionFlags::LOADED;
        assert!(matches!(f.ir.validate(), Err(IrError::SectionOverlap { .. })));
    }

    #[test]
    fn test_symbol_addresses() {
        let mut f = fixture();
        let main = f.ir.add_symbol(f.module, Symbol::with_referent("main", f.b1)).unwrap();
        let mut end = Symbol::with_referent("main_end", f.b1);
        end.at_end = true;
        let end = f.ir.add_symbol(f.module, end).unwrap();
        let abs = f
            .ir
            .add_symbol(f.module, Symbol::with_address("abs", Addr(0x1004)))
            .unwrap();

        assert_eq!(f.ir.symbol_address(&main), Some(Addr(0x1004)));
        assert_eq!(f.ir.symbol_address(&end), Some(Addr(0x1008)));
        let at: Vec<Uuid> = f
            .ir
            .symbols_at_address(Addr(0x1004))
            .iter()
            .map(|s| s.uuid())
            .collect();
        assert_eq!(at, vec![main, abs]);

        assert!(matches!(
            f.ir.add_symbol(f.module, Symbol::with_referent("bad", f.section)),
            Err(IrError::WrongNodeKind { .. })
        ));
        assert!(matches!(
            f.ir.set_symbol_referent(&abs, new_identifier()),
            Err(IrError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_entry_point_rules() {
        let mut f = fixture();
        let other = f.ir.add_module(Module::new("other")).unwrap();
        let foreign = f.ir.add_symbol(other, Symbol::new("x")).unwrap();
        assert!(matches!(
            f.ir.set_entry_point(f.module, Some(foreign)),
            Err(IrError::ForeignNode { .. })
        ));

        let start = f.ir.add_symbol(f.module, Symbol::with_referent("_start", f.b0)).unwrap();
        f.ir.set_entry_point(f.module, Some(start)).unwrap();
        assert!(matches!(
            f.ir.remove_symbol(&start),
            Err(IrError::StillReferenced { .. })
        ));
        f.ir.set_entry_point(f.module, None).unwrap();
        assert!(f.ir.remove_symbol(&start).is_ok());
    }

    #[test]
    fn test_proxy_blocks_join_cfg() {
        let mut f = fixture();
        let proxy = f.ir.add_proxy_block(f.module, ProxyBlock::new()).unwrap();
        assert!(f.ir.add_edge(f.b1, proxy, None).unwrap());
        assert!(matches!(
            f.ir.remove_proxy_block(&proxy),
            Err(IrError::NodeHasEdges { .. })
        ));
        f.ir.remove_edges_of(&proxy);
        f.ir.remove_proxy_block(&proxy).unwrap();
        assert!(f.ir.get_node(&proxy).is_none());
    }

    #[test]
    fn test_remove_module_exempts_own_symbols() {
        let mut f = fixture();
        let start = f.ir.add_symbol(f.module, Symbol::with_referent("_start", f.b0)).unwrap();
        f.ir.set_entry_point(f.module, Some(start)).unwrap();
        let module = f.ir.remove_module(&f.module).unwrap();
        assert_eq!(module.entry_point(), Some(start));
        assert_eq!(f.ir.node_count(), 1);

        // The detached module carries its references back in.
        f.ir.add_module(module).unwrap();
        assert_eq!(f.ir.symbol_address(&start), Some(Addr(0x1000)));
    }

    #[test]
    fn test_dangling_symbolic_references() {
        let mut f = fixture();
        let sym = f.ir.add_symbol(f.module, Symbol::new("ext")).unwrap();
        let interval = f.ir.byte_interval_mut(&f.interval).unwrap();
        interval
            .add_symbolic_expression(2, SymbolicExpression::addr_const(sym, 0))
            .unwrap();
        assert!(f.ir.dangling_symbolic_references().is_empty());

        f.ir.remove_symbol(&sym).unwrap();
        assert_eq!(
            f.ir.dangling_symbolic_references(),
            vec![(f.interval, 2, sym)]
        );
        let expr = SymbolicExpression::addr_const(sym, 0);
        assert_eq!(f.ir.expression_symbols(&expr), vec![None]);
    }

    #[test]
    fn test_blocks_on_address() {
        let f = fixture();
        let hits: Vec<Uuid> = f.ir.blocks_on(Addr(0x1005)).iter().map(|b| b.uuid()).collect();
        assert_eq!(hits, vec![f.b1]);
        assert!(f.ir.blocks_on(Addr(0x1010)).is_empty());
    }
}
