//! Identity utilities for IR nodes.
//!
//! Every node carries a 128-bit random identifier assigned at construction,
//! or taken from the stream on deserialization. Each IR keeps a
//! [`NodeRegistry`] mapping identifiers to their kind and owning container;
//! weak links (symbol referents, CFG endpoints, symbolic expression symbols)
//! are resolved through it rather than stored as pointers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{IrError, Result};

/// Generate a fresh node identifier.
pub fn new_identifier() -> Uuid {
    Uuid::new_v4()
}

/// Kinds of nodes in the IR ownership tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    /// Root of the tree
    Ir,
    /// One loaded binary image
    Module,
    /// Named container of byte intervals
    Section,
    /// Contiguous run of bytes
    ByteInterval,
    /// Block of instructions
    CodeBlock,
    /// Block of data
    DataBlock,
    /// Placeholder for an external or unknown code target
    ProxyBlock,
    /// Named reference to an address or block
    Symbol,
}

impl NodeKind {
    /// Whether nodes of this kind may appear as CFG vertices.
    pub fn is_cfg_node(&self) -> bool {
        matches!(self, NodeKind::CodeBlock | NodeKind::ProxyBlock)
    }

    /// Whether nodes of this kind may be the referent of a symbol.
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            NodeKind::CodeBlock | NodeKind::DataBlock | NodeKind::ProxyBlock
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Ir => write!(f, "Ir"),
            NodeKind::Module => write!(f, "Module"),
            NodeKind::Section => write!(f, "Section"),
            NodeKind::ByteInterval => write!(f, "ByteInterval"),
            NodeKind::CodeBlock => write!(f, "CodeBlock"),
            NodeKind::DataBlock => write!(f, "DataBlock"),
            NodeKind::ProxyBlock => write!(f, "ProxyBlock"),
            NodeKind::Symbol => write!(f, "Symbol"),
        }
    }
}

/// Registry record for one live node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEntry {
    /// What kind of node this is
    pub kind: NodeKind,
    /// Owning container, `None` only for the IR root
    pub parent: Option<Uuid>,
}

/// Identifier → node map scoped to one IR.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRegistry {
    entries: HashMap<Uuid, NodeEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding only the IR root.
    pub fn with_root(root: Uuid) -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            root,
            NodeEntry {
                kind: NodeKind::Ir,
                parent: None,
            },
        );
        Self { entries }
    }

    /// Register a node under its owner.
    ///
    /// Fails with `AlreadyOwned` if the identifier is live under a different
    /// owner and with `DuplicateIdentifier` if it is live under the same one.
    pub fn insert(&mut self, id: Uuid, kind: NodeKind, parent: Option<Uuid>) -> Result<()> {
        self.check_vacant(id, parent)?;
        self.entries.insert(id, NodeEntry { kind, parent });
        Ok(())
    }

    /// Check that `id` could be inserted under `parent`.
    pub fn check_vacant(&self, id: Uuid, parent: Option<Uuid>) -> Result<()> {
        match self.entries.get(&id) {
            None => Ok(()),
            Some(entry) => match entry.parent {
                Some(owner) if Some(owner) != parent => Err(IrError::AlreadyOwned { id, owner }),
                _ => Err(IrError::DuplicateIdentifier(id)),
            },
        }
    }

    /// Forget a node.
    pub fn remove(&mut self, id: &Uuid) -> Option<NodeEntry> {
        self.entries.remove(id)
    }

    /// Move a node to a new owner. The old owner link is replaced in the same
    /// step, so a node never has two owners.
    pub fn reparent(&mut self, id: Uuid, new_parent: Uuid) -> Result<()> {
        let entry = self.entries.get_mut(&id).ok_or(IrError::UnknownNode(id))?;
        entry.parent = Some(new_parent);
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Option<&NodeEntry> {
        self.entries.get(id)
    }

    pub fn kind_of(&self, id: &Uuid) -> Option<NodeKind> {
        self.entries.get(id).map(|e| e.kind)
    }

    pub fn parent_of(&self, id: &Uuid) -> Option<Uuid> {
        self.entries.get(id).and_then(|e| e.parent)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    /// Look up `id` and require it to be of kind `expected`.
    pub fn expect_kind(&self, id: Uuid, expected: NodeKind) -> Result<&NodeEntry> {
        let entry = self.entries.get(&id).ok_or(IrError::UnknownNode(id))?;
        if entry.kind != expected {
            return Err(IrError::WrongNodeKind {
                id,
                expected,
                found: entry.kind,
            });
        }
        Ok(entry)
    }

    /// Chain of owners from `id` up to (excluding) the IR root.
    pub fn ancestors(&self, id: &Uuid) -> Vec<Uuid> {
        let mut chain = Vec::new();
        let mut cursor = self.parent_of(id);
        while let Some(parent) = cursor {
            match self.entries.get(&parent) {
                Some(entry) if entry.kind != NodeKind::Ir => {
                    chain.push(parent);
                    cursor = entry.parent;
                }
                _ => break,
            }
        }
        chain
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &NodeEntry)> {
        self.entries.iter()
    }
}

/// Nodes that carry their own identifier.
pub(crate) trait Identified {
    fn node_id(&self) -> Uuid;
}

/// Ordered child list with an identifier index, so lookups by id stay
/// constant time however many children a container holds.
#[derive(Clone)]
pub(crate) struct NodeVec<T> {
    items: Vec<T>,
    index: HashMap<Uuid, usize>,
}

impl<T> Default for NodeVec<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for NodeVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.items).finish()
    }
}

// The index is derived from `items`.
impl<T: PartialEq> PartialEq for NodeVec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Identified> NodeVec<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, id: &Uuid) -> Option<&T> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut T> {
        let i = *self.index.get(id)?;
        self.items.get_mut(i)
    }

    pub fn push(&mut self, item: T) {
        self.index.insert(item.node_id(), self.items.len());
        self.items.push(item);
    }

    /// Insert at `position`, shifting later items.
    pub fn insert(&mut self, position: usize, item: T) {
        self.items.insert(position, item);
        self.reindex_from(position);
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<T> {
        let position = self.index.remove(id)?;
        let item = self.items.remove(position);
        self.reindex_from(position);
        Some(item)
    }

    fn reindex_from(&mut self, start: usize) {
        for (i, item) in self.items.iter().enumerate().skip(start) {
            self.index.insert(item.node_id(), i);
        }
    }
}
