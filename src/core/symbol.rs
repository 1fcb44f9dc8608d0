//! Symbol type for named program entities.
//!
//! A symbol names either an absolute address, a block (by identifier), or
//! nothing at all (undefined or external). Referents are weak links: the
//! block is owned elsewhere and resolved through the IR's registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core::address::Addr;
use crate::core::id::{new_identifier, Identified};

/// What a symbol stands for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolPayload {
    /// Undefined or external symbol
    #[default]
    None,
    /// Absolute address not tied to a block
    Address(Addr),
    /// A CodeBlock, DataBlock or ProxyBlock
    Referent(Uuid),
}

/// Named reference to an address or block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    uuid: Uuid,
    /// Symbol name; several symbols may share one
    pub name: String,
    /// The symbol addresses one past the end of its referent
    pub at_end: bool,
    payload: SymbolPayload,
}

impl Symbol {
    /// An undefined symbol.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_uuid(new_identifier(), name)
    }

    pub fn with_uuid(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            at_end: false,
            payload: SymbolPayload::None,
        }
    }

    /// A symbol bound to an absolute address.
    pub fn with_address(name: impl Into<String>, address: Addr) -> Self {
        let mut symbol = Self::new(name);
        symbol.payload = SymbolPayload::Address(address);
        symbol
    }

    /// A symbol naming a block. The block must exist when the symbol is
    /// attached to an IR.
    pub fn with_referent(name: impl Into<String>, block: Uuid) -> Self {
        let mut symbol = Self::new(name);
        symbol.payload = SymbolPayload::Referent(block);
        symbol
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> SymbolPayload {
        self.payload
    }

    /// Directly stored address, if the payload is an address.
    pub fn address(&self) -> Option<Addr> {
        match self.payload {
            SymbolPayload::Address(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn referent(&self) -> Option<Uuid> {
        match self.payload {
            SymbolPayload::Referent(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.payload == SymbolPayload::None
    }

    /// Switch to an address payload (or back to undefined with `None`).
    ///
    /// Referents are set through the IR so the target can be checked.
    pub fn set_address(&mut self, address: Option<Addr>) {
        self.payload = match address {
            Some(addr) => SymbolPayload::Address(addr),
            None => SymbolPayload::None,
        };
    }

    pub(crate) fn set_payload(&mut self, payload: SymbolPayload) {
        self.payload = payload;
    }
}

impl Identified for Symbol {
    fn node_id(&self) -> Uuid {
        self.uuid
    }
}

impl fmt::Display for SymbolPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolPayload::None => write!(f, "undefined"),
            SymbolPayload::Address(addr) => write!(f, "{}", addr),
            SymbolPayload::Referent(id) => write!(f, "-> {}", id),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol '{}' ({})", self.name, self.payload)?;
        if self.at_end {
            write!(f, " at end")?;
        }
        Ok(())
    }
}
