//! Symbolic expressions embedded at byte positions.
//!
//! A symbolic expression records that the bytes at some offset encode a
//! reference to one or two symbols. Symbol fields are weak: they name a
//! symbol by identifier and are resolved through the IR on demand.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// The shape of a symbolic expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolicExpressionKind {
    /// Address of `symbol` plus `offset`
    AddrConst { symbol: Uuid, offset: i64 },
    /// `(symbol1 - symbol2) / scale + offset`
    AddrAddr {
        symbol1: Uuid,
        symbol2: Uuid,
        scale: i64,
        offset: i64,
    },
    /// Stack-frame relative `symbol` plus `offset`
    StackConst { symbol: Uuid, offset: i64 },
}

/// A symbolic expression plus its attribute flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolicExpression {
    pub kind: SymbolicExpressionKind,
    /// Free-form attribute flags (e.g. "GOT", "PLT", "lo12")
    pub attributes: BTreeSet<String>,
}

impl SymbolicExpression {
    pub fn addr_const(symbol: Uuid, offset: i64) -> Self {
        Self::from_kind(SymbolicExpressionKind::AddrConst { symbol, offset })
    }

    pub fn addr_addr(symbol1: Uuid, symbol2: Uuid, scale: i64, offset: i64) -> Self {
        Self::from_kind(SymbolicExpressionKind::AddrAddr {
            symbol1,
            symbol2,
            scale,
            offset,
        })
    }

    pub fn stack_const(symbol: Uuid, offset: i64) -> Self {
        Self::from_kind(SymbolicExpressionKind::StackConst { symbol, offset })
    }

    fn from_kind(kind: SymbolicExpressionKind) -> Self {
        Self {
            kind,
            attributes: BTreeSet::new(),
        }
    }

    /// Builder-style attribute addition.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attributes.insert(attribute.into());
        self
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.contains(attribute)
    }

    /// Identifiers of every symbol this expression names, in field order.
    pub fn symbols(&self) -> Vec<Uuid> {
        match &self.kind {
            SymbolicExpressionKind::AddrConst { symbol, .. }
            | SymbolicExpressionKind::StackConst { symbol, .. } => vec![*symbol],
            SymbolicExpressionKind::AddrAddr {
                symbol1, symbol2, ..
            } => vec![*symbol1, *symbol2],
        }
    }

    /// Whether this expression names `symbol` in any field.
    pub fn references(&self, symbol: &Uuid) -> bool {
        self.symbols().contains(symbol)
    }
}

impl fmt::Display for SymbolicExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SymbolicExpressionKind::AddrConst { symbol, offset } => {
                write!(f, "{}{:+}", symbol, offset)?
            }
            SymbolicExpressionKind::AddrAddr {
                symbol1,
                symbol2,
                scale,
                offset,
            } => write!(f, "({} - {})/{}{:+}", symbol1, symbol2, scale, offset)?,
            SymbolicExpressionKind::StackConst { symbol, offset } => {
                write!(f, "stack({}){:+}", symbol, offset)?
            }
        }
        if !self.attributes.is_empty() {
            let attrs: Vec<&str> = self.attributes.iter().map(String::as_str).collect();
            write!(f, " [{}]", attrs.join(","))?;
        }
        Ok(())
    }
}
