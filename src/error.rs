//! Error types for structural operations on the IR node graph.
//!
//! Every mutation that would break an ownership, bounds, or reference
//! invariant is rejected with an [`IrError`]; nothing is auto-corrected.
//! Serialization has its own error types in [`crate::serialize::error`].

use thiserror::Error;
use uuid::Uuid;

use crate::core::id::NodeKind;

/// Main error type for structural IR operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    /// A node with this identifier is already part of the IR
    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(Uuid),

    /// The node is already owned by a different container
    #[error("Node {id} is already owned by {owner}")]
    AlreadyOwned { id: Uuid, owner: Uuid },

    /// No node with this identifier exists in the IR
    #[error("Unknown node: {0}")]
    UnknownNode(Uuid),

    /// The identifier names a node of the wrong kind for this operation
    #[error("Node {id} is a {found}, expected {expected}")]
    WrongNodeKind {
        id: Uuid,
        expected: NodeKind,
        found: NodeKind,
    },

    /// The node exists but is not owned by the container the operation names
    #[error("Node {id} does not belong to {container}")]
    ForeignNode { id: Uuid, container: Uuid },

    /// Removal refused because something still refers to the node
    #[error("Node {id} is still referenced by {referrer}")]
    StillReferenced { id: Uuid, referrer: String },

    /// Removal refused because the CFG still has edges touching the node
    #[error("Node {id} still has {edges} incident CFG edge(s)")]
    NodeHasEdges { id: Uuid, edges: usize },

    /// A block would extend past the end of its byte interval
    #[error("Block at offset {offset:#x} with size {size} exceeds interval size {interval_size}")]
    BlockOutOfBounds {
        offset: u64,
        size: u64,
        interval_size: u64,
    },

    /// An offset lies outside the byte interval
    #[error("Offset {offset:#x} is outside interval of size {interval_size}")]
    OffsetOutOfBounds { offset: u64, interval_size: u64 },

    /// A byte buffer does not fit the interval extent
    #[error("Length mismatch: required {required} bytes, available {available}")]
    LengthMismatch { required: u64, available: u64 },

    /// Two loaded sections claim the same addresses
    #[error("Section {first} overlaps section {second} at {address:#x}")]
    SectionOverlap {
        first: Uuid,
        second: Uuid,
        address: u64,
    },
}

/// Result type alias for structural IR operations
pub type Result<T> = std::result::Result<T, IrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IrError::BlockOutOfBounds {
            offset: 0x10,
            size: 8,
            interval_size: 16,
        };
        assert_eq!(
            err.to_string(),
            "Block at offset 0x10 with size 8 exceeds interval size 16"
        );

        let id = Uuid::nil();
        let err = IrError::WrongNodeKind {
            id,
            expected: NodeKind::CodeBlock,
            found: NodeKind::DataBlock,
        };
        assert!(err.to_string().contains("is a DataBlock, expected CodeBlock"));
    }

    #[test]
    fn test_length_mismatch_display() {
        let err = IrError::LengthMismatch {
            required: 12,
            available: 8,
        };
        assert_eq!(
            err.to_string(),
            "Length mismatch: required 12 bytes, available 8"
        );
    }
}
