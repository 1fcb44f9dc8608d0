//! Error types for AuxData codecs and the container format.

use thiserror::Error;
use uuid::Uuid;

use crate::error::IrError;

/// Failures while parsing type signatures or encoding/decoding payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid type signature '{signature}': {reason}")]
    InvalidSignature { signature: String, reason: String },

    /// No codec is registered for the signature. `raw` holds the undecoded
    /// payload so the caller can keep it opaquely.
    #[error("Unsupported type signature '{signature}' for AuxData '{key}'")]
    UnsupportedType {
        key: String,
        signature: String,
        raw: Vec<u8>,
    },

    #[error("Value does not match signature: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },

    #[error("Unexpected end of payload: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("{remaining} trailing bytes after payload")]
    TrailingBytes { remaining: usize },

    #[error("Duplicate element in {signature}")]
    DuplicateElement { signature: String },

    #[error("String payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Type signature nests deeper than {limit} levels")]
    NestingTooDeep { limit: usize },

    #[error("Collection of {count} elements exceeds the limit of {limit}")]
    CollectionTooLarge { count: u64, limit: u64 },
}

impl CodecError {
    /// Tie an `UnsupportedType` raised for a nested type to the AuxData
    /// entry being coded, so it names the entry and carries its payload.
    pub fn for_entry(self, key: &str, signature: &str, raw: &[u8]) -> Self {
        match self {
            CodecError::UnsupportedType { key: nested, .. } if nested.is_empty() => {
                CodecError::UnsupportedType {
                    key: key.to_string(),
                    signature: signature.to_string(),
                    raw: raw.to_vec(),
                }
            }
            other => other,
        }
    }
}

/// Failures while reading or writing a serialized IR.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[error("Input is not a serialized IR (bad magic)")]
    BadMagic,

    #[error("Unsupported container version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Malformed container: {0}")]
    Malformed(String),

    #[error("Identifier {0} appears more than once in the stream")]
    DuplicateIdentifier(Uuid),

    #[error("Unresolved reference to {id} from {context}")]
    UnresolvedReference { id: Uuid, context: String },

    #[error("Refusing to save dangling reference to {id} from {context}")]
    DanglingReference { id: Uuid, context: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Structure(#[from] IrError),
}

pub type Result<T> = std::result::Result<T, ContainerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_converts() {
        let err: ContainerError = CodecError::InvalidUtf8.into();
        assert_eq!(err.to_string(), "String payload is not valid UTF-8");
    }

    #[test]
    fn test_for_entry_names_the_entry() {
        let nested = CodecError::UnsupportedType {
            key: String::new(),
            signature: "beU32".to_string(),
            raw: Vec::new(),
        };
        assert_eq!(
            nested.for_entry("counters", "sequence<beU32>", &[1, 2]),
            CodecError::UnsupportedType {
                key: "counters".to_string(),
                signature: "sequence<beU32>".to_string(),
                raw: vec![1, 2],
            }
        );
        assert_eq!(
            CodecError::InvalidUtf8.for_entry("k", "string", &[]),
            CodecError::InvalidUtf8
        );
    }

    #[test]
    fn test_structure_error_converts() {
        let err: ContainerError = IrError::UnknownNode(Uuid::nil()).into();
        assert!(matches!(err, ContainerError::Structure(IrError::UnknownNode(_))));
    }
}
