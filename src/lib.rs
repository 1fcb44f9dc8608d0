//! binir: an intermediate representation for binary analysis and rewriting.
//!
//! An [`Ir`] holds modules made of sections, byte intervals, code and data
//! blocks, symbols and symbolic expressions, plus an interprocedural control
//! flow graph over code blocks and typed AuxData tables at the IR and module
//! levels. [`save`] and [`load`] move an IR to and from a self-describing
//! byte container.

/// Serialization configuration
pub mod config;
/// Core data types module
pub mod core;
pub mod error;
pub mod logging;
/// Signatures, codecs and the container format
pub mod serialize;

pub use crate::config::SerializationConfig;
pub use crate::core::address::Addr;
pub use crate::core::aux_data::{AuxBody, AuxData, AuxDataContainer, AuxType, AuxValue};
pub use crate::core::aux_data_schema::AuxDataSchema;
pub use crate::core::block::{ByteBlock, CodeBlock, DataBlock, DecodeMode, ProxyBlock};
pub use crate::core::byte_interval::ByteInterval;
pub use crate::core::control_flow_graph::{Cfg, Edge, EdgeLabel, EdgeType};
pub use crate::core::id::{new_identifier, NodeKind};
pub use crate::core::ir::{Ir, NodeRef};
pub use crate::core::module::{ByteOrder, FileFormat, Isa, Module};
pub use crate::core::offset::Offset;
pub use crate::core::section::{Section, SectionFlags};
pub use crate::core::symbol::{Symbol, SymbolPayload};
pub use crate::core::symbolic_expression::{SymbolicExpression, SymbolicExpressionKind};
pub use crate::error::IrError;
pub use crate::serialize::codec::{Codec, CodecRegistry};
pub use crate::serialize::error::{CodecError, ContainerError};
pub use crate::serialize::signature::TypeSignature;
pub use crate::serialize::{load, load_with, save, save_with};
