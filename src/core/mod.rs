//! Core IR data types.
//!
//! The node graph: an [`ir::Ir`] owns modules, modules own sections,
//! symbols and proxy blocks, sections own byte intervals, and byte
//! intervals own code and data blocks plus symbolic expressions. Every node
//! carries a UUID registered with its IR; cross-links between nodes are
//! stored as identifiers and resolved through the IR.

pub mod address;
pub mod aux_data;
pub mod aux_data_schema;
pub mod block;
pub mod byte_interval;
pub mod control_flow_graph;
pub mod id;
pub mod ir;
pub mod module;
pub mod offset;
pub mod section;
pub mod symbol;
pub mod symbolic_expression;
