//! Serialization: type signatures, the AuxData codec registry, and the
//! whole-IR container format.

pub mod codec;
pub mod container;
pub mod error;
pub mod signature;

pub use container::{FORMAT_VERSION, MAGIC};

use tracing::{debug, info_span};

use crate::config::SerializationConfig;
use crate::core::ir::Ir;
use codec::CodecRegistry;
use error::Result;

/// Rebuild an IR from `bytes` using the built-in codecs and default
/// configuration.
pub fn load(bytes: &[u8]) -> Result<Ir> {
    load_with(bytes, CodecRegistry::builtin(), &SerializationConfig::default())
}

/// Serialize `ir` using the built-in codecs and default configuration.
pub fn save(ir: &Ir) -> Result<Vec<u8>> {
    save_with(ir, CodecRegistry::builtin(), &SerializationConfig::default())
}

pub fn load_with(
    bytes: &[u8],
    registry: &CodecRegistry,
    config: &SerializationConfig,
) -> Result<Ir> {
    let span = info_span!("load", len = bytes.len());
    let _g = span.enter();
    let ir = container::decode_ir(bytes, registry, config)?;
    debug!(ir = %ir.uuid(), modules = ir.modules().len(), "loaded IR");
    Ok(ir)
}

pub fn save_with(ir: &Ir, registry: &CodecRegistry, config: &SerializationConfig) -> Result<Vec<u8>> {
    let span = info_span!("save", ir = %ir.uuid());
    let _g = span.enter();
    let bytes = container::encode_ir(ir, registry, config)?;
    debug!(len = bytes.len(), "saved IR");
    Ok(bytes)
}
