//! Whole-IR wire format.
//!
//! A stream is the 4-byte magic `BNIR`, a little-endian `u32` format
//! version, and one bincode-encoded [`IrRecord`]. Records mirror the node
//! tree; cross-references are raw identifiers.
//!
//! Loading runs in two passes. The first builds every node through the
//! public [`Ir`] API so ownership and placement rules are enforced exactly
//! as for hand-built IRs. The second resolves identifier links (symbol
//! referents, entry points, symbolic expressions, CFG edges) once every node
//! exists, so forward references are fine but dangling ones are not.

use bincode::config::Config;
use bincode::{Decode, Encode};
use bytes::Buf;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::config::SerializationConfig;
use crate::core::address::Addr;
use crate::core::aux_data::{AuxData, AuxDataContainer};
use crate::core::block::{ByteBlock, CodeBlock, DataBlock, DecodeMode, ProxyBlock};
use crate::core::byte_interval::ByteInterval;
use crate::core::control_flow_graph::{EdgeLabel, EdgeType};
use crate::core::id::NodeKind;
use crate::core::ir::Ir;
use crate::core::module::{ByteOrder, FileFormat, Isa, Module};
use crate::core::section::{Section, SectionFlags};
use crate::core::symbol::{Symbol, SymbolPayload};
use crate::core::symbolic_expression::{SymbolicExpression, SymbolicExpressionKind};
use crate::error::IrError;
use crate::serialize::codec::CodecRegistry;
use crate::serialize::error::{CodecError, ContainerError, Result};

/// Leading bytes of every serialized IR.
pub const MAGIC: &[u8; 4] = b"BNIR";

/// Current container version.
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

// Ceiling on what a body may claim while decoding, whatever its size.
const BODY_LIMIT: usize = 1 << 31;

// Every decoded element occupies at least one input byte and no record is
// wider than this in memory, so honest bodies never claim more than
// `len * ALLOC_PER_INPUT_BYTE`.
const ALLOC_PER_INPUT_BYTE: usize = 64;

fn wire_config() -> impl Config {
    bincode::config::standard()
}

fn limited<const LIMIT: usize>() -> impl Config {
    bincode::config::standard().with_limit::<LIMIT>()
}

/// Allocation cap for decoding a body of `len` bytes.
fn allocation_limit(len: usize) -> usize {
    let budget = len.saturating_mul(ALLOC_PER_INPUT_BYTE);
    [1 << 20, 1 << 24, 1 << 28]
        .into_iter()
        .find(|&tier| budget <= tier)
        .unwrap_or(BODY_LIMIT)
}

fn decode_body(body: &[u8]) -> std::result::Result<(IrRecord, usize), bincode::error::DecodeError> {
    match allocation_limit(body.len()) {
        l if l == 1 << 20 => bincode::decode_from_slice(body, limited::<{ 1 << 20 }>()),
        l if l == 1 << 24 => bincode::decode_from_slice(body, limited::<{ 1 << 24 }>()),
        l if l == 1 << 28 => bincode::decode_from_slice(body, limited::<{ 1 << 28 }>()),
        _ => bincode::decode_from_slice(body, limited::<BODY_LIMIT>()),
    }
}

type RawId = [u8; 16];

#[derive(Debug, Encode, Decode)]
struct IrRecord {
    uuid: RawId,
    modules: Vec<ModuleRecord>,
    edges: Vec<EdgeRecord>,
    aux_data: Vec<AuxDataRecord>,
}

#[derive(Debug, Encode, Decode)]
struct ModuleRecord {
    uuid: RawId,
    name: String,
    binary_path: String,
    file_format: FileFormat,
    isa: Isa,
    byte_order: ByteOrder,
    preferred_address: u64,
    rebase_delta: i64,
    entry_point: Option<RawId>,
    sections: Vec<SectionRecord>,
    symbols: Vec<SymbolRecord>,
    proxy_blocks: Vec<RawId>,
    aux_data: Vec<AuxDataRecord>,
}

#[derive(Debug, Encode, Decode)]
struct SectionRecord {
    uuid: RawId,
    name: String,
    flags: u32,
    byte_intervals: Vec<ByteIntervalRecord>,
}

#[derive(Debug, Encode, Decode)]
struct ByteIntervalRecord {
    uuid: RawId,
    address: Option<u64>,
    size: u64,
    contents: Vec<u8>,
    blocks: Vec<BlockRecord>,
    symbolic_expressions: Vec<SymbolicExpressionRecord>,
}

#[derive(Debug, Encode, Decode)]
enum BlockRecord {
    Code {
        uuid: RawId,
        offset: u64,
        size: u64,
        decode_mode: DecodeMode,
    },
    Data {
        uuid: RawId,
        offset: u64,
        size: u64,
    },
}

#[derive(Debug, Encode, Decode)]
enum ExpressionKindRecord {
    AddrConst {
        symbol: RawId,
        offset: i64,
    },
    AddrAddr {
        symbol1: RawId,
        symbol2: RawId,
        scale: i64,
        offset: i64,
    },
    StackConst {
        symbol: RawId,
        offset: i64,
    },
}

#[derive(Debug, Encode, Decode)]
struct SymbolicExpressionRecord {
    offset: u64,
    kind: ExpressionKindRecord,
    attributes: Vec<String>,
}

#[derive(Debug, Encode, Decode)]
enum PayloadRecord {
    None,
    Address(u64),
    Referent(RawId),
}

#[derive(Debug, Encode, Decode)]
struct SymbolRecord {
    uuid: RawId,
    name: String,
    at_end: bool,
    payload: PayloadRecord,
}

#[derive(Debug, Encode, Decode)]
struct EdgeLabelRecord {
    edge_type: EdgeType,
    conditional: bool,
    direct: bool,
}

#[derive(Debug, Encode, Decode)]
struct EdgeRecord {
    source: RawId,
    target: RawId,
    label: Option<EdgeLabelRecord>,
}

#[derive(Debug, Encode, Decode)]
struct AuxDataRecord {
    key: String,
    signature: String,
    payload: Vec<u8>,
}

// ----- save -----

fn encode_aux_data(
    container: &AuxDataContainer,
    registry: &CodecRegistry,
    config: &SerializationConfig,
) -> Result<Vec<AuxDataRecord>> {
    container
        .iter()
        .map(|(key, data)| {
            let payload = registry.encode_entry(key, data, config)?;
            Ok(AuxDataRecord {
                key: key.to_string(),
                signature: data.signature().to_string(),
                payload,
            })
        })
        .collect()
}

fn expression_record(offset: u64, expr: &SymbolicExpression) -> SymbolicExpressionRecord {
    let kind = match expr.kind {
        SymbolicExpressionKind::AddrConst { symbol, offset } => ExpressionKindRecord::AddrConst {
            symbol: symbol.into_bytes(),
            offset,
        },
        SymbolicExpressionKind::AddrAddr {
            symbol1,
            symbol2,
            scale,
            offset,
        } => ExpressionKindRecord::AddrAddr {
            symbol1: symbol1.into_bytes(),
            symbol2: symbol2.into_bytes(),
            scale,
            offset,
        },
        SymbolicExpressionKind::StackConst { symbol, offset } => {
            ExpressionKindRecord::StackConst {
                symbol: symbol.into_bytes(),
                offset,
            }
        }
    };
    SymbolicExpressionRecord {
        offset,
        kind,
        attributes: expr.attributes.iter().cloned().collect(),
    }
}

fn interval_record(interval: &ByteInterval) -> ByteIntervalRecord {
    crate::trace_node!(NodeKind::ByteInterval, interval.uuid(), "saving");
    let blocks = interval
        .blocks()
        .iter()
        .map(|block| match block {
            ByteBlock::Code(code) => BlockRecord::Code {
                uuid: code.uuid().into_bytes(),
                offset: code.offset(),
                size: code.size(),
                decode_mode: code.decode_mode(),
            },
            ByteBlock::Data(data) => BlockRecord::Data {
                uuid: data.uuid().into_bytes(),
                offset: data.offset(),
                size: data.size(),
            },
        })
        .collect();
    ByteIntervalRecord {
        uuid: interval.uuid().into_bytes(),
        address: interval.address().map(|a| a.value()),
        size: interval.size(),
        contents: interval.bytes().to_vec(),
        blocks,
        symbolic_expressions: interval
            .symbolic_expressions()
            .map(|(offset, expr)| expression_record(offset, expr))
            .collect(),
    }
}

fn symbol_record(symbol: &Symbol) -> SymbolRecord {
    let payload = match symbol.payload() {
        SymbolPayload::None => PayloadRecord::None,
        SymbolPayload::Address(addr) => PayloadRecord::Address(addr.value()),
        SymbolPayload::Referent(block) => PayloadRecord::Referent(block.into_bytes()),
    };
    SymbolRecord {
        uuid: symbol.uuid().into_bytes(),
        name: symbol.name.clone(),
        at_end: symbol.at_end,
        payload,
    }
}

fn module_record(
    module: &Module,
    registry: &CodecRegistry,
    config: &SerializationConfig,
) -> Result<ModuleRecord> {
    crate::trace_node!(NodeKind::Module, module.uuid(), name = %module.name, "saving");
    let sections = module
        .sections()
        .iter()
        .map(|section| SectionRecord {
            uuid: section.uuid().into_bytes(),
            name: section.name.clone(),
            flags: section.flags.bits(),
            byte_intervals: section.byte_intervals().iter().map(interval_record).collect(),
        })
        .collect();
    Ok(ModuleRecord {
        uuid: module.uuid().into_bytes(),
        name: module.name.clone(),
        binary_path: module.binary_path.clone(),
        file_format: module.file_format,
        isa: module.isa,
        byte_order: module.byte_order,
        preferred_address: module.preferred_address.value(),
        rebase_delta: module.rebase_delta,
        entry_point: module.entry_point().map(Uuid::into_bytes),
        sections,
        symbols: module.symbols().iter().map(symbol_record).collect(),
        proxy_blocks: module
            .proxy_blocks()
            .iter()
            .map(|p| p.uuid().into_bytes())
            .collect(),
        aux_data: encode_aux_data(&module.aux_data, registry, config)?,
    })
}

/// Serialize `ir` into a complete stream, header included.
pub fn encode_ir(
    ir: &Ir,
    registry: &CodecRegistry,
    config: &SerializationConfig,
) -> Result<Vec<u8>> {
    if config.validate_on_save {
        let _phase = crate::phase_span!("validate").entered();
        ir.validate()
            .map_err(|e| crate::log_error!(e, "refusing to save an invalid IR"))?;
    }
    if let Some(&(interval, offset, symbol)) = ir.dangling_symbolic_references().first() {
        return Err(ContainerError::DanglingReference {
            id: symbol,
            context: format!("symbolic expression at offset {offset} of byte interval {interval}"),
        });
    }

    let _phase = crate::phase_span!("encode-body", modules = ir.modules().len()).entered();
    let record = IrRecord {
        uuid: ir.uuid().into_bytes(),
        modules: ir
            .modules()
            .iter()
            .map(|m| module_record(m, registry, config))
            .collect::<Result<_>>()?,
        edges: ir
            .cfg()
            .edges()
            .map(|edge| EdgeRecord {
                source: edge.source.into_bytes(),
                target: edge.target.into_bytes(),
                label: edge.label.map(|l| EdgeLabelRecord {
                    edge_type: l.edge_type,
                    conditional: l.conditional,
                    direct: l.direct,
                }),
            })
            .collect(),
        aux_data: encode_aux_data(&ir.aux_data, registry, config)?,
    };

    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bincode::encode_into_std_write(&record, &mut out, wire_config())
        .map_err(|e| ContainerError::Malformed(e.to_string()))?;
    Ok(out)
}

// ----- load -----

/// Attach errors caused by repeated identifiers in the stream.
fn attach_error(err: IrError) -> ContainerError {
    match err {
        IrError::DuplicateIdentifier(id) | IrError::AlreadyOwned { id, .. } => {
            ContainerError::DuplicateIdentifier(id)
        }
        other => ContainerError::Structure(other),
    }
}

/// Link errors caused by identifiers that name nothing in the stream.
fn link_error(err: IrError, context: impl FnOnce() -> String) -> ContainerError {
    match err {
        IrError::UnknownNode(id) => ContainerError::UnresolvedReference {
            id,
            context: context(),
        },
        other => ContainerError::Structure(other),
    }
}

fn decode_aux_data(
    records: Vec<AuxDataRecord>,
    registry: &CodecRegistry,
    config: &SerializationConfig,
) -> Result<AuxDataContainer> {
    let mut container = AuxDataContainer::new();
    for record in records {
        let data = match registry.decode_entry(&record.key, &record.signature, &record.payload, config) {
            Ok(data) => data,
            Err(CodecError::UnsupportedType { key, signature, raw }) if !config.strict_aux_data => {
                warn!(%key, %signature, len = raw.len(), "keeping AuxData with unsupported signature as opaque bytes");
                AuxData::opaque(signature, raw)
            }
            Err(err) => return Err(err.into()),
        };
        if container.insert(record.key.clone(), data).is_some() {
            return Err(ContainerError::Malformed(format!(
                "AuxData key '{}' appears more than once",
                record.key
            )));
        }
    }
    Ok(container)
}

fn expression_from_record(record: SymbolicExpressionRecord) -> SymbolicExpression {
    let kind = match record.kind {
        ExpressionKindRecord::AddrConst { symbol, offset } => SymbolicExpressionKind::AddrConst {
            symbol: Uuid::from_bytes(symbol),
            offset,
        },
        ExpressionKindRecord::AddrAddr {
            symbol1,
            symbol2,
            scale,
            offset,
        } => SymbolicExpressionKind::AddrAddr {
            symbol1: Uuid::from_bytes(symbol1),
            symbol2: Uuid::from_bytes(symbol2),
            scale,
            offset,
        },
        ExpressionKindRecord::StackConst { symbol, offset } => {
            SymbolicExpressionKind::StackConst {
                symbol: Uuid::from_bytes(symbol),
                offset,
            }
        }
    };
    SymbolicExpression {
        kind,
        attributes: record.attributes.into_iter().collect(),
    }
}

// Links collected in pass one and resolved in pass two.
#[derive(Default)]
struct PendingLinks {
    referents: Vec<(Uuid, Uuid)>,
    entry_points: Vec<(Uuid, Uuid)>,
    expressions: Vec<(Uuid, u64, SymbolicExpression)>,
    // Sections attached without LOADED when placement checks are off.
    loaded_sections: Vec<Uuid>,
}

fn load_interval(
    ir: &mut Ir,
    section: Uuid,
    record: ByteIntervalRecord,
    pending: &mut PendingLinks,
) -> Result<()> {
    let id = Uuid::from_bytes(record.uuid);
    crate::trace_node!(NodeKind::ByteInterval, id, size = record.size, "loading");
    let mut interval = ByteInterval::with_uuid(id, record.size);
    if let Some(address) = record.address {
        interval = interval.with_address(Addr(address));
    }
    interval.set_contents(record.contents)?;
    ir.add_byte_interval(section, interval).map_err(attach_error)?;

    for block in record.blocks {
        let (offset, block) = match block {
            BlockRecord::Code {
                uuid,
                offset,
                size,
                decode_mode,
            } => {
                let code = CodeBlock::with_uuid(Uuid::from_bytes(uuid), size)
                    .with_decode_mode(decode_mode);
                (offset, ByteBlock::from(code))
            }
            BlockRecord::Data { uuid, offset, size } => {
                (offset, ByteBlock::from(DataBlock::with_uuid(Uuid::from_bytes(uuid), size)))
            }
        };
        ir.add_block(id, offset, block).map_err(attach_error)?;
    }
    for expr in record.symbolic_expressions {
        let offset = expr.offset;
        pending
            .expressions
            .push((id, offset, expression_from_record(expr)));
    }
    Ok(())
}

fn load_module(
    ir: &mut Ir,
    record: ModuleRecord,
    registry: &CodecRegistry,
    config: &SerializationConfig,
    pending: &mut PendingLinks,
) -> Result<()> {
    let id = Uuid::from_bytes(record.uuid);
    crate::trace_node!(NodeKind::Module, id, name = %record.name, "loading");
    let mut module = Module::with_uuid(id, record.name);
    module.binary_path = record.binary_path;
    module.file_format = record.file_format;
    module.isa = record.isa;
    module.byte_order = record.byte_order;
    module.preferred_address = Addr(record.preferred_address);
    module.rebase_delta = record.rebase_delta;
    module.aux_data = decode_aux_data(record.aux_data, registry, config)?;
    ir.add_module(module).map_err(attach_error)?;

    for section in record.sections {
        let section_id = Uuid::from_bytes(section.uuid);
        let flags = SectionFlags::from_bits(section.flags).ok_or_else(|| {
            ContainerError::Malformed(format!(
                "section {section_id} has unknown flag bits {:#x}",
                section.flags
            ))
        })?;
        // An unloaded section is never refused for overlap; LOADED goes
        // back on once every interval is in place.
        let attach_flags = if config.validate_on_load {
            flags
        } else {
            flags - SectionFlags::LOADED
        };
        if attach_flags != flags {
            pending.loaded_sections.push(section_id);
        }
        ir.add_section(id, Section::with_uuid(section_id, section.name, attach_flags))
            .map_err(attach_error)?;
        for interval in section.byte_intervals {
            load_interval(ir, section_id, interval, pending)?;
        }
    }
    for proxy in record.proxy_blocks {
        ir.add_proxy_block(id, ProxyBlock::with_uuid(Uuid::from_bytes(proxy)))
            .map_err(attach_error)?;
    }
    for symbol in record.symbols {
        let symbol_id = Uuid::from_bytes(symbol.uuid);
        let mut node = Symbol::with_uuid(symbol_id, symbol.name);
        node.at_end = symbol.at_end;
        match symbol.payload {
            PayloadRecord::None => {}
            PayloadRecord::Address(addr) => node.set_address(Some(Addr(addr))),
            PayloadRecord::Referent(block) => {
                pending.referents.push((symbol_id, Uuid::from_bytes(block)))
            }
        }
        ir.add_symbol(id, node).map_err(attach_error)?;
    }
    if let Some(entry) = record.entry_point {
        pending.entry_points.push((id, Uuid::from_bytes(entry)));
    }
    Ok(())
}

fn resolve_links(ir: &mut Ir, edges: Vec<EdgeRecord>, pending: PendingLinks) -> Result<()> {
    for section in pending.loaded_sections {
        ir.section_mut(&section)
            .ok_or(ContainerError::Structure(IrError::UnknownNode(section)))?
            .flags |= SectionFlags::LOADED;
    }
    for (symbol, block) in pending.referents {
        ir.set_symbol_referent(&symbol, block)
            .map_err(|e| link_error(e, || format!("referent of symbol {symbol}")))?;
    }
    for (module, symbol) in pending.entry_points {
        ir.set_entry_point(module, Some(symbol))
            .map_err(|e| link_error(e, || format!("entry point of module {module}")))?;
    }
    for (interval, offset, expr) in pending.expressions {
        for symbol in expr.symbols() {
            if ir.symbol(&symbol).is_none() {
                return Err(ContainerError::UnresolvedReference {
                    id: symbol,
                    context: format!("symbolic expression at offset {offset} of byte interval {interval}"),
                });
            }
        }
        ir.byte_interval_mut(&interval)
            .ok_or(ContainerError::Structure(IrError::UnknownNode(interval)))?
            .add_symbolic_expression(offset, expr)?;
    }
    for edge in edges {
        let source = Uuid::from_bytes(edge.source);
        let target = Uuid::from_bytes(edge.target);
        let label = edge
            .label
            .map(|l| EdgeLabel::new(l.edge_type, l.conditional, l.direct));
        ir.add_edge(source, target, label)
            .map_err(|e| link_error(e, || format!("CFG edge {source} -> {target}")))?;
    }
    Ok(())
}

/// Rebuild an IR from a complete stream.
pub fn decode_ir(
    bytes: &[u8],
    registry: &CodecRegistry,
    config: &SerializationConfig,
) -> Result<Ir> {
    if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
        return Err(ContainerError::BadMagic);
    }
    if bytes.len() < HEADER_LEN {
        return Err(ContainerError::Malformed("truncated header".to_string()));
    }
    let mut header = &bytes[MAGIC.len()..HEADER_LEN];
    let version = header.get_u32_le();
    if version != FORMAT_VERSION {
        return Err(ContainerError::UnsupportedVersion {
            found: version,
            expected: FORMAT_VERSION,
        });
    }

    let body = &bytes[HEADER_LEN..];
    let (record, consumed) = {
        let _phase = crate::phase_span!("decode-body", len = body.len()).entered();
        decode_body(body).map_err(|e| ContainerError::Malformed(e.to_string()))?
    };
    if consumed != body.len() {
        return Err(ContainerError::Malformed(format!(
            "{} trailing bytes after IR body",
            body.len() - consumed
        )));
    }

    let mut ir = Ir::with_uuid(Uuid::from_bytes(record.uuid));
    let mut pending = PendingLinks::default();
    {
        let _phase = crate::phase_span!("build", modules = record.modules.len()).entered();
        ir.aux_data = decode_aux_data(record.aux_data, registry, config)?;
        for module in record.modules {
            load_module(&mut ir, module, registry, config, &mut pending)?;
        }
    }
    {
        let _phase = crate::phase_span!("resolve-links", edges = record.edges.len()).entered();
        resolve_links(&mut ir, record.edges, pending)?;
    }
    if !config.validate_on_load {
        if let Err(err) = ir.validate() {
            warn!(error = %err, "loaded IR does not validate");
        }
    }
    trace!(nodes = ir.node_count(), edges = ir.cfg().edge_count(), "IR loaded");
    Ok(ir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn save(ir: &Ir) -> Result<Vec<u8>> {
        encode_ir(ir, CodecRegistry::builtin(), &SerializationConfig::default())
    }

    fn load(bytes: &[u8]) -> Result<Ir> {
        decode_ir(bytes, CodecRegistry::builtin(), &SerializationConfig::default())
    }

    fn with_body(record: &IrRecord) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend(bincode::encode_to_vec(record, wire_config()).unwrap());
        out
    }

    fn empty_module(uuid: Uuid) -> ModuleRecord {
        ModuleRecord {
            uuid: uuid.into_bytes(),
            name: "m".to_string(),
            binary_path: String::new(),
            file_format: FileFormat::Elf,
            isa: Isa::X64,
            byte_order: ByteOrder::Little,
            preferred_address: 0,
            rebase_delta: 0,
            entry_point: None,
            sections: Vec::new(),
            symbols: Vec::new(),
            proxy_blocks: Vec::new(),
            aux_data: Vec::new(),
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = save(&Ir::new()).unwrap();
        assert_eq!(&bytes[..4], b"BNIR");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
    }

    #[test]
    fn test_empty_ir_roundtrip() {
        let ir = Ir::new();
        assert_eq!(load(&save(&ir).unwrap()).unwrap(), ir);
    }

    #[test]
    fn test_header_errors() {
        assert_eq!(load(b"BN").unwrap_err(), ContainerError::BadMagic);
        assert_eq!(load(b"ELF\x7f\x01\0\0\0").unwrap_err(), ContainerError::BadMagic);
        assert!(matches!(load(b"BNIR\x01"), Err(ContainerError::Malformed(_))));
        assert_eq!(
            load(b"BNIR\x02\0\0\0").unwrap_err(),
            ContainerError::UnsupportedVersion {
                found: 2,
                expected: 1
            }
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = save(&Ir::new()).unwrap();
        bytes.push(0);
        assert!(matches!(load(&bytes), Err(ContainerError::Malformed(_))));
    }

    #[test]
    fn test_allocation_limit_tracks_input_size() {
        assert_eq!(allocation_limit(0), 1 << 20);
        assert_eq!(allocation_limit(4096), 1 << 20);
        assert_eq!(allocation_limit((1 << 20) / ALLOC_PER_INPUT_BYTE + 1), 1 << 24);
        assert_eq!(allocation_limit(1 << 30), BODY_LIMIT);
    }

    #[test]
    fn test_small_body_cannot_claim_large_allocation() {
        // Root id, then a module count of 2^20 (bincode varint, u64 marker).
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.push(253);
        bytes.extend_from_slice(&(1u64 << 20).to_le_bytes());
        assert!(matches!(load(&bytes), Err(ContainerError::Malformed(_))));
    }

    #[test]
    fn test_lenient_load_accepts_overlapping_loaded_sections() {
        let module = Uuid::from_u128(2);
        let mut record = empty_module(module);
        for n in [3u128, 4] {
            record.sections.push(SectionRecord {
                uuid: Uuid::from_u128(n).into_bytes(),
                name: format!(".s{n}"),
                flags: (SectionFlags::READABLE | SectionFlags::LOADED).bits(),
                byte_intervals: vec![ByteIntervalRecord {
                    uuid: Uuid::from_u128(n + 10).into_bytes(),
                    address: Some(0x10),
                    size: 4,
                    contents: Vec::new(),
                    blocks: Vec::new(),
                    symbolic_expressions: Vec::new(),
                }],
            });
        }
        let bytes = with_body(&IrRecord {
            uuid: Uuid::from_u128(1).into_bytes(),
            modules: vec![record],
            edges: Vec::new(),
            aux_data: Vec::new(),
        });

        assert!(matches!(
            load(&bytes),
            Err(ContainerError::Structure(IrError::SectionOverlap { .. }))
        ));
        let lenient = SerializationConfig {
            validate_on_load: false,
            ..SerializationConfig::default()
        };
        let ir = decode_ir(&bytes, CodecRegistry::builtin(), &lenient).unwrap();
        let section = ir.section(&Uuid::from_u128(4)).unwrap();
        assert!(section.is_loaded());
        assert!(section.has_flag(SectionFlags::READABLE));
        assert!(ir.validate().is_err());
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let shared = Uuid::from_u128(7);
        let record = IrRecord {
            uuid: Uuid::from_u128(1).into_bytes(),
            modules: vec![empty_module(shared), empty_module(shared)],
            edges: Vec::new(),
            aux_data: Vec::new(),
        };
        assert_eq!(
            load(&with_body(&record)).unwrap_err(),
            ContainerError::DuplicateIdentifier(shared)
        );
    }

    #[test]
    fn test_unresolved_edge_rejected() {
        let missing = Uuid::from_u128(99);
        let record = IrRecord {
            uuid: Uuid::from_u128(1).into_bytes(),
            modules: Vec::new(),
            edges: vec![EdgeRecord {
                source: missing.into_bytes(),
                target: missing.into_bytes(),
                label: None,
            }],
            aux_data: Vec::new(),
        };
        assert!(matches!(
            load(&with_body(&record)),
            Err(ContainerError::UnresolvedReference { id, .. }) if id == missing
        ));
    }

    #[test]
    fn test_forward_referent_resolves() {
        let module = Uuid::from_u128(2);
        let block = Uuid::from_u128(5);
        let symbol = Uuid::from_u128(6);
        let mut first = empty_module(module);
        first.symbols.push(SymbolRecord {
            uuid: symbol.into_bytes(),
            name: "f".to_string(),
            at_end: false,
            payload: PayloadRecord::Referent(block.into_bytes()),
        });
        first.entry_point = Some(symbol.into_bytes());
        let mut second = empty_module(Uuid::from_u128(3));
        second.sections.push(SectionRecord {
            uuid: Uuid::from_u128(4).into_bytes(),
            name: ".text".to_string(),
            flags: SectionFlags::EXECUTABLE.bits(),
            byte_intervals: vec![ByteIntervalRecord {
                uuid: Uuid::from_u128(8).into_bytes(),
                address: None,
                size: 4,
                contents: vec![0x90; 4],
                blocks: vec![BlockRecord::Code {
                    uuid: block.into_bytes(),
                    offset: 0,
                    size: 4,
                    decode_mode: DecodeMode::Default,
                }],
                symbolic_expressions: Vec::new(),
            }],
        });
        let record = IrRecord {
            uuid: Uuid::from_u128(1).into_bytes(),
            modules: vec![first, second],
            edges: Vec::new(),
            aux_data: Vec::new(),
        };
        let ir = load(&with_body(&record)).unwrap();
        assert_eq!(ir.symbol(&symbol).and_then(Symbol::referent), Some(block));
        assert_eq!(ir.module(&module).and_then(Module::entry_point), Some(symbol));
    }

    #[test]
    fn test_save_refuses_dangling_expression() {
        let mut ir = Ir::new();
        let module = ir.add_module(Module::new("m")).unwrap();
        let section = ir
            .add_section(module, Section::new(".data", SectionFlags::LOADED))
            .unwrap();
        let interval = ir.add_byte_interval(section, ByteInterval::new(8)).unwrap();
        let ghost = Uuid::from_u128(42);
        ir.byte_interval_mut(&interval)
            .unwrap()
            .add_symbolic_expression(0, SymbolicExpression::addr_const(ghost, 0))
            .unwrap();
        assert!(matches!(
            save(&ir),
            Err(ContainerError::DanglingReference { id, .. }) if id == ghost
        ));
    }
}
