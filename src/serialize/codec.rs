//! Signature-driven codec registry for AuxData payloads.
//!
//! A registry maps signature strings to `(encode, decode)` function pairs.
//! Lookup tries the full canonical signature first and then the bare
//! constructor or primitive name, so `mapping` handles every
//! `mapping<K,V>` while a tool can still override one exact signature.
//! Composite codecs recurse through the registry for their element types.
//!
//! Payload layout: fixed-width little-endian integers and floats, `bool` as
//! one byte, `string`/`sequence`/`set`/`mapping` as a `u64` count followed by
//! the elements, `UUID` as 16 raw bytes, `Offset` as UUID then `u64`,
//! `Address` as `u64`, and `tuple` as its elements back to back.

use bytes::{Buf, BufMut};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::trace;
use uuid::Uuid;

use crate::config::SerializationConfig;
use crate::core::address::Addr;
use crate::core::aux_data::{AuxBody, AuxData, AuxValue};
use crate::core::offset::Offset;
use crate::serialize::error::CodecError;
use crate::serialize::signature::TypeSignature;

pub type EncodeFn = fn(&mut Encoder<'_>, &TypeSignature, &AuxValue) -> Result<(), CodecError>;
pub type DecodeFn = fn(&mut Decoder<'_>, &TypeSignature) -> Result<AuxValue, CodecError>;

/// Encode/decode pair for one signature or constructor.
#[derive(Clone, Copy)]
pub struct Codec {
    pub encode: EncodeFn,
    pub decode: DecodeFn,
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

static BUILTIN: Lazy<CodecRegistry> = Lazy::new(CodecRegistry::with_builtins);

#[derive(Debug, Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Codec>,
}

impl CodecRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared registry holding only the built-in codecs.
    pub fn builtin() -> &'static CodecRegistry {
        &BUILTIN
    }

    /// A fresh registry with every built-in codec, ready for extension.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, EncodeFn, DecodeFn); 19] = [
            ("bool", encode_bool, decode_bool),
            ("int8", encode_i8, decode_i8),
            ("int16", encode_i16, decode_i16),
            ("int32", encode_i32, decode_i32),
            ("int64", encode_i64, decode_i64),
            ("uint8", encode_u8, decode_u8),
            ("uint16", encode_u16, decode_u16),
            ("uint32", encode_u32, decode_u32),
            ("uint64", encode_u64, decode_u64),
            ("float32", encode_f32, decode_f32),
            ("float64", encode_f64, decode_f64),
            ("string", encode_string, decode_string),
            ("UUID", encode_uuid, decode_uuid),
            ("Offset", encode_offset, decode_offset),
            ("Address", encode_address, decode_address),
            ("sequence", encode_sequence, decode_sequence),
            ("set", encode_set, decode_set),
            ("mapping", encode_mapping, decode_mapping),
            ("tuple", encode_tuple, decode_tuple),
        ];
        for (name, encode, decode) in builtins {
            registry.register(name, Codec { encode, decode });
        }
        registry
    }

    /// Register a codec for an exact signature or a constructor name,
    /// returning any codec it replaces.
    pub fn register(&mut self, signature: impl Into<String>, codec: Codec) -> Option<Codec> {
        self.codecs.insert(signature.into(), codec)
    }

    pub fn lookup(&self, signature: &TypeSignature) -> Option<&Codec> {
        self.codecs
            .get(&signature.to_string())
            .or_else(|| self.codecs.get(signature.name()))
    }

    /// Whether every type reachable from `signature` has a codec.
    pub fn supports(&self, signature: &TypeSignature) -> bool {
        if self.codecs.contains_key(&signature.to_string()) {
            return true;
        }
        if !self.codecs.contains_key(signature.name()) {
            return false;
        }
        match signature {
            TypeSignature::Sequence(_)
            | TypeSignature::Set(_)
            | TypeSignature::Mapping(_, _)
            | TypeSignature::Tuple(_) => signature.args().into_iter().all(|a| self.supports(a)),
            _ => true,
        }
    }

    /// Encode `value` as `signature`, refusing any collection longer than
    /// `max_collection_len` so the output stays loadable under the same cap.
    pub fn encode(
        &self,
        signature: &TypeSignature,
        value: &AuxValue,
        max_collection_len: u64,
    ) -> Result<Vec<u8>, CodecError> {
        let mut encoder = Encoder {
            registry: self,
            out: Vec::new(),
            max_collection_len,
        };
        encoder.encode(signature, value)?;
        Ok(encoder.out)
    }

    /// Decode a complete payload; leftover bytes are an error.
    pub fn decode(
        &self,
        signature: &TypeSignature,
        bytes: &[u8],
        max_collection_len: u64,
    ) -> Result<AuxValue, CodecError> {
        let mut decoder = Decoder {
            registry: self,
            buf: bytes,
            max_collection_len,
        };
        let value = decoder.decode(signature)?;
        if decoder.remaining() > 0 {
            return Err(CodecError::TrailingBytes {
                remaining: decoder.remaining(),
            });
        }
        Ok(value)
    }

    /// Payload bytes for a stored entry. Opaque entries are returned as is.
    ///
    /// Applies the same nesting and collection caps a load with `config`
    /// enforces.
    pub fn encode_entry(
        &self,
        key: &str,
        data: &AuxData,
        config: &SerializationConfig,
    ) -> Result<Vec<u8>, CodecError> {
        let value = match data.body() {
            AuxBody::Opaque(raw) => return Ok(raw.clone()),
            AuxBody::Value(value) => value,
        };
        let signature = TypeSignature::parse_with_depth(data.signature(), config.max_nesting_depth)?;
        if !self.supports(&signature) {
            return Err(CodecError::UnsupportedType {
                key: key.to_string(),
                signature: data.signature().to_string(),
                raw: Vec::new(),
            });
        }
        trace!(key, signature = data.signature(), "encoding AuxData");
        self.encode(&signature, value, config.max_collection_len)
            .map_err(|e| e.for_entry(key, data.signature(), &[]))
    }

    /// Decode a stored entry.
    ///
    /// Returns `UnsupportedType` carrying the raw bytes when the signature
    /// does not parse or has no codec; the caller decides whether to keep
    /// the entry opaquely.
    pub fn decode_entry(
        &self,
        key: &str,
        signature: &str,
        raw: &[u8],
        config: &SerializationConfig,
    ) -> Result<AuxData, CodecError> {
        let unsupported_entry = || CodecError::UnsupportedType {
            key: key.to_string(),
            signature: signature.to_string(),
            raw: raw.to_vec(),
        };
        let parsed = match TypeSignature::parse_with_depth(signature, config.max_nesting_depth) {
            Ok(parsed) if self.supports(&parsed) => parsed,
            _ => return Err(unsupported_entry()),
        };
        trace!(key, signature, len = raw.len(), "decoding AuxData");
        let value = self
            .decode(&parsed, raw, config.max_collection_len)
            .map_err(|e| e.for_entry(key, signature, raw))?;
        AuxData::from_signature(&parsed, value)
    }
}

/// Output side handed to encode functions.
pub struct Encoder<'a> {
    registry: &'a CodecRegistry,
    out: Vec<u8>,
    max_collection_len: u64,
}

impl Encoder<'_> {
    /// Encode a nested value through the registry.
    pub fn encode(&mut self, signature: &TypeSignature, value: &AuxValue) -> Result<(), CodecError> {
        let codec = *self
            .registry
            .lookup(signature)
            .ok_or_else(|| unsupported(signature))?;
        (codec.encode)(self, signature, value)
    }

    /// Raw output buffer, for custom codecs.
    pub fn out(&mut self) -> &mut Vec<u8> {
        &mut self.out
    }

    /// Write a collection count, rejecting counts over the configured cap.
    pub fn put_count(&mut self, count: usize) -> Result<(), CodecError> {
        let count = count as u64;
        if count > self.max_collection_len {
            return Err(CodecError::CollectionTooLarge {
                count,
                limit: self.max_collection_len,
            });
        }
        self.out.put_u64_le(count);
        Ok(())
    }
}

/// Input side handed to decode functions.
pub struct Decoder<'a> {
    registry: &'a CodecRegistry,
    buf: &'a [u8],
    max_collection_len: u64,
}

impl<'a> Decoder<'a> {
    /// Decode a nested value through the registry.
    pub fn decode(&mut self, signature: &TypeSignature) -> Result<AuxValue, CodecError> {
        let codec = *self
            .registry
            .lookup(signature)
            .ok_or_else(|| unsupported(signature))?;
        (codec.decode)(self, signature)
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Fail unless at least `needed` bytes remain.
    pub fn need(&self, needed: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < needed {
            return Err(CodecError::UnexpectedEof {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// Read a collection count, rejecting counts over the configured cap.
    pub fn read_count(&mut self) -> Result<usize, CodecError> {
        let count = self.read_u64()?;
        if count > self.max_collection_len || count > usize::MAX as u64 {
            return Err(CodecError::CollectionTooLarge {
                count,
                limit: self.max_collection_len,
            });
        }
        Ok(count as usize)
    }

    /// Decode one element and return it with the bytes it occupied.
    fn decode_tracked(
        &mut self,
        signature: &TypeSignature,
    ) -> Result<(AuxValue, &'a [u8]), CodecError> {
        let before = self.buf;
        let value = self.decode(signature)?;
        let consumed = before.len() - self.buf.len();
        Ok((value, &before[..consumed]))
    }
}

// Raised below entry level; `CodecError::for_entry` fills in the entry.
fn unsupported(signature: &TypeSignature) -> CodecError {
    CodecError::UnsupportedType {
        key: String::new(),
        signature: signature.to_string(),
        raw: Vec::new(),
    }
}

fn mismatch(expected: &TypeSignature, found: &AuxValue) -> CodecError {
    CodecError::ShapeMismatch {
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

fn duplicate(signature: &TypeSignature) -> CodecError {
    CodecError::DuplicateElement {
        signature: signature.to_string(),
    }
}

macro_rules! scalar_codec {
    ($encode:ident, $decode:ident, $variant:ident, $put:ident, $get:ident, $size:expr) => {
        fn $encode(
            e: &mut Encoder<'_>,
            signature: &TypeSignature,
            value: &AuxValue,
        ) -> Result<(), CodecError> {
            match value {
                AuxValue::$variant(v) => {
                    e.out.$put(*v);
                    Ok(())
                }
                other => Err(mismatch(signature, other)),
            }
        }

        fn $decode(d: &mut Decoder<'_>, _signature: &TypeSignature) -> Result<AuxValue, CodecError> {
            d.need($size)?;
            Ok(AuxValue::$variant(d.buf.$get()))
        }
    };
}

scalar_codec!(encode_i8, decode_i8, Int8, put_i8, get_i8, 1);
scalar_codec!(encode_i16, decode_i16, Int16, put_i16_le, get_i16_le, 2);
scalar_codec!(encode_i32, decode_i32, Int32, put_i32_le, get_i32_le, 4);
scalar_codec!(encode_i64, decode_i64, Int64, put_i64_le, get_i64_le, 8);
scalar_codec!(encode_u8, decode_u8, UInt8, put_u8, get_u8, 1);
scalar_codec!(encode_u16, decode_u16, UInt16, put_u16_le, get_u16_le, 2);
scalar_codec!(encode_u32, decode_u32, UInt32, put_u32_le, get_u32_le, 4);
scalar_codec!(encode_u64, decode_u64, UInt64, put_u64_le, get_u64_le, 8);
scalar_codec!(encode_f32, decode_f32, Float32, put_f32_le, get_f32_le, 4);
scalar_codec!(encode_f64, decode_f64, Float64, put_f64_le, get_f64_le, 8);

fn encode_bool(e: &mut Encoder<'_>, signature: &TypeSignature, value: &AuxValue) -> Result<(), CodecError> {
    match value {
        AuxValue::Bool(b) => {
            e.out.put_u8(u8::from(*b));
            Ok(())
        }
        other => Err(mismatch(signature, other)),
    }
}

fn decode_bool(d: &mut Decoder<'_>, signature: &TypeSignature) -> Result<AuxValue, CodecError> {
    d.need(1)?;
    match d.buf.get_u8() {
        0 => Ok(AuxValue::Bool(false)),
        1 => Ok(AuxValue::Bool(true)),
        byte => Err(CodecError::ShapeMismatch {
            expected: signature.to_string(),
            found: format!("byte {:#04x}", byte),
        }),
    }
}

fn encode_string(e: &mut Encoder<'_>, signature: &TypeSignature, value: &AuxValue) -> Result<(), CodecError> {
    match value {
        AuxValue::String(s) => {
            e.put_count(s.len())?;
            e.out.put_slice(s.as_bytes());
            Ok(())
        }
        other => Err(mismatch(signature, other)),
    }
}

fn decode_string(d: &mut Decoder<'_>, _signature: &TypeSignature) -> Result<AuxValue, CodecError> {
    let len = d.read_count()?;
    let bytes = d.read_bytes(len)?;
    let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
    Ok(AuxValue::String(s.to_string()))
}

fn put_uuid(out: &mut Vec<u8>, id: &Uuid) {
    out.put_slice(id.as_bytes());
}

fn get_uuid(d: &mut Decoder<'_>) -> Result<Uuid, CodecError> {
    d.need(16)?;
    let mut raw = [0u8; 16];
    d.buf.copy_to_slice(&mut raw);
    Ok(Uuid::from_bytes(raw))
}

fn encode_uuid(e: &mut Encoder<'_>, signature: &TypeSignature, value: &AuxValue) -> Result<(), CodecError> {
    match value {
        AuxValue::Uuid(id) => {
            put_uuid(&mut e.out, id);
            Ok(())
        }
        other => Err(mismatch(signature, other)),
    }
}

fn decode_uuid(d: &mut Decoder<'_>, _signature: &TypeSignature) -> Result<AuxValue, CodecError> {
    get_uuid(d).map(AuxValue::Uuid)
}

fn encode_offset(e: &mut Encoder<'_>, signature: &TypeSignature, value: &AuxValue) -> Result<(), CodecError> {
    match value {
        AuxValue::Offset(offset) => {
            put_uuid(&mut e.out, &offset.element_id);
            e.out.put_u64_le(offset.displacement);
            Ok(())
        }
        other => Err(mismatch(signature, other)),
    }
}

fn decode_offset(d: &mut Decoder<'_>, _signature: &TypeSignature) -> Result<AuxValue, CodecError> {
    let element_id = get_uuid(d)?;
    let displacement = d.read_u64()?;
    Ok(AuxValue::Offset(Offset::new(element_id, displacement)))
}

fn encode_address(e: &mut Encoder<'_>, signature: &TypeSignature, value: &AuxValue) -> Result<(), CodecError> {
    match value {
        AuxValue::Address(addr) => {
            e.out.put_u64_le(addr.value());
            Ok(())
        }
        other => Err(mismatch(signature, other)),
    }
}

fn decode_address(d: &mut Decoder<'_>, _signature: &TypeSignature) -> Result<AuxValue, CodecError> {
    d.read_u64().map(|v| AuxValue::Address(Addr(v)))
}

fn element_signature(signature: &TypeSignature) -> Result<&TypeSignature, CodecError> {
    match signature {
        TypeSignature::Sequence(t) | TypeSignature::Set(t) => Ok(t),
        other => Err(CodecError::InvalidSignature {
            signature: other.to_string(),
            reason: "expected a single-element collection".to_string(),
        }),
    }
}

fn encode_sequence(e: &mut Encoder<'_>, signature: &TypeSignature, value: &AuxValue) -> Result<(), CodecError> {
    let element = element_signature(signature)?;
    let items = match value {
        AuxValue::Sequence(items) => items,
        other => return Err(mismatch(signature, other)),
    };
    e.put_count(items.len())?;
    for item in items {
        e.encode(element, item)?;
    }
    Ok(())
}

fn decode_sequence(d: &mut Decoder<'_>, signature: &TypeSignature) -> Result<AuxValue, CodecError> {
    let element = element_signature(signature)?;
    let count = d.read_count()?;
    let mut items = Vec::with_capacity(count.min(d.remaining()));
    for _ in 0..count {
        items.push(d.decode(element)?);
    }
    Ok(AuxValue::Sequence(items))
}

fn encode_set(e: &mut Encoder<'_>, signature: &TypeSignature, value: &AuxValue) -> Result<(), CodecError> {
    let element = element_signature(signature)?;
    let items = match value {
        AuxValue::Set(items) => items,
        other => return Err(mismatch(signature, other)),
    };
    e.put_count(items.len())?;
    let mut seen = HashSet::new();
    for item in items {
        let start = e.out.len();
        e.encode(element, item)?;
        if !seen.insert(e.out[start..].to_vec()) {
            return Err(duplicate(signature));
        }
    }
    Ok(())
}

fn decode_set(d: &mut Decoder<'_>, signature: &TypeSignature) -> Result<AuxValue, CodecError> {
    let element = element_signature(signature)?;
    let count = d.read_count()?;
    let mut items = Vec::with_capacity(count.min(d.remaining()));
    let mut seen = HashSet::new();
    for _ in 0..count {
        let (item, bytes) = d.decode_tracked(element)?;
        if !seen.insert(bytes) {
            return Err(duplicate(signature));
        }
        items.push(item);
    }
    Ok(AuxValue::Set(items))
}

fn mapping_signatures(
    signature: &TypeSignature,
) -> Result<(&TypeSignature, &TypeSignature), CodecError> {
    match signature {
        TypeSignature::Mapping(k, v) => Ok((k, v)),
        other => Err(CodecError::InvalidSignature {
            signature: other.to_string(),
            reason: "expected a mapping".to_string(),
        }),
    }
}

fn encode_mapping(e: &mut Encoder<'_>, signature: &TypeSignature, value: &AuxValue) -> Result<(), CodecError> {
    let (key_sig, value_sig) = mapping_signatures(signature)?;
    let pairs = match value {
        AuxValue::Mapping(pairs) => pairs,
        other => return Err(mismatch(signature, other)),
    };
    e.put_count(pairs.len())?;
    let mut seen = HashSet::new();
    for (key, item) in pairs {
        let start = e.out.len();
        e.encode(key_sig, key)?;
        if !seen.insert(e.out[start..].to_vec()) {
            return Err(duplicate(signature));
        }
        e.encode(value_sig, item)?;
    }
    Ok(())
}

fn decode_mapping(d: &mut Decoder<'_>, signature: &TypeSignature) -> Result<AuxValue, CodecError> {
    let (key_sig, value_sig) = mapping_signatures(signature)?;
    let count = d.read_count()?;
    let mut pairs = Vec::with_capacity(count.min(d.remaining()));
    let mut seen = HashSet::new();
    for _ in 0..count {
        let (key, bytes) = d.decode_tracked(key_sig)?;
        if !seen.insert(bytes) {
            return Err(duplicate(signature));
        }
        let item = d.decode(value_sig)?;
        pairs.push((key, item));
    }
    Ok(AuxValue::Mapping(pairs))
}

fn encode_tuple(e: &mut Encoder<'_>, signature: &TypeSignature, value: &AuxValue) -> Result<(), CodecError> {
    let (types, items) = match (signature, value) {
        (TypeSignature::Tuple(types), AuxValue::Tuple(items)) if types.len() == items.len() => {
            (types, items)
        }
        (_, other) => return Err(mismatch(signature, other)),
    };
    for (t, item) in types.iter().zip(items) {
        e.encode(t, item)?;
    }
    Ok(())
}

fn decode_tuple(d: &mut Decoder<'_>, signature: &TypeSignature) -> Result<AuxValue, CodecError> {
    let types = match signature {
        TypeSignature::Tuple(types) => types,
        other => {
            return Err(CodecError::InvalidSignature {
                signature: other.to_string(),
                reason: "expected a tuple".to_string(),
            })
        }
    };
    let items = types
        .iter()
        .map(|t| d.decode(t))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AuxValue::Tuple(items))
}
