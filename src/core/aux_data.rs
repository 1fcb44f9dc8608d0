//! AuxData: typed, signature-tagged side tables.
//!
//! Every entry pairs a type signature with a value of that shape. Values are
//! held as [`AuxValue`] trees; the [`AuxType`] trait maps ordinary Rust
//! types onto them so callers rarely build trees by hand. Entries read with
//! a signature no codec understands are kept as opaque bytes and written
//! back unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::core::address::Addr;
use crate::core::aux_data_schema::AuxDataSchema;
use crate::core::offset::Offset;
use crate::serialize::error::CodecError;
use crate::serialize::signature::TypeSignature;

/// A value whose shape is described by a [`TypeSignature`].
#[derive(Debug, Clone, PartialEq)]
pub enum AuxValue {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Uuid(Uuid),
    Offset(Offset),
    Address(Addr),
    Sequence(Vec<AuxValue>),
    /// Elements in stream order; distinctness is enforced by the codec
    Set(Vec<AuxValue>),
    /// Pairs in stream order; key distinctness is enforced by the codec
    Mapping(Vec<(AuxValue, AuxValue)>),
    Tuple(Vec<AuxValue>),
}

impl AuxValue {
    /// Short name of the variant, used in shape-mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            AuxValue::Bool(_) => "bool",
            AuxValue::Int8(_) => "int8",
            AuxValue::Int16(_) => "int16",
            AuxValue::Int32(_) => "int32",
            AuxValue::Int64(_) => "int64",
            AuxValue::UInt8(_) => "uint8",
            AuxValue::UInt16(_) => "uint16",
            AuxValue::UInt32(_) => "uint32",
            AuxValue::UInt64(_) => "uint64",
            AuxValue::Float32(_) => "float32",
            AuxValue::Float64(_) => "float64",
            AuxValue::String(_) => "string",
            AuxValue::Uuid(_) => "UUID",
            AuxValue::Offset(_) => "Offset",
            AuxValue::Address(_) => "Address",
            AuxValue::Sequence(_) => "sequence",
            AuxValue::Set(_) => "set",
            AuxValue::Mapping(_) => "mapping",
            AuxValue::Tuple(_) => "tuple",
        }
    }

    /// Whether the value has the shape `signature` declares.
    ///
    /// Named types are opaque to this check; their codec validates them.
    pub fn conforms_to(&self, signature: &TypeSignature) -> bool {
        use TypeSignature as S;
        match (signature, self) {
            (S::Bool, AuxValue::Bool(_))
            | (S::Int8, AuxValue::Int8(_))
            | (S::Int16, AuxValue::Int16(_))
            | (S::Int32, AuxValue::Int32(_))
            | (S::Int64, AuxValue::Int64(_))
            | (S::UInt8, AuxValue::UInt8(_))
            | (S::UInt16, AuxValue::UInt16(_))
            | (S::UInt32, AuxValue::UInt32(_))
            | (S::UInt64, AuxValue::UInt64(_))
            | (S::Float32, AuxValue::Float32(_))
            | (S::Float64, AuxValue::Float64(_))
            | (S::String, AuxValue::String(_))
            | (S::Uuid, AuxValue::Uuid(_))
            | (S::Offset, AuxValue::Offset(_))
            | (S::Address, AuxValue::Address(_)) => true,
            (S::Sequence(t), AuxValue::Sequence(items)) | (S::Set(t), AuxValue::Set(items)) => {
                items.iter().all(|v| v.conforms_to(t))
            }
            (S::Mapping(k, v), AuxValue::Mapping(pairs)) => pairs
                .iter()
                .all(|(key, value)| key.conforms_to(k) && value.conforms_to(v)),
            (S::Tuple(types), AuxValue::Tuple(items)) => {
                types.len() == items.len()
                    && types.iter().zip(items).all(|(t, v)| v.conforms_to(t))
            }
            (S::Named { .. }, _) => true,
            _ => false,
        }
    }
}

fn mismatch(expected: &TypeSignature, found: &AuxValue) -> CodecError {
    CodecError::ShapeMismatch {
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

/// Payload of an AuxData entry.
#[derive(Debug, Clone, PartialEq)]
pub enum AuxBody {
    Value(AuxValue),
    /// Undecoded payload of an entry whose signature had no codec
    Opaque(Vec<u8>),
}

/// One signature-tagged entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxData {
    signature: String,
    body: AuxBody,
}

impl AuxData {
    /// Build an entry, checking that `value` has the declared shape.
    ///
    /// The stored signature is the canonical form of `signature`.
    pub fn new(signature: &str, value: AuxValue) -> Result<Self, CodecError> {
        Self::from_signature(&TypeSignature::parse(signature)?, value)
    }

    /// Like [`AuxData::new`] for an already parsed signature, so callers
    /// that parse with their own nesting cap are not held to the default.
    pub fn from_signature(signature: &TypeSignature, value: AuxValue) -> Result<Self, CodecError> {
        if !value.conforms_to(signature) {
            return Err(mismatch(signature, &value));
        }
        Ok(Self {
            signature: signature.to_string(),
            body: AuxBody::Value(value),
        })
    }

    /// Entry from a Rust value, with the signature implied by its type.
    pub fn from_typed<T: AuxType>(value: &T) -> Self {
        Self {
            signature: T::signature().to_string(),
            body: AuxBody::Value(value.to_aux()),
        }
    }

    /// Entry whose payload is kept verbatim. The signature is not parsed.
    pub fn opaque(signature: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            signature: signature.into(),
            body: AuxBody::Opaque(raw),
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn body(&self) -> &AuxBody {
        &self.body
    }

    pub fn value(&self) -> Option<&AuxValue> {
        match &self.body {
            AuxBody::Value(v) => Some(v),
            AuxBody::Opaque(_) => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self.body, AuxBody::Opaque(_))
    }

    /// Raw payload of an opaque entry.
    pub fn raw(&self) -> Option<&[u8]> {
        match &self.body {
            AuxBody::Opaque(raw) => Some(raw),
            AuxBody::Value(_) => None,
        }
    }

    /// Convert to a Rust value. Fails if the signature is not exactly the
    /// one `T` maps to, or if the entry is opaque.
    pub fn to_typed<T: AuxType>(&self) -> Result<T, CodecError> {
        let expected = T::signature();
        let value = match &self.body {
            AuxBody::Value(v) if self.signature == expected.to_string() => v,
            _ => {
                return Err(CodecError::ShapeMismatch {
                    expected: expected.to_string(),
                    found: self.signature.clone(),
                })
            }
        };
        T::from_aux(value)
    }
}

impl fmt::Display for AuxData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            AuxBody::Value(_) => write!(f, "AuxData<{}>", self.signature),
            AuxBody::Opaque(raw) => {
                write!(f, "AuxData<{}> (opaque, {} bytes)", self.signature, raw.len())
            }
        }
    }
}

/// Name-keyed AuxData table attached to an IR or module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxDataContainer {
    entries: BTreeMap<String, AuxData>,
}

impl AuxDataContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, data: AuxData) -> Option<AuxData> {
        self.entries.insert(key.into(), data)
    }

    pub fn get(&self, key: &str) -> Option<&AuxData> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<AuxData> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AuxData)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store a value under a schema's name and signature.
    pub fn insert_typed<S: AuxDataSchema>(&mut self, value: &S::Value) -> Option<AuxData> {
        self.insert(S::NAME, AuxData::from_typed(value))
    }

    /// Read a schema entry. `Ok(None)` when absent; an error when present
    /// with a different signature.
    pub fn get_typed<S: AuxDataSchema>(&self) -> Result<Option<S::Value>, CodecError> {
        self.get(S::NAME)
            .map(|data| data.to_typed::<S::Value>())
            .transpose()
    }
}

/// Rust types with a fixed AuxData signature.
pub trait AuxType: Sized {
    fn signature() -> TypeSignature;
    fn to_aux(&self) -> AuxValue;
    fn from_aux(value: &AuxValue) -> Result<Self, CodecError>;
}

macro_rules! impl_aux_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl AuxType for $ty {
                fn signature() -> TypeSignature {
                    TypeSignature::$variant
                }

                fn to_aux(&self) -> AuxValue {
                    AuxValue::$variant(self.clone())
                }

                fn from_aux(value: &AuxValue) -> Result<Self, CodecError> {
                    match value {
                        AuxValue::$variant(v) => Ok(v.clone()),
                        other => Err(mismatch(&Self::signature(), other)),
                    }
                }
            }
        )*
    };
}

impl_aux_scalar! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    Uuid => Uuid,
    Offset => Offset,
    Addr => Address,
}

impl<T: AuxType> AuxType for Vec<T> {
    fn signature() -> TypeSignature {
        TypeSignature::sequence(T::signature())
    }

    fn to_aux(&self) -> AuxValue {
        AuxValue::Sequence(self.iter().map(AuxType::to_aux).collect())
    }

    fn from_aux(value: &AuxValue) -> Result<Self, CodecError> {
        match value {
            AuxValue::Sequence(items) => items.iter().map(T::from_aux).collect(),
            other => Err(mismatch(&Self::signature(), other)),
        }
    }
}

impl<T: AuxType + Ord> AuxType for BTreeSet<T> {
    fn signature() -> TypeSignature {
        TypeSignature::set(T::signature())
    }

    fn to_aux(&self) -> AuxValue {
        AuxValue::Set(self.iter().map(AuxType::to_aux).collect())
    }

    fn from_aux(value: &AuxValue) -> Result<Self, CodecError> {
        match value {
            AuxValue::Set(items) => items.iter().map(T::from_aux).collect(),
            other => Err(mismatch(&Self::signature(), other)),
        }
    }
}

impl<K: AuxType + Ord, V: AuxType> AuxType for BTreeMap<K, V> {
    fn signature() -> TypeSignature {
        TypeSignature::mapping(K::signature(), V::signature())
    }

    fn to_aux(&self) -> AuxValue {
        AuxValue::Mapping(self.iter().map(|(k, v)| (k.to_aux(), v.to_aux())).collect())
    }

    fn from_aux(value: &AuxValue) -> Result<Self, CodecError> {
        match value {
            AuxValue::Mapping(pairs) => pairs
                .iter()
                .map(|(k, v)| Ok((K::from_aux(k)?, V::from_aux(v)?)))
                .collect(),
            other => Err(mismatch(&Self::signature(), other)),
        }
    }
}

macro_rules! impl_aux_tuple {
    ($len:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: AuxType),+> AuxType for ($($name,)+) {
            fn signature() -> TypeSignature {
                TypeSignature::Tuple(vec![$($name::signature()),+])
            }

            fn to_aux(&self) -> AuxValue {
                AuxValue::Tuple(vec![$(self.$idx.to_aux()),+])
            }

            fn from_aux(value: &AuxValue) -> Result<Self, CodecError> {
                match value {
                    AuxValue::Tuple(items) if items.len() == $len => {
                        Ok(($($name::from_aux(&items[$idx])?,)+))
                    }
                    other => Err(mismatch(&Self::signature(), other)),
                }
            }
        }
    };
}

impl_aux_tuple!(1; A: 0);
impl_aux_tuple!(2; A: 0, B: 1);
impl_aux_tuple!(3; A: 0, B: 1, C: 2);
impl_aux_tuple!(4; A: 0, B: 1, C: 2, D: 3);
impl_aux_tuple!(5; A: 0, B: 1, C: 2, D: 3, E: 4);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aux_data_schema::{Alignment, Comments, FunctionBlocks};

    #[test]
    fn test_new_checks_shape() {
        let ok = AuxData::new("sequence< uint8 >", AuxValue::Sequence(vec![AuxValue::UInt8(1)]));
        assert_eq!(ok.unwrap().signature(), "sequence<uint8>");

        let err = AuxData::new("sequence<uint8>", AuxValue::Sequence(vec![AuxValue::Int8(1)]))
            .unwrap_err();
        assert!(matches!(err, CodecError::ShapeMismatch { .. }));

        let err = AuxData::new(
            "tuple<bool,string>",
            AuxValue::Tuple(vec![AuxValue::Bool(true)]),
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_typed_signatures() {
        assert_eq!(
            <BTreeMap<Uuid, Vec<Offset>>>::signature().to_string(),
            "mapping<UUID,sequence<Offset>>"
        );
        assert_eq!(
            <(u64, String, Addr)>::signature().to_string(),
            "tuple<uint64,string,Address>"
        );
        assert_eq!(<BTreeSet<i32>>::signature().to_string(), "set<int32>");
    }

    #[test]
    fn test_typed_conversion() {
        let value: BTreeMap<String, (bool, f64)> =
            [("a".to_string(), (true, 1.5))].into_iter().collect();
        let data = AuxData::from_typed(&value);
        assert_eq!(data.signature(), "mapping<string,tuple<bool,float64>>");
        assert_eq!(data.to_typed::<BTreeMap<String, (bool, f64)>>().unwrap(), value);
        assert!(data.to_typed::<BTreeMap<String, (bool, f32)>>().is_err());
    }

    #[test]
    fn test_opaque_entries() {
        let data = AuxData::opaque("someToolPrivate<int128>", vec![1, 2, 3]);
        assert!(data.is_opaque());
        assert_eq!(data.raw(), Some(&[1u8, 2, 3][..]));
        assert!(data.value().is_none());
        assert!(data.to_typed::<u64>().is_err());
    }

    #[test]
    fn test_container_schemas() {
        let mut aux = AuxDataContainer::new();
        let function = Uuid::from_u128(1);
        let blocks: BTreeMap<Uuid, BTreeSet<Uuid>> =
            [(function, [Uuid::from_u128(2), Uuid::from_u128(3)].into_iter().collect())]
                .into_iter()
                .collect();
        aux.insert_typed::<FunctionBlocks>(&blocks);

        assert_eq!(aux.get_typed::<FunctionBlocks>().unwrap(), Some(blocks));
        assert_eq!(aux.get_typed::<Comments>().unwrap(), None);

        // Same name, wrong signature.
        aux.insert("alignment", AuxData::from_typed(&7u64));
        assert!(aux.get_typed::<Alignment>().is_err());

        assert_eq!(aux.keys().collect::<Vec<_>>(), vec!["alignment", "functionBlocks"]);
        assert!(aux.remove("alignment").is_some());
        assert_eq!(aux.len(), 1);
    }
}
