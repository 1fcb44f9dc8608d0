//! Type-signature grammar for AuxData payloads.
//!
//! ```text
//! Primitive := bool | int8 | int16 | int32 | int64 | uint8 | uint16
//!            | uint32 | uint64 | float32 | float64 | string | UUID
//!            | Offset | Address
//! Composite := mapping<K,V> | set<T> | sequence<T> | tuple<T1,...,Tn>
//! ```
//!
//! Any other identifier parses as [`TypeSignature::Named`], so signatures
//! written by newer tools still parse and can be looked up in the codec
//! registry (and preserved opaquely when no codec is known). Whitespace is
//! accepted between tokens; the canonical form produced by `Display` has
//! none.

use std::fmt;
use std::str::FromStr;

use crate::serialize::error::CodecError;

/// Default cap on signature nesting.
pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSignature {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
    Uuid,
    Offset,
    Address,
    Sequence(Box<TypeSignature>),
    Set(Box<TypeSignature>),
    Mapping(Box<TypeSignature>, Box<TypeSignature>),
    Tuple(Vec<TypeSignature>),
    /// A type this grammar does not define, kept by name
    Named {
        name: String,
        args: Vec<TypeSignature>,
    },
}

impl TypeSignature {
    pub fn parse(input: &str) -> Result<Self, CodecError> {
        Self::parse_with_depth(input, DEFAULT_MAX_DEPTH)
    }

    /// Parse, rejecting signatures nested deeper than `max_depth`.
    pub fn parse_with_depth(input: &str, max_depth: usize) -> Result<Self, CodecError> {
        let mut parser = Parser {
            input,
            pos: 0,
            max_depth,
        };
        let signature = parser.parse_type(1)?;
        parser.skip_whitespace();
        if parser.pos != input.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(signature)
    }

    pub fn sequence(element: TypeSignature) -> Self {
        TypeSignature::Sequence(Box::new(element))
    }

    pub fn set(element: TypeSignature) -> Self {
        TypeSignature::Set(Box::new(element))
    }

    pub fn mapping(key: TypeSignature, value: TypeSignature) -> Self {
        TypeSignature::Mapping(Box::new(key), Box::new(value))
    }

    /// Constructor or primitive name, e.g. `mapping` or `uint64`.
    pub fn name(&self) -> &str {
        match self {
            TypeSignature::Bool => "bool",
            TypeSignature::Int8 => "int8",
            TypeSignature::Int16 => "int16",
            TypeSignature::Int32 => "int32",
            TypeSignature::Int64 => "int64",
            TypeSignature::UInt8 => "uint8",
            TypeSignature::UInt16 => "uint16",
            TypeSignature::UInt32 => "uint32",
            TypeSignature::UInt64 => "uint64",
            TypeSignature::Float32 => "float32",
            TypeSignature::Float64 => "float64",
            TypeSignature::String => "string",
            TypeSignature::Uuid => "UUID",
            TypeSignature::Offset => "Offset",
            TypeSignature::Address => "Address",
            TypeSignature::Sequence(_) => "sequence",
            TypeSignature::Set(_) => "set",
            TypeSignature::Mapping(_, _) => "mapping",
            TypeSignature::Tuple(_) => "tuple",
            TypeSignature::Named { name, .. } => name,
        }
    }

    /// Nested type arguments in order.
    pub fn args(&self) -> Vec<&TypeSignature> {
        match self {
            TypeSignature::Sequence(t) | TypeSignature::Set(t) => vec![t.as_ref()],
            TypeSignature::Mapping(k, v) => vec![k.as_ref(), v.as_ref()],
            TypeSignature::Tuple(items) | TypeSignature::Named { args: items, .. } => {
                items.iter().collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn is_primitive(&self) -> bool {
        primitive(self.name()).is_some() && !matches!(self, TypeSignature::Named { .. })
    }

    /// Nesting depth; a primitive has depth 1.
    pub fn depth(&self) -> usize {
        1 + self.args().iter().map(|a| a.depth()).max().unwrap_or(0)
    }
}

fn primitive(name: &str) -> Option<TypeSignature> {
    let sig = match name {
        "bool" => TypeSignature::Bool,
        "int8" => TypeSignature::Int8,
        "int16" => TypeSignature::Int16,
        "int32" => TypeSignature::Int32,
        "int64" => TypeSignature::Int64,
        "uint8" => TypeSignature::UInt8,
        "uint16" => TypeSignature::UInt16,
        "uint32" => TypeSignature::UInt32,
        "uint64" => TypeSignature::UInt64,
        "float32" => TypeSignature::Float32,
        "float64" => TypeSignature::Float64,
        "string" => TypeSignature::String,
        "UUID" => TypeSignature::Uuid,
        "Offset" => TypeSignature::Offset,
        "Address" => TypeSignature::Address,
        _ => return None,
    };
    Some(sig)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    max_depth: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> CodecError {
        CodecError::InvalidSignature {
            signature: self.input.to_string(),
            reason: format!("{} at position {}", reason, self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn identifier(&mut self) -> &str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_' || c == ':') {
                break;
            }
            self.pos += 1;
        }
        &self.input[start..self.pos]
    }

    fn parse_type(&mut self, depth: usize) -> Result<TypeSignature, CodecError> {
        if depth > self.max_depth {
            return Err(CodecError::NestingTooDeep {
                limit: self.max_depth,
            });
        }
        self.skip_whitespace();
        let name = self.identifier().to_string();
        if name.is_empty() {
            return Err(self.error("expected type name"));
        }
        self.skip_whitespace();

        let mut args = Vec::new();
        if self.peek() == Some('<') {
            self.pos += 1;
            loop {
                args.push(self.parse_type(depth + 1)?);
                self.skip_whitespace();
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some('>') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or '>'")),
                }
            }
        }
        self.build(name, args)
    }

    fn arity_error(&self, name: &str, expected: &str, found: usize) -> CodecError {
        self.error(&format!(
            "{} expects {} type argument(s), found {}",
            name, expected, found
        ))
    }

    fn build(&self, name: String, mut args: Vec<TypeSignature>) -> Result<TypeSignature, CodecError> {
        if let Some(sig) = primitive(&name) {
            if !args.is_empty() {
                return Err(self.error(&format!("{} takes no type arguments", name)));
            }
            return Ok(sig);
        }
        if name == "sequence" || name == "set" {
            if args.len() != 1 {
                return Err(self.arity_error(&name, "1", args.len()));
            }
            let element = Box::new(args.remove(0));
            Ok(if name == "set" {
                TypeSignature::Set(element)
            } else {
                TypeSignature::Sequence(element)
            })
        } else if name == "mapping" {
            if args.len() != 2 {
                return Err(self.arity_error(&name, "2", args.len()));
            }
            let value = args.remove(1);
            let key = args.remove(0);
            Ok(TypeSignature::mapping(key, value))
        } else if name == "tuple" {
            if args.is_empty() {
                return Err(self.arity_error(&name, "at least 1", 0));
            }
            Ok(TypeSignature::Tuple(args))
        } else {
            Ok(TypeSignature::Named { name, args })
        }
    }
}

impl FromStr for TypeSignature {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeSignature::parse(s)
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        let args = self.args();
        if !args.is_empty() {
            write!(f, "<")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}
