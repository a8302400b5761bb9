//! # Native Shape Descriptors
//!
//! Rust has no runtime reflection to enumerate a host type's fields, so every
//! native type that crosses the RPC boundary is described once by a
//! [`NativeShape`]: a descriptor table of its fields and their shapes.
//! Handlers declare their parameters as shapes; the conversion layer walks
//! them instead of walking a live object.
//!
//! ## Invariants
//!
//! - Shape identity is a process-unique [`ShapeId`] stamped at construction.
//!   Identities are never reused, so memoized compatibility results can never
//!   alias a different shape.
//! - Shapes are meant to be built once per native type and shared (they are
//!   cheap to clone); rebuilding a shape per call defeats the compatibility
//!   memo.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use weldwire::Value;

use crate::error::Error;
use crate::error::Result;

static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`NativeShape`].
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct ShapeId(u64);

impl std::fmt::Display for ShapeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shape-{}", self.0)
    }
}

/// The runtime classes a native value can take.
#[derive(Debug)]
pub enum ShapeKind {
    Bool,
    Byte,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Float,
    Double,
    Str,
    /// Accepts any value unchanged.
    Any,
    /// A host struct: named fields with their own shapes, in declaration order.
    Struct(Vec<(String, NativeShape)>),
    List(NativeShape),
    /// String-keyed container with a uniform value shape.
    Map(NativeShape),
}

/// Describes one native type. Cheap to clone; identity-carrying.
#[derive(Clone, Debug)]
pub struct NativeShape(Arc<ShapeRepr>);

#[derive(Debug)]
struct ShapeRepr {
    id: ShapeId,
    name: String,
    kind: ShapeKind,
}

impl NativeShape {
    fn new(name: impl Into<String>, kind: ShapeKind) -> Self {
        let id = ShapeId(NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed));
        NativeShape(Arc::new(ShapeRepr { id, name: name.into(), kind }))
    }

    pub fn bool() -> Self {
        Self::new("bool", ShapeKind::Bool)
    }

    pub fn byte() -> Self {
        Self::new("byte", ShapeKind::Byte)
    }

    pub fn i16() -> Self {
        Self::new("i16", ShapeKind::I16)
    }

    pub fn u16() -> Self {
        Self::new("u16", ShapeKind::U16)
    }

    pub fn i32() -> Self {
        Self::new("i32", ShapeKind::I32)
    }

    pub fn u32() -> Self {
        Self::new("u32", ShapeKind::U32)
    }

    pub fn i64() -> Self {
        Self::new("i64", ShapeKind::I64)
    }

    pub fn u64() -> Self {
        Self::new("u64", ShapeKind::U64)
    }

    pub fn float() -> Self {
        Self::new("float", ShapeKind::Float)
    }

    pub fn double() -> Self {
        Self::new("double", ShapeKind::Double)
    }

    pub fn string() -> Self {
        Self::new("string", ShapeKind::Str)
    }

    pub fn any() -> Self {
        Self::new("any", ShapeKind::Any)
    }

    pub fn record(name: impl Into<String>, fields: Vec<(String, NativeShape)>) -> Self {
        Self::new(name, ShapeKind::Struct(fields))
    }

    pub fn list(element: NativeShape) -> Self {
        let name = format!("list<{}>", element.name());
        Self::new(name, ShapeKind::List(element))
    }

    pub fn map(value: NativeShape) -> Self {
        let name = format!("map<{}>", value.name());
        Self::new(name, ShapeKind::Map(value))
    }

    pub fn id(&self) -> ShapeId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> &ShapeKind {
        &self.0.kind
    }

    /// The zero value a freshly constructed instance of this shape holds.
    pub fn default_value(&self) -> Value {
        match self.kind() {
            ShapeKind::Bool => Value::Bool(false),
            ShapeKind::I16 | ShapeKind::I32 | ShapeKind::I64 => Value::Int(0),
            ShapeKind::Byte | ShapeKind::U16 | ShapeKind::U32 | ShapeKind::U64 => Value::UInt(0),
            ShapeKind::Float | ShapeKind::Double => Value::Float(0.0),
            ShapeKind::Str => Value::Str(String::new()),
            ShapeKind::Any => Value::Null,
            ShapeKind::Struct(fields) => Value::Record(
                fields
                    .iter()
                    .map(|(name, shape)| (name.clone(), shape.default_value()))
                    .collect(),
            ),
            ShapeKind::List(_) => Value::List(Vec::new()),
            ShapeKind::Map(_) => Value::Record(Vec::new()),
        }
    }

    /// Best-effort conversion of a wire value into this shape.
    ///
    /// Used on the schemaless path, where no descriptor narrows the wire
    /// value first. Numeric classes widen implicitly; everything else must
    /// match exactly or the conversion fails with a type-cast error.
    pub fn coerce(&self, value: &Value) -> Result<Value> {
        match self.kind() {
            ShapeKind::Any => Ok(value.clone()),
            ShapeKind::Bool => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                _ => Err(self.cast_error(value)),
            },
            ShapeKind::Byte => self.coerce_unsigned(value, u8::MAX as u64),
            ShapeKind::U16 => self.coerce_unsigned(value, u16::MAX as u64),
            ShapeKind::U32 => self.coerce_unsigned(value, u32::MAX as u64),
            ShapeKind::U64 => self.coerce_unsigned(value, u64::MAX),
            ShapeKind::I16 => self.coerce_signed(value, i16::MIN as i64, i16::MAX as i64),
            ShapeKind::I32 => self.coerce_signed(value, i32::MIN as i64, i32::MAX as i64),
            ShapeKind::I64 => self.coerce_signed(value, i64::MIN, i64::MAX),
            ShapeKind::Float | ShapeKind::Double => match value {
                // The wire "no value" token stands in for a non-finite float.
                Value::Null => Ok(Value::Float(f64::NAN)),
                other => match other.as_f64() {
                    Some(f) => Ok(Value::Float(f)),
                    None => Err(self.cast_error(value)),
                },
            },
            ShapeKind::Str => match value {
                Value::Str(s) => Ok(Value::Str(s.clone())),
                _ => Err(self.cast_error(value)),
            },
            ShapeKind::List(element) => match value {
                Value::List(items) => Ok(Value::List(
                    items.iter().map(|item| element.coerce(item)).collect::<Result<_>>()?,
                )),
                _ => Err(self.cast_error(value)),
            },
            ShapeKind::Map(value_shape) => match value {
                Value::Record(entries) => Ok(Value::Record(
                    entries
                        .iter()
                        .map(|(key, entry)| Ok((key.clone(), value_shape.coerce(entry)?)))
                        .collect::<Result<_>>()?,
                )),
                _ => Err(self.cast_error(value)),
            },
            ShapeKind::Struct(fields) => match value {
                Value::Record(entries) => {
                    let mut out: Vec<(String, Value)> = fields
                        .iter()
                        .map(|(name, shape)| (name.clone(), shape.default_value()))
                        .collect();
                    for (key, entry) in entries {
                        let Some(position) = fields.iter().position(|(name, _)| name == key)
                        else {
                            continue;
                        };
                        out[position].1 = fields[position].1.coerce(entry)?;
                    }
                    Ok(Value::Record(out))
                }
                _ => Err(self.cast_error(value)),
            },
        }
    }

    fn coerce_unsigned(&self, value: &Value, max: u64) -> Result<Value> {
        match value.as_u64() {
            Some(u) if u <= max => Ok(Value::UInt(u)),
            _ => Err(self.cast_error(value)),
        }
    }

    fn coerce_signed(&self, value: &Value, min: i64, max: i64) -> Result<Value> {
        match value.as_i64() {
            Some(i) if i >= min && i <= max => Ok(Value::Int(i)),
            _ => Err(self.cast_error(value)),
        }
    }

    fn cast_error(&self, value: &Value) -> Error {
        Error::TypeCast {
            expected: self.name().to_string(),
            found: value.type_name().to_string(),
        }
    }
}
