//! # Type Descriptors
//!
//! A [`TypeDescriptor`] is one schema-declared type and its conversion rules.
//! Conversion is always directed: `assign_from_native` narrows a native value
//! into its wire form, `assign_to_native` rebuilds a native value of a given
//! [`NativeShape`] from a wire value.

use std::sync::Arc;

use weldwire::Value;

use crate::error::Error;
use crate::error::Result;
use crate::shape::NativeShape;
use crate::shape::ShapeKind;
use crate::structure::StructType;

/// The primitive schema types and their implicit-compatibility rules.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrimitiveKind {
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
    /// Accepts anything.
    Any,
}

impl PrimitiveKind {
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::I16 => "i16",
            PrimitiveKind::U16 => "u16",
            PrimitiveKind::I32 => "i32",
            PrimitiveKind::U32 => "u32",
            PrimitiveKind::I64 => "i64",
            PrimitiveKind::U64 => "u64",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
            PrimitiveKind::Str => "string",
            PrimitiveKind::Any => "any",
        }
    }

    /// Whether a native shape is implicitly convertible to this kind.
    ///
    /// Integer widths widen in the usual implicit directions; nothing ever
    /// narrows. Signedness only widens into a strictly larger signed width.
    pub fn accepts_shape(&self, kind: &ShapeKind) -> bool {
        use ShapeKind as S;
        match self {
            PrimitiveKind::Any => true,
            PrimitiveKind::Bool => matches!(kind, S::Bool),
            PrimitiveKind::Byte => matches!(kind, S::Byte),
            PrimitiveKind::I16 => matches!(kind, S::Byte | S::I16),
            PrimitiveKind::U16 => matches!(kind, S::Byte | S::U16),
            PrimitiveKind::I32 => matches!(kind, S::Byte | S::I16 | S::U16 | S::I32),
            PrimitiveKind::U32 => matches!(kind, S::Byte | S::U16 | S::U32),
            PrimitiveKind::I64 => {
                matches!(kind, S::Byte | S::I16 | S::U16 | S::I32 | S::U32 | S::I64)
            }
            PrimitiveKind::U64 => matches!(kind, S::Byte | S::U16 | S::U32 | S::U64),
            PrimitiveKind::Float => matches!(
                kind,
                S::Byte | S::I16 | S::U16 | S::I32 | S::U32 | S::I64 | S::U64 | S::Float
            ),
            PrimitiveKind::Double => matches!(
                kind,
                S::Byte
                    | S::I16
                    | S::U16
                    | S::I32
                    | S::U32
                    | S::I64
                    | S::U64
                    | S::Float
                    | S::Double
            ),
            PrimitiveKind::Str => matches!(kind, S::Str),
        }
    }

    /// Whether a concrete value satisfies this kind at runtime.
    pub fn accepts_value(&self, value: &Value) -> bool {
        match self {
            PrimitiveKind::Any => true,
            PrimitiveKind::Bool => matches!(value, Value::Bool(_)),
            PrimitiveKind::Byte => matches!(value.as_u64(), Some(u) if u <= u8::MAX as u64),
            PrimitiveKind::U16 => matches!(value.as_u64(), Some(u) if u <= u16::MAX as u64),
            PrimitiveKind::U32 => matches!(value.as_u64(), Some(u) if u <= u32::MAX as u64),
            PrimitiveKind::U64 => value.as_u64().is_some(),
            PrimitiveKind::I16 => {
                matches!(value.as_i64(), Some(i) if i >= i16::MIN as i64 && i <= i16::MAX as i64)
            }
            PrimitiveKind::I32 => {
                matches!(value.as_i64(), Some(i) if i >= i32::MIN as i64 && i <= i32::MAX as i64)
            }
            PrimitiveKind::I64 => value.as_i64().is_some(),
            PrimitiveKind::Float | PrimitiveKind::Double => {
                matches!(value, Value::Null) || value.as_f64().is_some()
            }
            PrimitiveKind::Str => matches!(value, Value::Str(_)),
        }
    }
}

/// One schema type: a primitive, a struct, or a homogeneous container.
#[derive(Clone, Debug)]
pub enum TypeDescriptor {
    Primitive(PrimitiveKind),
    Struct(Arc<StructType>),
    Array(Box<TypeDescriptor>),
    /// String-keyed mapping with a uniform value type.
    Map(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    pub fn name(&self) -> String {
        match self {
            TypeDescriptor::Primitive(kind) => kind.name().to_string(),
            TypeDescriptor::Struct(structure) => structure.name().to_string(),
            TypeDescriptor::Array(element) => format!("array<{}>", element.name()),
            TypeDescriptor::Map(value) => format!("map<{}>", value.name()),
        }
    }

    /// Whether values of the described native shape can be narrowed into
    /// this schema type.
    pub fn can_be_assigned_from(&self, shape: &NativeShape) -> bool {
        match self {
            TypeDescriptor::Primitive(kind) => kind.accepts_shape(shape.kind()),
            TypeDescriptor::Struct(structure) => structure.can_be_assigned_from(shape),
            TypeDescriptor::Array(element) => match shape.kind() {
                ShapeKind::List(element_shape) => element.can_be_assigned_from(element_shape),
                _ => false,
            },
            TypeDescriptor::Map(value) => match shape.kind() {
                ShapeKind::Map(value_shape) => value.can_be_assigned_from(value_shape),
                _ => false,
            },
        }
    }

    /// Narrows a native value into its wire form.
    pub fn assign_from_native(&self, value: &Value) -> Result<Value> {
        match self {
            TypeDescriptor::Primitive(kind) => {
                if kind.accepts_value(value) {
                    Ok(value.clone().normalized())
                } else {
                    Err(self.cast_error(value))
                }
            }
            TypeDescriptor::Struct(structure) => structure.assign_from_native(value),
            TypeDescriptor::Array(element) => match value {
                Value::List(items) => Ok(Value::List(
                    items
                        .iter()
                        .map(|item| element.assign_from_native(item))
                        .collect::<Result<_>>()?,
                )),
                _ => Err(self.cast_error(value)),
            },
            TypeDescriptor::Map(value_descriptor) => match value {
                Value::Record(entries) => Ok(Value::Record(
                    entries
                        .iter()
                        .map(|(key, entry)| {
                            Ok((key.clone(), value_descriptor.assign_from_native(entry)?))
                        })
                        .collect::<Result<_>>()?,
                )),
                _ => Err(self.cast_error(value)),
            },
        }
    }

    /// Rebuilds a native value of the given shape from a wire value.
    pub fn assign_to_native(&self, wire: &Value, shape: &NativeShape) -> Result<Value> {
        match self {
            TypeDescriptor::Primitive(kind) => {
                if kind.accepts_value(wire) {
                    shape.coerce(wire)
                } else {
                    Err(self.cast_error(wire))
                }
            }
            TypeDescriptor::Struct(structure) => structure.assign_to_native(wire, shape),
            TypeDescriptor::Array(element) => match (wire, shape.kind()) {
                (Value::List(items), ShapeKind::List(element_shape)) => Ok(Value::List(
                    items
                        .iter()
                        .map(|item| element.assign_to_native(item, element_shape))
                        .collect::<Result<_>>()?,
                )),
                (Value::List(items), ShapeKind::Any) => {
                    let element_shape = NativeShape::any();
                    Ok(Value::List(
                        items
                            .iter()
                            .map(|item| element.assign_to_native(item, &element_shape))
                            .collect::<Result<_>>()?,
                    ))
                }
                _ => Err(self.cast_error(wire)),
            },
            TypeDescriptor::Map(value_descriptor) => match (wire, shape.kind()) {
                (Value::Record(entries), ShapeKind::Map(value_shape)) => Ok(Value::Record(
                    entries
                        .iter()
                        .map(|(key, entry)| {
                            Ok((
                                key.clone(),
                                value_descriptor.assign_to_native(entry, value_shape)?,
                            ))
                        })
                        .collect::<Result<_>>()?,
                )),
                (Value::Record(entries), ShapeKind::Any) => {
                    let value_shape = NativeShape::any();
                    Ok(Value::Record(
                        entries
                            .iter()
                            .map(|(key, entry)| {
                                Ok((
                                    key.clone(),
                                    value_descriptor.assign_to_native(entry, &value_shape)?,
                                ))
                            })
                            .collect::<Result<_>>()?,
                    ))
                }
                _ => Err(self.cast_error(wire)),
            },
        }
    }

    fn cast_error(&self, value: &Value) -> Error {
        Error::TypeCast {
            expected: self.name(),
            found: value.type_name().to_string(),
        }
    }
}
