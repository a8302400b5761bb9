//! # Structural Struct Types
//!
//! A [`StructType`] checks compatibility structurally: a native shape
//! satisfies it if every declared member is matched by name and type,
//! regardless of what the native type calls itself. A string-keyed container
//! also qualifies when its value shape satisfies every member.
//!
//! Compatibility walks are reflective-lookup heavy and the same
//! (struct, shape) pairs recur across many calls, so results are memoized by
//! shape identity and never recomputed.

use dashmap::DashMap;

use weldwire::Value;

use crate::descriptor::TypeDescriptor;
use crate::error::Error;
use crate::error::Result;
use crate::shape::NativeShape;
use crate::shape::ShapeId;
use crate::shape::ShapeKind;

/// A schema-declared struct: named members in declaration order.
#[derive(Debug)]
pub struct StructType {
    name: String,
    members: Vec<(String, TypeDescriptor)>,
    compat: DashMap<ShapeId, bool>,
}

impl StructType {
    pub fn new(name: impl Into<String>, members: Vec<(String, TypeDescriptor)>) -> Self {
        StructType {
            name: name.into(),
            members,
            compat: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[(String, TypeDescriptor)] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&TypeDescriptor> {
        self.members
            .iter()
            .find(|(member, _)| member == name)
            .map(|(_, descriptor)| descriptor)
    }

    /// Structural compatibility check, memoized per native-shape identity.
    pub fn can_be_assigned_from(&self, shape: &NativeShape) -> bool {
        if let Some(hit) = self.compat.get(&shape.id()) {
            return *hit;
        }
        let compatible = self.check_shape(shape);
        self.compat.insert(shape.id(), compatible);
        compatible
    }

    fn check_shape(&self, shape: &NativeShape) -> bool {
        match shape.kind() {
            ShapeKind::Struct(fields) => self.members.iter().all(|(name, descriptor)| {
                fields
                    .iter()
                    .find(|(field, _)| field == name)
                    .is_some_and(|(_, field_shape)| descriptor.can_be_assigned_from(field_shape))
            }),
            // A uniform string-keyed container satisfies the struct when its
            // value shape satisfies every member.
            ShapeKind::Map(value_shape) => self
                .members
                .iter()
                .all(|(_, descriptor)| descriptor.can_be_assigned_from(value_shape)),
            _ => false,
        }
    }

    /// Narrows a native value into the wire mapping, member by member in
    /// declaration order.
    pub fn assign_from_native(&self, value: &Value) -> Result<Value> {
        let Value::Record(fields) = value else {
            return Err(Error::TypeCast {
                expected: self.name.clone(),
                found: value.type_name().to_string(),
            });
        };
        let mut out = Vec::with_capacity(self.members.len());
        for (name, descriptor) in &self.members {
            let field = fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, field)| field)
                .ok_or_else(|| Error::MissingField {
                    structure: self.name.clone(),
                    field: name.clone(),
                })?;
            out.push((name.clone(), descriptor.assign_from_native(field)?));
        }
        Ok(Value::Record(out))
    }

    /// Rebuilds a native value of the given shape from the wire mapping.
    ///
    /// A fresh instance of the shape starts from its defaults; every wire key
    /// matching a declared member is converted and assigned, everything else
    /// is ignored. Native fields with no wire counterpart keep their default.
    pub fn assign_to_native(&self, wire: &Value, shape: &NativeShape) -> Result<Value> {
        let Value::Record(entries) = wire else {
            return Err(Error::TypeCast {
                expected: self.name.clone(),
                found: wire.type_name().to_string(),
            });
        };
        match shape.kind() {
            ShapeKind::Struct(fields) => {
                let mut out: Vec<(String, Value)> = fields
                    .iter()
                    .map(|(name, field_shape)| (name.clone(), field_shape.default_value()))
                    .collect();
                for (key, entry) in entries {
                    let Some(descriptor) = self.member(key) else {
                        continue;
                    };
                    let Some(position) = fields.iter().position(|(name, _)| name == key) else {
                        continue;
                    };
                    out[position].1 = descriptor.assign_to_native(entry, &fields[position].1)?;
                }
                Ok(Value::Record(out))
            }
            ShapeKind::Map(value_shape) => {
                let mut out = Vec::with_capacity(entries.len());
                for (key, entry) in entries {
                    let Some(descriptor) = self.member(key) else {
                        continue;
                    };
                    out.push((key.clone(), descriptor.assign_to_native(entry, value_shape)?));
                }
                Ok(Value::Record(out))
            }
            ShapeKind::Any => {
                let value_shape = NativeShape::any();
                let mut out = Vec::with_capacity(entries.len());
                for (key, entry) in entries {
                    let Some(descriptor) = self.member(key) else {
                        continue;
                    };
                    out.push((key.clone(), descriptor.assign_to_native(entry, &value_shape)?));
                }
                Ok(Value::Record(out))
            }
            _ => Err(Error::TypeCast {
                expected: self.name.clone(),
                found: shape.name().to_string(),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_checks(&self) -> usize {
        self.compat.len()
    }
}
