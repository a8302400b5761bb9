//! Schema types and structural value conversion for the weld RPC protocol.

mod descriptor;
mod error;
mod schema;
mod shape;
mod structure;


pub use crate::descriptor::PrimitiveKind;
pub use crate::descriptor::TypeDescriptor;

pub use crate::error::Error;
pub use crate::error::Result;

pub use crate::schema::FunctionSig;
pub use crate::schema::Schema;

pub use crate::shape::NativeShape;
pub use crate::shape::ShapeId;
pub use crate::shape::ShapeKind;

pub use crate::structure::StructType;
