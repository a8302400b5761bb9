//! # Error Definitions
//!
//! Conversion failures. Their `Display` text is what the peer sees in a
//! `call-error` reply, so messages name the value classes involved.

/// Failures while converting between native and wire-neutral values.
#[derive(Debug, Clone)]
pub enum Error {
    /// The value's runtime class is not implicitly convertible to the target.
    TypeCast { expected: String, found: String },
    /// A struct member declared by the schema is absent from the native value.
    MissingField { structure: String, field: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::TypeCast { expected, found } => {
                write!(f, "Cannot cast {} to {}", found, expected)
            }
            Error::MissingField { structure, field } => {
                write!(f, "Value is missing field {} declared by {}", field, structure)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
