//! AMF error type.

use std::io;
use std::num::TryFromIntError;
use std::string::FromUtf8Error;

use scuffle_bytes_util::NotEnoughData;

/// Errors that can occur when encoding or decoding AMF values.
#[derive(Debug, thiserror::Error)]
pub enum AmfError {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// A field declared more bytes than the input holds.
    #[error("truncated input: requested {requested} bytes but only {available} are available")]
    TruncatedInput {
        /// Bytes the field needed.
        requested: usize,
        /// Bytes that were left.
        available: usize,
    },
    /// The value kind cannot be represented in this AMF version.
    #[error("unsupported type: {0}")]
    UnsupportedType(&'static str),
    /// The operation does not exist in this AMF version.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
    /// A known marker that this codec does not decode.
    #[error("unsupported marker: {0:#04x}")]
    UnsupportedMarker(u8),
    /// No class could be instantiated for the class name.
    #[error("cannot instantiate class {class:?}")]
    Instantiation {
        /// The class name from the wire.
        class: String,
    },
    /// A decoded value could not be assigned to a property.
    #[error("cannot assign property {property:?}: {reason}")]
    PropertyAssignment {
        /// The property name.
        property: String,
        /// Why the assignment was rejected.
        reason: String,
    },
    /// A reference pointed outside of its table.
    #[error("invalid {table} reference: {index}")]
    InvalidReference {
        /// The table that was indexed.
        table: &'static str,
        /// The offending index.
        index: usize,
    },
    /// String parse error.
    #[error("string parse error: {0}")]
    StringParse(#[from] FromUtf8Error),
    /// A length did not fit the wire field.
    #[error("value too long: {0}")]
    TooLong(#[from] TryFromIntError),
    /// The integer does not fit into 29 bits.
    #[error("value out of u29 range: {0}")]
    U29OutOfRange(i64),
    /// A number could not be converted into the requested numeric type.
    #[error("cannot coerce {value} into {target}")]
    NumberCoercion {
        /// The decoded number.
        value: f64,
        /// The requested type.
        target: &'static str,
    },
    /// Unexpected type.
    #[error("unexpected type: expected {expected}, got {got}")]
    UnexpectedType {
        /// The expected type.
        expected: &'static str,
        /// The actual type.
        got: &'static str,
    },
    /// Custom error message.
    #[error("{0}")]
    Custom(String),
}

impl From<NotEnoughData> for AmfError {
    fn from(err: NotEnoughData) -> Self {
        Self::TruncatedInput {
            requested: err.requested,
            available: err.available,
        }
    }
}

/// Result type with [`AmfError`].
pub type Result<T> = std::result::Result<T, AmfError>;
