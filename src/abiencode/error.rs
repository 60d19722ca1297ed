//! Error type and Return values used by the encoder, decoder and schema
//! parser.

use serde::ser;
use thiserror::Error;

/// Represents all possible errors that can happen while converting values to
/// and from their ABI representation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The struct contains a type that is not directly representable in
    /// Solidity types.
    ///
    /// For example floating point numbers, maps and enums carrying data. Unit
    /// enum variants are encoded as their index, like Solidity enums.
    #[error("type is not representable in abi encoding: {0}")]
    TypeNotRepresentable(&'static str),
    /// Although the type is representable in Solidity (currently only used for
    /// `char`), the Serializer currently does not implement this functionality.
    #[error("type is not yet implemented: {0}")]
    TypeNotYetSupported(&'static str),
    /// Raised through [ser::Error::custom] by a `Serialize` implementation.
    #[error("{0}")]
    Custom(String),
    /// The schema string could not be parsed.
    #[error("invalid schema `{schema}`: {reason}")]
    InvalidSchema { schema: String, reason: &'static str },
    /// The buffer ended before a complete value could be read.
    #[error("unexpected end of data at offset {offset}")]
    UnexpectedEnd { offset: usize },
    /// A slot holds a value that its declared type does not allow.
    #[error("invalid {kind} at offset {offset}")]
    InvalidValue { kind: &'static str, offset: usize },
    /// The bytes decode, but are not the canonical encoding of the decoded
    /// value (e.g. trailing bytes or unusual offsets).
    #[error("encoding is not canonical")]
    NonCanonical,
    /// A token does not have the shape the caller expected.
    #[error("expected {expected}")]
    UnexpectedToken { expected: &'static str },
}

impl ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: core::fmt::Display,
    {
        Error::Custom(msg.to_string())
    }
}

/// Alias for `Result` using the [Error] returned by this module.
pub type Result<T> = core::result::Result<T, Error>;
