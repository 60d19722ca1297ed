//! Serialize any `&[u8]` as solidity `bytes` (dynamic length bytes).
//!
//! Without this, it would be serialized to a `uint8[]` of fixed or dynamic
//! length.
//!
//! # Example usage
//! ```
//! use serde::Serialize;
//! use perun_apps::abiencode::as_bytes;
//!
//! #[derive(Serialize, Debug)]
//! pub struct Vector {
//!     #[serde(with = "as_bytes")]
//!     pub data: Vec<u8>,
//! }
//! ```

use super::ser::{RawBytes, BYTES_NAME};
use serde::Serializer;

pub fn serialize<S>(v: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_newtype_struct(BYTES_NAME, &RawBytes(v))
}
