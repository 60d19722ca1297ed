use super::{
    error::Result,
    ser::to_token,
    token::{encode, Token},
    types::Hash,
};

use serde::Serialize;
use sha3::{Digest, Keccak256};

pub fn keccak256(data: &[u8]) -> Hash {
    Hash(Keccak256::digest(data).into())
}

/// `abi.encode(value)` for any serializable value.
pub fn to_bytes<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let token = to_token(value)?;
    Ok(encode(core::slice::from_ref(&token)))
}

/// `keccak256(abi.encode(value))`, the hash used for everything that gets
/// signed.
pub fn to_hash<T>(value: &T) -> Result<Hash>
where
    T: Serialize + ?Sized,
{
    Ok(keccak256(&to_bytes(value)?))
}

pub fn token_hash(token: &Token) -> Hash {
    keccak256(&encode(core::slice::from_ref(token)))
}
