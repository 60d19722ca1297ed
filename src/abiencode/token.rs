//! In-memory representation of ABI values and their types, plus the head/tail
//! encoder.
//!
//! Both the serde front-end ([super::to_token]) and the strict decoder
//! ([super::decode]) produce [Token]s, so there is exactly one place that
//! decides on the byte layout.

use super::{
    error::{Error, Result},
    types::{Address, Hash, U256},
};

pub(crate) const SLOT_SIZE: usize = 32; // bytes

/// Solidity type of a value, as described by a schema string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Bool,
    String,
    Bytes,
    /// `bytesN` with `1 <= N <= 32`.
    FixedBytes(usize),
    /// `uintN`, the width is given in bits.
    Uint(usize),
    /// `intN`, the width is given in bits.
    Int(usize),
    Array(Box<ParamType>),
    FixedArray(Box<ParamType>, usize),
    Tuple(Vec<ParamType>),
}

impl ParamType {
    pub fn is_dynamic(&self) -> bool {
        match self {
            ParamType::String | ParamType::Bytes | ParamType::Array(_) => true,
            ParamType::FixedArray(inner, len) => *len > 0 && inner.is_dynamic(),
            ParamType::Tuple(fields) => fields.iter().any(ParamType::is_dynamic),
            _ => false,
        }
    }

    /// Number of bytes the type occupies in the head of its enclosing tuple.
    pub(crate) fn head_size(&self) -> usize {
        if self.is_dynamic() {
            return SLOT_SIZE;
        }
        match self {
            ParamType::FixedArray(inner, len) => inner.head_size() * len,
            ParamType::Tuple(fields) => fields.iter().map(ParamType::head_size).sum(),
            _ => SLOT_SIZE,
        }
    }
}

/// A single ABI value.
///
/// Fixed-size arrays and tuples have the same encoding, which is why the serde
/// front-end only ever produces [Token::Tuple] for both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    /// Left aligned, at most 32 bytes.
    FixedBytes(Vec<u8>),
    Uint(U256),
    /// Two's complement representation.
    Int(U256),
    Array(Vec<Token>),
    FixedArray(Vec<Token>),
    Tuple(Vec<Token>),
}

impl Token {
    pub fn is_dynamic(&self) -> bool {
        match self {
            Token::String(_) | Token::Bytes(_) | Token::Array(_) => true,
            Token::FixedBytes(b) => b.len() > SLOT_SIZE,
            Token::FixedArray(items) | Token::Tuple(items) => items.iter().any(Token::is_dynamic),
            _ => false,
        }
    }

    fn head_size(&self) -> usize {
        if self.is_dynamic() {
            return SLOT_SIZE;
        }
        match self {
            Token::FixedArray(items) | Token::Tuple(items) => {
                items.iter().map(Token::head_size).sum()
            }
            _ => SLOT_SIZE,
        }
    }

    pub fn into_tuple(self) -> Result<Vec<Token>> {
        match self {
            Token::Tuple(items) | Token::FixedArray(items) => Ok(items),
            _ => Err(Error::UnexpectedToken { expected: "tuple" }),
        }
    }

    /// Accepts dynamic arrays, fixed arrays and tuples, since all of them can
    /// represent a sequence of equally typed values.
    pub fn into_array(self) -> Result<Vec<Token>> {
        match self {
            Token::Array(items) | Token::FixedArray(items) | Token::Tuple(items) => Ok(items),
            _ => Err(Error::UnexpectedToken { expected: "array" }),
        }
    }

    pub fn into_uint(self) -> Result<U256> {
        match self {
            Token::Uint(v) => Ok(v),
            _ => Err(Error::UnexpectedToken { expected: "uint" }),
        }
    }

    pub fn into_address(self) -> Result<Address> {
        match self {
            Token::Address(a) => Ok(a),
            _ => Err(Error::UnexpectedToken { expected: "address" }),
        }
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            Token::Bool(b) => Ok(b),
            _ => Err(Error::UnexpectedToken { expected: "bool" }),
        }
    }

    pub fn into_bytes32(self) -> Result<Hash> {
        match self {
            Token::FixedBytes(b) if b.len() == 32 => {
                let mut hash = Hash::default();
                hash.0.copy_from_slice(&b);
                Ok(hash)
            }
            _ => Err(Error::UnexpectedToken { expected: "bytes32" }),
        }
    }
}

fn word(v: usize) -> [u8; SLOT_SIZE] {
    U256::from(v).to_be_bytes()
}

fn write_padded(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
    let r = data.len() % SLOT_SIZE;
    if r != 0 {
        out.extend(core::iter::repeat(0u8).take(SLOT_SIZE - r));
    }
}

fn write_token(out: &mut Vec<u8>, token: &Token) {
    match token {
        Token::Address(a) => {
            out.extend_from_slice(&[0u8; SLOT_SIZE - 20]);
            out.extend_from_slice(&a.0);
        }
        Token::Bool(b) => out.extend_from_slice(&word(*b as usize)),
        Token::Uint(v) | Token::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        Token::FixedBytes(b) if b.len() <= SLOT_SIZE => {
            let mut slot = [0u8; SLOT_SIZE];
            slot[..b.len()].copy_from_slice(b);
            out.extend_from_slice(&slot);
        }
        Token::FixedBytes(b) | Token::Bytes(b) => {
            out.extend_from_slice(&word(b.len()));
            write_padded(out, b);
        }
        Token::String(s) => {
            out.extend_from_slice(&word(s.len()));
            write_padded(out, s.as_bytes());
        }
        Token::Array(items) => {
            out.extend_from_slice(&word(items.len()));
            write_head_tail(out, items);
        }
        Token::FixedArray(items) | Token::Tuple(items) => write_head_tail(out, items),
    }
}

/// Writes the static parts (and offsets for the dynamic ones) first, followed
/// by the dynamic parts. Offsets are relative to the start of the head.
fn write_head_tail(out: &mut Vec<u8>, tokens: &[Token]) {
    let head_size: usize = tokens.iter().map(Token::head_size).sum();
    let mut tail = Vec::new();
    for token in tokens {
        if token.is_dynamic() {
            out.extend_from_slice(&word(head_size + tail.len()));
            write_token(&mut tail, token);
        } else {
            write_token(out, token);
        }
    }
    out.extend_from_slice(&tail);
}

/// Encodes the tokens like Solidity's `abi.encode(t1, t2, ...)`.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let mut out = Vec::new();
    write_head_tail(&mut out, tokens);
    out
}
