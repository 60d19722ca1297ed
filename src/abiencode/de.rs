//! Strict decoder: bytes + [ParamType] → [Token].
//!
//! Only canonical encodings are accepted, see [decode].

use super::{
    error::{Error, Result},
    token::{encode, ParamType, Token, SLOT_SIZE},
    types::{Address, U256},
};

fn slot(data: &[u8], offset: usize) -> Result<&[u8]> {
    let end = offset
        .checked_add(SLOT_SIZE)
        .ok_or(Error::UnexpectedEnd { offset })?;
    data.get(offset..end).ok_or(Error::UnexpectedEnd { offset })
}

fn read_usize(data: &[u8], offset: usize) -> Result<usize> {
    let s = slot(data, offset)?;
    let v = U256::from_big_endian(s);
    // Anything that doesn't fit into the buffer is garbage anyway.
    if v > U256::from(data.len()) {
        return Err(Error::InvalidValue {
            kind: "length or offset",
            offset,
        });
    }
    Ok(v.as_usize())
}

fn read_padded(data: &[u8], offset: usize, len: usize) -> Result<Vec<u8>> {
    let padded = len
        .checked_add(SLOT_SIZE - 1)
        .ok_or(Error::UnexpectedEnd { offset })?
        / SLOT_SIZE
        * SLOT_SIZE;
    let end = offset
        .checked_add(padded)
        .ok_or(Error::UnexpectedEnd { offset })?;
    let chunk = data.get(offset..end).ok_or(Error::UnexpectedEnd { offset })?;
    if chunk[len..].iter().any(|b| *b != 0) {
        return Err(Error::InvalidValue {
            kind: "padding",
            offset,
        });
    }
    Ok(chunk[..len].to_vec())
}

fn decode_token(ty: &ParamType, data: &[u8], offset: usize) -> Result<Token> {
    match ty {
        ParamType::Address => {
            let s = slot(data, offset)?;
            if s[..SLOT_SIZE - 20].iter().any(|b| *b != 0) {
                return Err(Error::InvalidValue {
                    kind: "address",
                    offset,
                });
            }
            let mut addr = Address::default();
            addr.0.copy_from_slice(&s[SLOT_SIZE - 20..]);
            Ok(Token::Address(addr))
        }
        ParamType::Bool => {
            let s = slot(data, offset)?;
            if s[..SLOT_SIZE - 1].iter().any(|b| *b != 0) || s[SLOT_SIZE - 1] > 1 {
                return Err(Error::InvalidValue { kind: "bool", offset });
            }
            Ok(Token::Bool(s[SLOT_SIZE - 1] == 1))
        }
        ParamType::Uint(bits) => {
            let v = U256::from_big_endian(slot(data, offset)?);
            if *bits < 256 && v >> *bits != U256::zero() {
                return Err(Error::InvalidValue { kind: "uint", offset });
            }
            Ok(Token::Uint(v))
        }
        ParamType::Int(bits) => {
            let v = U256::from_big_endian(slot(data, offset)?);
            if *bits < 256 {
                // The bits above the declared width must all equal the sign bit.
                let upper = v >> (*bits - 1);
                let all_ones = U256::MAX >> (*bits - 1);
                if upper != U256::zero() && upper != all_ones {
                    return Err(Error::InvalidValue { kind: "int", offset });
                }
            }
            Ok(Token::Int(v))
        }
        ParamType::FixedBytes(len) => {
            let s = slot(data, offset)?;
            if s[*len..].iter().any(|b| *b != 0) {
                return Err(Error::InvalidValue {
                    kind: "padding",
                    offset,
                });
            }
            Ok(Token::FixedBytes(s[..*len].to_vec()))
        }
        ParamType::Bytes => {
            let len = read_usize(data, offset)?;
            Ok(Token::Bytes(read_padded(data, offset + SLOT_SIZE, len)?))
        }
        ParamType::String => {
            let len = read_usize(data, offset)?;
            let bytes = read_padded(data, offset + SLOT_SIZE, len)?;
            String::from_utf8(bytes)
                .map(Token::String)
                .map_err(|_| Error::InvalidValue {
                    kind: "utf-8 string",
                    offset,
                })
        }
        ParamType::Array(inner) => {
            let len = read_usize(data, offset)?;
            // Every element takes at least one slot, this bounds the
            // allocation below by the input size.
            if len > data.len() / SLOT_SIZE {
                return Err(Error::InvalidValue {
                    kind: "array length",
                    offset,
                });
            }
            let types = vec![inner.as_ref().clone(); len];
            Ok(Token::Array(decode_head_tail(&types, data, offset + SLOT_SIZE)?))
        }
        ParamType::FixedArray(inner, len) => {
            let types = vec![inner.as_ref().clone(); *len];
            Ok(Token::FixedArray(decode_head_tail(&types, data, offset)?))
        }
        ParamType::Tuple(fields) => Ok(Token::Tuple(decode_head_tail(fields, data, offset)?)),
    }
}

fn decode_head_tail(types: &[ParamType], data: &[u8], base: usize) -> Result<Vec<Token>> {
    let mut tokens = Vec::with_capacity(types.len());
    let mut offset = base;
    for ty in types {
        if ty.is_dynamic() {
            let relative = read_usize(data, offset)?;
            let target = base
                .checked_add(relative)
                .ok_or(Error::UnexpectedEnd { offset })?;
            tokens.push(decode_token(ty, data, target)?);
            offset += SLOT_SIZE;
        } else {
            tokens.push(decode_token(ty, data, offset)?);
            offset += ty.head_size();
        }
    }
    Ok(tokens)
}

/// Decode the output of `abi.encode(v)` for a single value of type `ty`.
///
/// The decoded value is encoded again and must reproduce `data` exactly,
/// which rules out trailing bytes, overlapping or unusual offsets and every
/// other way of representing the same value with different bytes.
pub fn decode(ty: &ParamType, data: &[u8]) -> Result<Token> {
    let types = core::slice::from_ref(ty);
    let mut tokens = decode_head_tail(types, data, 0)?;
    let token = tokens.pop().ok_or(Error::UnexpectedEnd { offset: 0 })?;

    if encode(core::slice::from_ref(&token)) != data {
        return Err(Error::NonCanonical);
    }
    Ok(token)
}
