//! Serde front-end: turns any `T: Serialize` into a [Token] tree.
//!
//! The serde data model has no notion of `address`, `uint256` or dynamic
//! `bytes`, so those are passed through as newtype structs with reserved
//! names (see [ADDRESS_NAME], [UINT_NAME] and [BYTES_NAME]). The names have no
//! special meaning, they have just been chosen in a way that normal Rust types
//! will never have them.

use super::{
    error::{Error, Result},
    token::Token,
    types::{Address, U256},
};
use serde::{
    ser::{self, Impossible},
    Serialize,
};

pub(crate) const ADDRESS_NAME: &str = ":$&_ADDRESS";
pub(crate) const UINT_NAME: &str = ":$&_UINT256";
pub(crate) const BYTES_NAME: &str = ":$&_BYTES";

/// Internal data structure allowing us to serialize a slice using
/// `serialize_bytes`, which cannot be selected when calling
/// `serialize_newtype_struct`.
pub(crate) struct RawBytes<'a>(pub &'a [u8]);

impl<'a> Serialize for RawBytes<'a> {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_bytes(self.0)
    }
}

/// Convert a value into its ABI [Token] representation.
pub fn to_token<T>(value: &T) -> Result<Token>
where
    T: Serialize + ?Sized,
{
    value.serialize(TokenSerializer)
}

fn int_to_u256(v: i128) -> U256 {
    if v >= 0 {
        U256::from(v as u128)
    } else {
        // Two's complement: -x == !(x - 1)
        !U256::from((-(v + 1)) as u128)
    }
}

pub struct TokenSerializer;

impl ser::Serializer for TokenSerializer {
    type Ok = Token;
    type Error = Error;

    type SerializeSeq = SeqSerializer;
    type SerializeTuple = SeqSerializer;
    type SerializeTupleStruct = SeqSerializer;
    type SerializeTupleVariant = Impossible<Token, Error>;
    type SerializeMap = Impossible<Token, Error>;
    type SerializeStruct = SeqSerializer;
    type SerializeStructVariant = Impossible<Token, Error>;

    fn serialize_bool(self, v: bool) -> Result<Token> {
        Ok(Token::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Token> {
        self.serialize_i128(v as i128)
    }

    fn serialize_i16(self, v: i16) -> Result<Token> {
        self.serialize_i128(v as i128)
    }

    fn serialize_i32(self, v: i32) -> Result<Token> {
        self.serialize_i128(v as i128)
    }

    fn serialize_i64(self, v: i64) -> Result<Token> {
        self.serialize_i128(v as i128)
    }

    fn serialize_i128(self, v: i128) -> Result<Token> {
        Ok(Token::Int(int_to_u256(v)))
    }

    fn serialize_u8(self, v: u8) -> Result<Token> {
        self.serialize_u128(v as u128)
    }

    fn serialize_u16(self, v: u16) -> Result<Token> {
        self.serialize_u128(v as u128)
    }

    fn serialize_u32(self, v: u32) -> Result<Token> {
        self.serialize_u128(v as u128)
    }

    fn serialize_u64(self, v: u64) -> Result<Token> {
        self.serialize_u128(v as u128)
    }

    fn serialize_u128(self, v: u128) -> Result<Token> {
        Ok(Token::Uint(U256::from(v)))
    }

    fn serialize_f32(self, _: f32) -> Result<Token> {
        Err(Error::TypeNotRepresentable("f32"))
    }

    fn serialize_f64(self, _: f64) -> Result<Token> {
        Err(Error::TypeNotRepresentable("f64"))
    }

    fn serialize_char(self, _: char) -> Result<Token> {
        Err(Error::TypeNotYetSupported("char"))
    }

    fn serialize_str(self, v: &str) -> Result<Token> {
        Ok(Token::String(v.to_owned()))
    }

    // Fixed-size byte arrays up to a slot are bytesN. Anything longer cannot
    // be a bytesN and is written as dynamic bytes instead.
    fn serialize_bytes(self, v: &[u8]) -> Result<Token> {
        if v.len() <= 32 {
            Ok(Token::FixedBytes(v.to_vec()))
        } else {
            Ok(Token::Bytes(v.to_vec()))
        }
    }

    fn serialize_none(self) -> Result<Token> {
        Err(Error::TypeNotRepresentable("Option::None"))
    }

    fn serialize_some<T>(self, value: &T) -> Result<Token>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Token> {
        Ok(Token::Tuple(Vec::new()))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Token> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
    ) -> Result<Token> {
        // Same as Solidity enums.
        Ok(Token::Uint(U256::from(variant_index)))
    }

    fn serialize_newtype_struct<T>(self, name: &'static str, value: &T) -> Result<Token>
    where
        T: ?Sized + Serialize,
    {
        let inner = value.serialize(TokenSerializer)?;
        match (name, inner) {
            (ADDRESS_NAME, Token::FixedBytes(b)) if b.len() == 20 => {
                let mut addr = Address::default();
                addr.0.copy_from_slice(&b);
                Ok(Token::Address(addr))
            }
            (UINT_NAME, Token::FixedBytes(b)) if b.len() == 32 => {
                Ok(Token::Uint(U256::from_big_endian(&b)))
            }
            (BYTES_NAME, Token::FixedBytes(b) | Token::Bytes(b)) => Ok(Token::Bytes(b)),
            (ADDRESS_NAME | UINT_NAME | BYTES_NAME, _) => {
                Err(Error::Custom(format!("malformed value for {}", name)))
            }
            (_, inner) => Ok(inner),
        }
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Token>
    where
        T: ?Sized + Serialize,
    {
        Err(Error::TypeNotRepresentable("enum variant with data"))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqSerializer> {
        Ok(SeqSerializer::new(len.unwrap_or(0), true))
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqSerializer> {
        Ok(SeqSerializer::new(len, false))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SeqSerializer> {
        Ok(SeqSerializer::new(len, false))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(Error::TypeNotRepresentable("enum variant with data"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Err(Error::TypeNotRepresentable("map"))
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<SeqSerializer> {
        Ok(SeqSerializer::new(len, false))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(Error::TypeNotRepresentable("enum variant with data"))
    }
}

/// Collects the elements of sequences (`T[]`) and of tuples, structs and
/// fixed-size arrays (all encoded as tuples).
pub struct SeqSerializer {
    items: Vec<Token>,
    dynamic: bool,
}

impl SeqSerializer {
    fn new(len: usize, dynamic: bool) -> Self {
        Self {
            items: Vec::with_capacity(len),
            dynamic,
        }
    }

    fn push<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        self.items.push(value.serialize(TokenSerializer)?);
        Ok(())
    }

    fn finish(self) -> Token {
        if self.dynamic {
            Token::Array(self.items)
        } else {
            Token::Tuple(self.items)
        }
    }
}

impl ser::SerializeSeq for SeqSerializer {
    type Ok = Token;
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Token> {
        Ok(self.finish())
    }
}

impl ser::SerializeTuple for SeqSerializer {
    type Ok = Token;
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Token> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleStruct for SeqSerializer {
    type Ok = Token;
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Token> {
        Ok(self.finish())
    }
}

impl ser::SerializeStruct for SeqSerializer {
    type Ok = Token;
    type Error = Error;

    fn serialize_field<T>(&mut self, _key: &'static str, value: &T) -> Result<()>
    where
        T: ?Sized + Serialize,
    {
        self.push(value)
    }

    fn end(self) -> Result<Token> {
        Ok(self.finish())
    }
}
