//! Parser for human readable ABI type descriptions like
//! `tuple(tuple(address to, uint256 amount)[2] coinTransfers, bytes32 linkedHash)`.
//!
//! Field names are accepted but dropped, the encoding only depends on the
//! types and their order.

use super::{
    error::{Error, Result},
    token::ParamType,
};

/// Parse a schema string into the [ParamType] it describes.
pub fn parse(schema: &str) -> Result<ParamType> {
    let mut parser = Parser {
        schema,
        bytes: schema.as_bytes(),
        pos: 0,
    };
    let ty = parser.parse_type()?;
    parser.skip_name();
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(parser.error("unexpected trailing characters"));
    }
    Ok(ty)
}

struct Parser<'a> {
    schema: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &'static str) -> Error {
        Error::InvalidSchema {
            schema: self.schema.to_owned(),
            reason,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: u8, reason: &'static str) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(reason))
        }
    }

    fn ident(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        // Only ASCII has been consumed, so this is always a char boundary.
        &self.schema[start..self.pos]
    }

    fn skip_name(&mut self) {
        self.skip_ws();
        if matches!(self.peek(), Some(c) if c.is_ascii_alphabetic() || c == b'_') {
            self.ident();
        }
    }

    fn parse_type(&mut self) -> Result<ParamType> {
        self.skip_ws();
        let mut ty = match self.peek() {
            Some(b'(') => self.parse_tuple()?,
            Some(c) if c.is_ascii_alphabetic() => {
                let name = self.ident();
                if name == "tuple" {
                    self.parse_tuple()?
                } else {
                    self.elementary(name)?
                }
            }
            _ => return Err(self.error("expected a type")),
        };

        while self.peek() == Some(b'[') {
            self.pos += 1;
            let digits = self.ident();
            if self.peek() != Some(b']') {
                return Err(self.error("unterminated array suffix"));
            }
            self.pos += 1;
            ty = if digits.is_empty() {
                ParamType::Array(Box::new(ty))
            } else {
                let len = digits
                    .parse()
                    .map_err(|_| self.error("invalid array length"))?;
                ParamType::FixedArray(Box::new(ty), len)
            };
        }
        Ok(ty)
    }

    fn parse_tuple(&mut self) -> Result<ParamType> {
        self.expect(b'(', "expected `(`")?;
        let mut fields = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b')') {
            self.pos += 1;
            return Ok(ParamType::Tuple(fields));
        }
        loop {
            fields.push(self.parse_type()?);
            self.skip_name();
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b')') => {
                    self.pos += 1;
                    return Ok(ParamType::Tuple(fields));
                }
                _ => return Err(self.error("expected `,` or `)`")),
            }
        }
    }

    fn elementary(&self, name: &str) -> Result<ParamType> {
        let width = |prefix: &str| -> Result<usize> {
            let digits = &name[prefix.len()..];
            if digits.is_empty() {
                return Ok(256);
            }
            match digits.parse::<usize>() {
                Ok(bits) if bits > 0 && bits <= 256 && bits % 8 == 0 => Ok(bits),
                _ => Err(self.error("invalid integer width")),
            }
        };

        match name {
            "address" => Ok(ParamType::Address),
            "bool" => Ok(ParamType::Bool),
            "string" => Ok(ParamType::String),
            "bytes" => Ok(ParamType::Bytes),
            _ if name.starts_with("bytes") => match name["bytes".len()..].parse::<usize>() {
                Ok(len) if len > 0 && len <= 32 => Ok(ParamType::FixedBytes(len)),
                _ => Err(self.error("invalid bytesN length")),
            },
            _ if name.starts_with("uint") => width("uint").map(ParamType::Uint),
            _ if name.starts_with("int") => width("int").map(ParamType::Int),
            _ => Err(self.error("unknown type")),
        }
    }
}
