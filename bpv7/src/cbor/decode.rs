//! A cursor-style CBOR reader.
//!
//! Handles the items BPv7 actually emits: unsigned integers, byte and text
//! strings, booleans, and arrays (definite or indefinite length).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unexpected end of CBOR data")]
    UnexpectedEof,

    #[error("Expected CBOR major type {expected}, found {found}")]
    UnexpectedType { expected: &'static str, found: u8 },

    #[error("Indefinite-length item where a definite length is required")]
    IndefiniteLength,

    #[error("Reserved additional-info value {0}")]
    ReservedAdditionalInfo(u8),

    #[error("Invalid UTF-8 in text string")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Trailing data after final CBOR item")]
    TrailingData,
}

/// Array length as read from an array header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayLen {
    Definite(u64),
    Indefinite,
}

pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn is_complete(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.pos + n > self.data.len() {
            return Err(Error::UnexpectedEof);
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn peek_byte(&self) -> Result<u8, Error> {
        self.data.get(self.pos).copied().ok_or(Error::UnexpectedEof)
    }

    /// Reads a header, returning (major, value, indefinite).
    fn header(&mut self) -> Result<(u8, u64, bool), Error> {
        let initial = self.take(1)?[0];
        let major = initial >> 5;
        let info = initial & 0x1f;
        let value = match info {
            0..=23 => info as u64,
            24 => self.take(1)?[0] as u64,
            25 => u16::from_be_bytes(self.take(2)?.try_into().unwrap()) as u64,
            26 => u32::from_be_bytes(self.take(4)?.try_into().unwrap()) as u64,
            27 => u64::from_be_bytes(self.take(8)?.try_into().unwrap()),
            31 => return Ok((major, 0, true)),
            n => return Err(Error::ReservedAdditionalInfo(n)),
        };
        Ok((major, value, false))
    }

    pub fn parse_uint(&mut self) -> Result<u64, Error> {
        match self.header()? {
            (0, v, false) => Ok(v),
            (m, ..) => Err(Error::UnexpectedType {
                expected: "uint",
                found: m,
            }),
        }
    }

    pub fn parse_bytes(&mut self) -> Result<&'a [u8], Error> {
        match self.header()? {
            (2, len, false) => self.take(len as usize),
            (2, _, true) => Err(Error::IndefiniteLength),
            (m, ..) => Err(Error::UnexpectedType {
                expected: "bytes",
                found: m,
            }),
        }
    }

    pub fn parse_text(&mut self) -> Result<&'a str, Error> {
        match self.header()? {
            (3, len, false) => Ok(std::str::from_utf8(self.take(len as usize)?)?),
            (3, _, true) => Err(Error::IndefiniteLength),
            (m, ..) => Err(Error::UnexpectedType {
                expected: "text",
                found: m,
            }),
        }
    }

    pub fn parse_array(&mut self) -> Result<ArrayLen, Error> {
        match self.header()? {
            (4, len, false) => Ok(ArrayLen::Definite(len)),
            (4, _, true) => Ok(ArrayLen::Indefinite),
            (m, ..) => Err(Error::UnexpectedType {
                expected: "array",
                found: m,
            }),
        }
    }

    pub fn parse_bool(&mut self) -> Result<bool, Error> {
        match self.header()? {
            (7, 20, false) => Ok(false),
            (7, 21, false) => Ok(true),
            (m, ..) => Err(Error::UnexpectedType {
                expected: "bool",
                found: m,
            }),
        }
    }

    /// The major type of the next item, without consuming it.
    pub fn peek_major(&self) -> Result<u8, Error> {
        Ok(self.peek_byte()? >> 5)
    }

    /// True when the next byte is the indefinite-length "break"; consumes it.
    pub fn at_break(&mut self) -> Result<bool, Error> {
        if self.peek_byte()? == 0xff {
            self.pos += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Skips over one complete item of any supported type.
    pub fn skip_item(&mut self) -> Result<(), Error> {
        match self.header()? {
            (0 | 1, ..) => Ok(()),
            (2 | 3, len, false) => self.take(len as usize).map(|_| ()),
            (4, len, false) => {
                for _ in 0..len {
                    self.skip_item()?;
                }
                Ok(())
            }
            (4, _, true) => {
                while !self.at_break()? {
                    self.skip_item()?;
                }
                Ok(())
            }
            (5, len, false) => {
                for _ in 0..len * 2 {
                    self.skip_item()?;
                }
                Ok(())
            }
            (7, ..) => Ok(()),
            (m, ..) => Err(Error::UnexpectedType {
                expected: "item",
                found: m,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor::encode::Encoder;

    #[test]
    fn round_trip_scalars() {
        let mut e = Encoder::new();
        e.emit_uint(500);
        e.emit_text("hi");
        e.emit_bytes(&[9, 9, 9]);
        e.emit_bool(false);
        let data = e.build();

        let mut d = Decoder::new(&data);
        assert_eq!(d.parse_uint().unwrap(), 500);
        assert_eq!(d.parse_text().unwrap(), "hi");
        assert_eq!(d.parse_bytes().unwrap(), &[9, 9, 9]);
        assert!(!d.parse_bool().unwrap());
        assert!(d.is_complete());
    }

    #[test]
    fn indefinite_array() {
        // [_ 1, 2] in indefinite form
        let data = [0x9f, 0x01, 0x02, 0xff];
        let mut d = Decoder::new(&data);
        assert_eq!(d.parse_array().unwrap(), ArrayLen::Indefinite);
        assert_eq!(d.parse_uint().unwrap(), 1);
        assert!(!d.at_break().unwrap());
        assert_eq!(d.parse_uint().unwrap(), 2);
        assert!(d.at_break().unwrap());
    }

    #[test]
    fn skip_nested() {
        let data = [0x82, 0x82, 0x01, 0x02, 0x03];
        let mut d = Decoder::new(&data);
        assert_eq!(d.parse_array().unwrap(), ArrayLen::Definite(2));
        d.skip_item().unwrap();
        assert_eq!(d.parse_uint().unwrap(), 3);
    }

    #[test]
    fn eof_detected() {
        let mut d = Decoder::new(&[0x19, 0x01]);
        assert!(matches!(d.parse_uint(), Err(Error::UnexpectedEof)));
    }
}
