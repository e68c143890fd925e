//! Bounds-checked cursor over snapshot bytes.
//!
//! Every read either consumes exactly the bytes it declares or fails with
//! [`RdbError::UnexpectedEof`]; nothing is ever read past the end of the
//! buffer and nothing is silently skipped.

use crate::rdb::RdbError;
use bytes::Bytes;

/// Result of decoding a length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    /// A plain byte count (or integer, for db indexes and resize hints)
    Len(u64),
    /// `11xxxxxx`: the string that follows is stored in a special format
    Encoded(u8),
}

/// Special string formats selected by the low 6 bits of an `11xxxxxx` byte.
pub mod encoding {
    pub const INT8: u8 = 0;
    pub const INT16: u8 = 1;
    pub const INT32: u8 = 2;
    pub const LZF: u8 = 3;
}

#[derive(Debug, Clone)]
pub struct RdbReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RdbReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn eof(&self, needed: usize) -> RdbError {
        RdbError::UnexpectedEof {
            offset: self.pos,
            needed,
            available: self.remaining(),
        }
    }

    pub fn peek_u8(&self) -> Result<u8, RdbError> {
        self.data.get(self.pos).copied().ok_or_else(|| self.eof(1))
    }

    pub fn read_u8(&mut self) -> Result<u8, RdbError> {
        let byte = self.peek_u8()?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], RdbError> {
        if self.remaining() < n {
            return Err(self.eof(n));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], RdbError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, RdbError> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_u64_le(&mut self) -> Result<u64, RdbError> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Decodes a length prefix.
    ///
    /// | first byte  | meaning                                 |
    /// |-------------|-----------------------------------------|
    /// | `00xxxxxx`  | 6-bit length                            |
    /// | `01xxxxxx`  | 14-bit length, low 6 bits + next byte   |
    /// | `10000000`  | 32-bit big-endian length follows        |
    /// | `10000001`  | 64-bit big-endian length follows        |
    /// | `11xxxxxx`  | special string format `xxxxxx`          |
    pub fn read_length(&mut self) -> Result<Length, RdbError> {
        let offset = self.pos;
        let first = self.read_u8()?;

        match first >> 6 {
            0b00 => Ok(Length::Len(u64::from(first & 0x3F))),
            0b01 => {
                let next = self.read_u8()?;
                Ok(Length::Len((u64::from(first & 0x3F) << 8) | u64::from(next)))
            }
            0b10 => match first {
                0x80 => self
                    .read_array()
                    .map(|b| Length::Len(u64::from(u32::from_be_bytes(b)))),
                0x81 => self.read_array().map(|b| Length::Len(u64::from_be_bytes(b))),
                _ => Err(RdbError::InvalidLengthEncoding {
                    byte: first,
                    offset,
                }),
            },
            _ => Ok(Length::Encoded(first & 0x3F)),
        }
    }

    /// Decodes a length that must be a plain number (db index, resize hints, LRU idle).
    pub fn read_plain_length(&mut self) -> Result<u64, RdbError> {
        let offset = self.pos;
        match self.read_length()? {
            Length::Len(n) => Ok(n),
            Length::Encoded(_) => Err(RdbError::InvalidLengthEncoding {
                byte: self.data[offset],
                offset,
            }),
        }
    }

    /// Reads a length-prefixed string, expanding integer encodings to their
    /// decimal text.
    pub fn read_string(&mut self) -> Result<Bytes, RdbError> {
        let offset = self.pos;

        match self.read_length()? {
            Length::Len(n) => {
                let n = usize::try_from(n).map_err(|_| self.eof(usize::MAX))?;
                Ok(Bytes::copy_from_slice(self.read_bytes(n)?))
            }
            Length::Encoded(encoding::INT8) => {
                let n = self.read_u8()? as i8;
                Ok(Bytes::from(n.to_string()))
            }
            Length::Encoded(encoding::INT16) => {
                let n = i16::from_le_bytes(self.read_array()?);
                Ok(Bytes::from(n.to_string()))
            }
            Length::Encoded(encoding::INT32) => {
                let n = i32::from_le_bytes(self.read_array()?);
                Ok(Bytes::from(n.to_string()))
            }
            Length::Encoded(encoding::LZF) => Err(RdbError::UnsupportedEncoding {
                encoding: "LZF-compressed string",
                offset,
            }),
            Length::Encoded(_) => Err(RdbError::InvalidLengthEncoding {
                byte: self.data[offset],
                offset,
            }),
        }
    }
}
