//! Incremental RESP Request Decoder
//!
//! Clients always send commands as an array of bulk strings:
//!
//! ```text
//! *2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n
//! ```
//!
//! The decoder reads from a buffer and returns either:
//! - `Ok(Some((args, consumed)))` - One complete command, `consumed` bytes were used
//! - `Ok(None)` - The buffer holds only a prefix of a command, read more and retry
//! - `Err(ParseError)` - The bytes can never form a valid command, drop the client
//!
//! TCP may split a command anywhere, so every length line and every bulk
//! payload is checked against the bytes actually available before it is
//! touched. Bulk payloads are taken by their declared length, never by
//! scanning for CRLF, so a value may itself contain `\r\n`.

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that make the input stream undecodable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A request did not start with `*`
    #[error("expected '*', got {}", describe_byte(.0))]
    ExpectedArray(u8),

    /// An array element did not start with `$`
    #[error("expected '$', got {}", describe_byte(.0))]
    ExpectedBulkString(u8),

    /// A length line was not a decimal integer
    #[error("invalid length: {0:?}")]
    InvalidLength(String),

    /// Array length is negative
    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    /// Bulk string length is negative
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// Bulk payload was not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    /// The declared bulk length is over the limit
    #[error("bulk string too large: {size} bytes (max: {max})")]
    BulkTooLarge { size: usize, max: usize },
}

fn describe_byte(b: &u8) -> String {
    if b.is_ascii_graphic() {
        format!("'{}'", *b as char)
    } else {
        format!("{:#04x}", b)
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in one request array
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Longest length field accepted: `i64::MIN` in decimal is 20 bytes.
const MAX_LENGTH_DIGITS: usize = 20;

/// Arguments are pre-allocated up to this many; larger frames grow as they decode.
const MAX_PREALLOCATED_ARGS: usize = 64;

/// A decoded request: the verb followed by its arguments, in wire order.
pub type Frame = Vec<Bytes>;

/// Decodes client requests out of a byte buffer.
///
/// The parser keeps no state between calls: when a command is incomplete it
/// returns `Ok(None)` and the caller simply retries with the same buffer once
/// more bytes have arrived.
///
/// # Example
///
/// ```
/// use snapkv::protocol::RespParser;
///
/// let parser = RespParser::new();
/// let buf = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
///
/// let (args, consumed) = parser.parse(buf).unwrap().unwrap();
/// assert_eq!(args, vec!["GET", "name"]);
/// assert_eq!(consumed, buf.len());
///
/// // The same command cut short just needs more data
/// assert!(parser.parse(&buf[..10]).unwrap().is_none());
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        Self
    }

    /// Attempts to decode one command from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        if first != prefix::ARRAY {
            return Err(ParseError::ExpectedArray(first));
        }

        let Some((count, mut consumed)) = read_length_line(buf)? else {
            return Ok(None);
        };
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }
        let count = count as usize;
        if count > MAX_ARRAY_LEN {
            return Err(ParseError::InvalidArrayLength(count as i64));
        }

        let mut args = Vec::with_capacity(count.min(MAX_PREALLOCATED_ARGS));
        for _ in 0..count {
            match parse_bulk_string(&buf[consumed..])? {
                Some((arg, used)) => {
                    args.push(arg);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((args, consumed)))
    }
}

/// Parses a bulk string: `$<length>\r\n<data>\r\n`
fn parse_bulk_string(buf: &[u8]) -> ParseResult<Option<(Bytes, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    if first != prefix::BULK_STRING {
        return Err(ParseError::ExpectedBulkString(first));
    }

    let Some((length, data_start)) = read_length_line(buf)? else {
        return Ok(None);
    };
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }
    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::BulkTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let data_end = data_start + length;
    let total = data_end + CRLF.len();

    // Check the terminator byte by byte so a half-arrived CRLF is still "incomplete"
    // while a wrong byte is rejected as soon as it shows up.
    for (i, expected) in CRLF.iter().enumerate() {
        match buf.get(data_end + i) {
            None => return Ok(None),
            Some(b) if b != expected => return Err(ParseError::MissingCrlf),
            Some(_) => {}
        }
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
    Ok(Some((data, total)))
}

/// Reads the integer on a `<prefix><digits>\r\n` line.
///
/// Returns the value and the number of bytes up to and including the CRLF.
fn read_length_line(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let Some(pos) = find_crlf(&buf[1..]) else {
        // Reject garbage early instead of buffering an endless length line.
        // One extra byte allows for a `\r` whose `\n` has not arrived.
        let pending = &buf[1..];
        if pending.len() > MAX_LENGTH_DIGITS + 1
            || pending
                .iter()
                .any(|b| !(b.is_ascii_digit() || *b == b'-' || *b == b'\r'))
        {
            let shown = &pending[..pending.len().min(MAX_LENGTH_DIGITS + 1)];
            return Err(ParseError::InvalidLength(
                String::from_utf8_lossy(shown).into_owned(),
            ));
        }
        return Ok(None);
    };

    let digits = &buf[1..1 + pos];
    let value = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::InvalidLength(String::from_utf8_lossy(digits).into_owned()))?;

    Ok(Some((value, 1 + pos + CRLF.len())))
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single command from `buf`.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
    RespParser::new().parse(buf)
}
