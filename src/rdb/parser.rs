//! Opcode-level decoding of a snapshot into records.

use crate::rdb::reader::RdbReader;
use crate::rdb::{opcode, RdbError, MAGIC};
use bytes::Bytes;
use tracing::{debug, trace};

/// One string key/value pair read from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdbRecord {
    /// Database index the record was stored under
    pub db: u64,
    pub key: Bytes,
    pub value: Bytes,
    /// Absolute expiry as Unix epoch milliseconds
    pub expires_at_ms: Option<u64>,
}

/// Everything decoded from a snapshot, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RdbSnapshot {
    pub version: u32,
    pub aux: Vec<(Bytes, Bytes)>,
    /// Indexes of every database section encountered
    pub databases: Vec<u64>,
    pub records: Vec<RdbRecord>,
    /// Offset of the `0xFF` end-of-file opcode
    pub eof_offset: usize,
}

/// Decodes a complete snapshot.
///
/// Fails on the first malformed or truncated construct; a partially
/// decoded snapshot is never returned.
pub fn parse(data: &[u8]) -> Result<RdbSnapshot, RdbError> {
    let mut reader = RdbReader::new(data);
    let mut snapshot = RdbSnapshot {
        version: read_header(&mut reader)?,
        ..Default::default()
    };

    loop {
        let offset = reader.position();
        match reader.read_u8()? {
            opcode::EOF => {
                // The trailing checksum, if any, is not verified.
                snapshot.eof_offset = offset;
                debug!(
                    eof_offset = offset,
                    trailing = reader.remaining(),
                    "Reached end of snapshot"
                );
                return Ok(snapshot);
            }
            opcode::AUX => {
                let key = reader.read_string()?;
                let value = reader.read_string()?;
                trace!(
                    key = %String::from_utf8_lossy(&key),
                    value = %String::from_utf8_lossy(&value),
                    "Skipping aux field"
                );
                snapshot.aux.push((key, value));
            }
            opcode::SELECT_DB => {
                let db = reader.read_plain_length()?;
                snapshot.databases.push(db);

                if reader.peek_u8()? == opcode::RESIZE_DB {
                    reader.read_u8()?;
                    let table = reader.read_plain_length()?;
                    let expires = reader.read_plain_length()?;
                    trace!(db, table, expires, "Resize hint");
                }

                read_database(&mut reader, db, &mut snapshot.records)?;
            }
            other => {
                return Err(RdbError::UnexpectedOpcode {
                    opcode: other,
                    offset,
                })
            }
        }
    }
}

fn read_header(reader: &mut RdbReader<'_>) -> Result<u32, RdbError> {
    let magic = reader.read_bytes(MAGIC.len())?;
    if magic != MAGIC {
        return Err(RdbError::InvalidMagic(
            String::from_utf8_lossy(magic).into_owned(),
        ));
    }

    let version = reader.read_bytes(4)?;
    let text = String::from_utf8_lossy(version).into_owned();
    if !version.iter().all(u8::is_ascii_digit) {
        return Err(RdbError::InvalidVersion(text));
    }
    text.parse().map_err(|_| RdbError::InvalidVersion(text))
}

/// Reads records until the next section opcode.
fn read_database(
    reader: &mut RdbReader<'_>,
    db: u64,
    records: &mut Vec<RdbRecord>,
) -> Result<(), RdbError> {
    let start = records.len();

    while !matches!(
        reader.peek_u8()?,
        opcode::EOF | opcode::SELECT_DB | opcode::AUX
    ) {
        records.push(read_record(reader, db)?);
    }

    debug!(db, records = records.len() - start, "Read database section");
    Ok(())
}

fn read_record(reader: &mut RdbReader<'_>, db: u64) -> Result<RdbRecord, RdbError> {
    let mut expires_at_ms = None;

    loop {
        let offset = reader.position();
        match reader.read_u8()? {
            opcode::EXPIRE_TIME => {
                let seconds = reader.read_u32_le()?;
                expires_at_ms = Some(u64::from(seconds) * 1000);
            }
            opcode::EXPIRE_TIME_MS => {
                expires_at_ms = Some(reader.read_u64_le()?);
            }
            opcode::IDLE => {
                reader.read_plain_length()?;
            }
            opcode::FREQ => {
                reader.read_u8()?;
            }
            opcode::TYPE_STRING => {
                let key = reader.read_string()?;
                let value = reader.read_string()?;
                return Ok(RdbRecord {
                    db,
                    key,
                    value,
                    expires_at_ms,
                });
            }
            tag => return Err(RdbError::UnsupportedValueType { tag, offset }),
        }
    }
}
