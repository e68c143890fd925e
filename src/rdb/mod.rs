//! RDB Snapshot Loader
//!
//! Reads a Redis RDB snapshot at startup and folds its string keys into the
//! store. Only what is needed to seed a string keyspace is understood:
//!
//! ```text
//! "REDIS" + 4 ASCII digits            header
//! 0xFA <string> <string>              aux field (skipped)
//! 0xFE <length> [0xFB <len> <len>]    database section
//!   [0xFD <u32 LE secs>|0xFC <u64 LE ms>] 0x00 <key> <value>
//! 0xFF [8-byte checksum]              end of file (checksum not verified)
//! ```
//!
//! Any other value type, an LZF-compressed string, or a snapshot that ends
//! early is an error, and the store is left untouched.

pub mod parser;
pub mod reader;

pub use parser::{parse, RdbRecord, RdbSnapshot};

use crate::storage::StorageEngine;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

pub const MAGIC: &[u8; 5] = b"REDIS";

/// Section and record opcodes.
pub mod opcode {
    pub const TYPE_STRING: u8 = 0x00;
    pub const IDLE: u8 = 0xF8;
    pub const FREQ: u8 = 0xF9;
    pub const AUX: u8 = 0xFA;
    pub const RESIZE_DB: u8 = 0xFB;
    pub const EXPIRE_TIME_MS: u8 = 0xFC;
    pub const EXPIRE_TIME: u8 = 0xFD;
    pub const SELECT_DB: u8 = 0xFE;
    pub const EOF: u8 = 0xFF;
}

#[derive(Debug, Error)]
pub enum RdbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not an RDB file (magic {0:?})")]
    InvalidMagic(String),

    #[error("invalid RDB version {0:?}")]
    InvalidVersion(String),

    #[error("unexpected opcode 0x{opcode:02X} at offset {offset}")]
    UnexpectedOpcode { opcode: u8, offset: usize },

    #[error("unsupported value type 0x{tag:02X} at offset {offset}")]
    UnsupportedValueType { tag: u8, offset: usize },

    #[error("invalid length encoding 0x{byte:02X} at offset {offset}")]
    InvalidLengthEncoding { byte: u8, offset: usize },

    #[error("unsupported encoding ({encoding}) at offset {offset}")]
    UnsupportedEncoding {
        encoding: &'static str,
        offset: usize,
    },

    #[error("unexpected end of file at offset {offset}: needed {needed} bytes, {available} available")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

/// What a successful load put into the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub version: u32,
    /// Records inserted into the store
    pub loaded: usize,
    /// Records whose expiry had already passed
    pub skipped_expired: usize,
    pub databases: usize,
    pub aux_fields: usize,
    pub eof_offset: usize,
}

/// Parses `data` and inserts its records into `engine`.
///
/// Records from every database index share the single keyspace. A record
/// whose absolute expiry is already in the past is dropped; the rest keep
/// the time remaining until their expiry.
pub fn load_bytes(data: &[u8], engine: &StorageEngine) -> Result<LoadSummary, RdbError> {
    let snapshot = parse(data)?;
    let now_ms = unix_now_ms();

    let mut summary = LoadSummary {
        version: snapshot.version,
        databases: snapshot.databases.len(),
        aux_fields: snapshot.aux.len(),
        eof_offset: snapshot.eof_offset,
        ..Default::default()
    };

    for record in snapshot.records {
        match record.expires_at_ms {
            None => {
                engine.set(record.key, record.value);
            }
            Some(at) if at > now_ms => {
                engine.set_with_ttl(
                    record.key,
                    record.value,
                    Duration::from_millis(at - now_ms),
                );
            }
            Some(at) => {
                debug!(
                    key = %String::from_utf8_lossy(&record.key),
                    expired_ms_ago = now_ms - at,
                    "Skipping expired record"
                );
                summary.skipped_expired += 1;
                continue;
            }
        }
        summary.loaded += 1;
    }

    Ok(summary)
}

/// Reads the snapshot at `path` and loads it into `engine`.
pub async fn load_file(
    path: impl AsRef<Path>,
    engine: &StorageEngine,
) -> Result<LoadSummary, RdbError> {
    let path = path.as_ref();
    let data = tokio::fs::read(path).await?;
    let summary = load_bytes(&data, engine)?;

    info!(
        path = %path.display(),
        version = summary.version,
        loaded = summary.loaded,
        skipped_expired = summary.skipped_expired,
        "Snapshot loaded"
    );
    Ok(summary)
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
