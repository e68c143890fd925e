//! # snapkv - An In-Memory Redis-Compatible Server
//!
//! snapkv speaks a subset of the Redis protocol over TCP, keeps string keys
//! with optional millisecond expiry in memory, and can seed its keyspace
//! from a Redis RDB snapshot at startup.
//!
//! ## Features
//!
//! - **RESP**: requests are arrays of bulk strings, decoded incrementally
//! - **Sharded storage**: 64 `RwLock` shards for concurrent access
//! - **Expiry**: lazy checks on read plus a periodic background sweep
//! - **RDB loading**: string records, with second or millisecond expiry
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              snapkv                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │   RESP      │    │              StorageEngine                   │   │
//! │  │   Parser    │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │   │
//! │  │             │    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │   │
//! │  └─────────────┘    │  │RwLock  │ │RwLock  │ │RwLock  │ │shards  │ │   │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │   │
//! │                     └──────────────────────────────────────────────┘   │
//! │                          ▲                              ▲              │
//! │                          │                              │              │
//! │          ┌───────────────┴──────┐     ┌─────────────────┴────────────┐ │
//! │          │   RDB loader         │     │      ExpirySweeper           │ │
//! │          │   (before accept)    │     │   (Background Tokio Task)    │ │
//! │          └──────────────────────┘     └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `ECHO message`
//! - `SET key value [PX milliseconds | EX seconds]`
//! - `GET key`
//! - `CONFIG GET parameter`
//! - `KEYS pattern`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP request decoder and reply types
//! - [`storage`]: thread-safe storage engine with TTL support
//! - [`rdb`]: RDB snapshot loader
//! - [`commands`]: command validation and execution
//! - [`connection`]: client connection management
//! - [`config`]: command-line configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod rdb;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{Command, CommandError, CommandHandler};
pub use config::ServerConfig;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, RespParser, RespValue};
pub use rdb::{LoadSummary, RdbError};
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port snapkv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// Version of snapkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
