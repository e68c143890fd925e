//! Storage Engine Module
//!
//! The sharded, expiring keyspace and the background sweeper that reclaims
//! expired entries.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! │                 config: dir, dbfilename, ...                │
//! └─────────────────────────────────────────────────────────────┘
//!          ▲                                   ▲
//!          │                                   │
//!  ┌───────┴────────┐            ┌─────────────┴─────────────┐
//!  │  RDB loader    │            │     ExpirySweeper         │
//!  │  (startup)     │            │  (Background Tokio Task)  │
//!  └────────────────┘            └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use snapkv::storage::StorageEngine;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//!
//! engine.set(Bytes::from("name"), Bytes::from("Ariz"));
//! assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
//!
//! engine.set_with_ttl(Bytes::from("gone"), Bytes::from("soon"), Duration::ZERO);
//! assert_eq!(engine.get(b"gone"), None);
//! ```

pub mod engine;
pub mod expiry;

pub use engine::{Entry, StorageEngine, StorageStats};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
