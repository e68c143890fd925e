//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the keyspace for snapkv: a concurrent map from key
//! to value with an optional absolute expiry instant, plus the small
//! configuration map that `CONFIG GET` reads from.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Keys hash onto 64 shards, each behind its own `RwLock`.
//! 2. **Lazy Expiry**: Every read path treats an expired entry as absent, and
//!    `get` removes it on the spot.
//! 3. **Active Expiry**: `cleanup_expired` is the hook the background sweeper
//!    calls; correctness never depends on it running.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A single-key operation holds exactly one shard lock, so writes to one key
//! are serialized (last write wins) and a `get` issued after a `set` returned
//! always observes that write or a later one.

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// A stored value with its optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates a new entry that expires `ttl` from now.
    ///
    /// A deadline too far away for the monotonic clock never expires.
    pub fn with_ttl(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    #[inline]
    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

type ShardMap = HashMap<Bytes, Entry>;

/// A single shard containing a portion of the keyspace.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<ShardMap>,
}

impl Shard {
    // Entries are replaced whole, so a poisoned shard is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, ShardMap> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ShardMap> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The keyspace shared by every connection, the snapshot loader, and the sweeper.
///
/// Wrap it in an `Arc` and hand clones to each task; all methods take `&self`.
///
/// # Example
///
/// ```
/// use snapkv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
///
/// engine.set_with_ttl(Bytes::from("session"), Bytes::from("abc123"), Duration::from_secs(60));
/// assert!(engine.get(b"session").is_some());
///
/// engine.config_set("dir", "/var/lib/snapkv");
/// assert_eq!(engine.config_get("dir").as_deref(), Some("/var/lib/snapkv"));
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,

    /// Startup configuration, written before the listener opens
    config: RwLock<HashMap<String, String>>,

    /// Number of entries physically present, expired or not
    key_count: AtomicU64,

    /// Number of entries removed because their TTL ran out
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("expired_count", &self.expired_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty storage engine.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            config: RwLock::new(HashMap::new()),
            key_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    fn insert(&self, key: Bytes, entry: Entry) -> bool {
        let mut data = self.get_shard(&key).write();
        let is_new = data.insert(key, entry).is_none();
        if is_new {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
        is_new
    }

    /// Sets a key-value pair without expiry, dropping any TTL the key had.
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was replaced.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.insert(key, Entry::new(value))
    }

    /// Sets a key-value pair that expires `ttl` from now.
    ///
    /// A zero `ttl` stores an entry that is already expired for every reader.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) -> bool {
        self.insert(key, Entry::with_ttl(value, ttl))
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired; an expired
    /// entry is removed before returning.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let shard = self.get_shard(key);

        {
            let data = shard.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: upgrade to the write lock and re-check, a writer may have
        // replaced the entry between the two lock acquisitions.
        let mut data = shard.write();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Removes a key. Removing an absent key is a no-op.
    ///
    /// Returns `true` if something was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        let mut data = self.get_shard(key).write();

        if data.remove(key).is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Returns every non-expired key.
    ///
    /// Shards are visited one at a time, so the result is a per-shard
    /// snapshot and writers to other shards are never blocked for the whole scan.
    pub fn keys(&self) -> Vec<Bytes> {
        self.collect_keys(|_| true)
    }

    /// Returns every non-expired key matching a Redis-style glob pattern.
    ///
    /// - `*` matches any run of bytes, `?` exactly one byte
    /// - `[abc]`, `[^abc]` and `[a-z]` match character classes
    /// - `\` escapes the next byte
    pub fn keys_matching(&self, pattern: &[u8]) -> Vec<Bytes> {
        if pattern == b"*" {
            return self.keys();
        }
        self.collect_keys(|key| glob_match(pattern, key))
    }

    fn collect_keys(&self, mut filter: impl FnMut(&[u8]) -> bool) -> Vec<Bytes> {
        let now = Instant::now();
        let mut result = Vec::new();

        for shard in &self.shards {
            let data = shard.read();
            result.extend(
                data.iter()
                    .filter(|(key, entry)| !entry.is_expired_at(now) && filter(&key[..]))
                    .map(|(key, _)| key.clone()),
            );
        }

        result
    }

    /// Looks up a startup configuration value.
    pub fn config_get(&self, key: &str) -> Option<String> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Records a startup configuration value.
    pub fn config_set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Returns the number of entries held, including expired ones that have
    /// not been reclaimed yet.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Removes every expired entry from all shards.
    ///
    /// This is called by the background expiry sweeper. Each shard is
    /// filtered under its own write lock, so a concurrent delete of the same
    /// key simply leaves nothing to remove.
    ///
    /// Returns the number of keys that were cleaned up.
    pub fn cleanup_expired(&self) -> u64 {
        let now = Instant::now();
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut data = shard.write();
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired_at(now));
            cleaned += (before - data.len()) as u64;
        }

        if cleaned > 0 {
            self.key_count.fetch_sub(cleaned, Ordering::Relaxed);
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }

        cleaned
    }
}

/// Keyspace counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Entries currently held
    pub keys: u64,
    /// Entries reclaimed by lazy or active expiry
    pub expired: u64,
}

/// Matches `text` against a Redis-style glob `pattern`, byte by byte.
///
/// Iterative with single-point backtracking on the most recent `*`, so
/// pathological patterns stay linear in practice.
pub(crate) fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Pattern index just past the last `*`, and the text index it is retried from
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if let Some(&token) = pattern.get(p) {
            match token {
                b'*' => {
                    star = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => match match_class(pattern, p, text[t]) {
                    Some((true, next)) => {
                        p = next;
                        t += 1;
                        continue;
                    }
                    Some((false, _)) => {}
                    // Unterminated class, treat `[` literally
                    None if text[t] == b'[' => {
                        p += 1;
                        t += 1;
                        continue;
                    }
                    None => {}
                },
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                literal => {
                    if literal == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Evaluates the class starting at `pattern[start] == b'['` against `ch`.
///
/// Returns whether it matched and the index just past the closing `]`, or
/// `None` when the class is never closed.
fn match_class(pattern: &[u8], start: usize, ch: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == ch;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= (lo..=hi).contains(&ch);
            i += 3;
        } else {
            matched |= pattern[i] == ch;
            i += 1;
        }
    }

    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}
