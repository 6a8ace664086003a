//! Key-value store access
//!
//! The export pipeline only talks to the store through [`KeySource`], which
//! mirrors the Redis primitives it needs: cursor-based keyspace iteration,
//! pipelined TYPE/PTTL lookup, GET, the HSCAN/SSCAN/ZSCAN sub-scans and
//! LLEN/LRANGE paging.
//!
//! - [`RedisSource`]: a live Redis connection
//! - [`MemoryStore`]: a deterministic in-process store used by tests

mod memory_store;
mod redis_source;

pub use memory_store::{MemoryStore, MemoryValue};
pub use redis_source::{RedisSource, RedisSourceConfig};

use crate::error::SourceResult;
use std::fmt;

/// Cursor value that both starts and terminates a sweep
pub const CURSOR_START: u64 = 0;

/// One page of a cursor-driven iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage<T> {
    /// Cursor for the next call; `0` means the sweep is complete
    pub cursor: u64,

    /// Items returned by this call
    pub items: Vec<T>,
}

impl<T> ScanPage<T> {
    pub fn new(cursor: u64, items: Vec<T>) -> Self {
        Self { cursor, items }
    }

    /// True once the store has handed back the terminal cursor
    pub fn is_last(&self) -> bool {
        self.cursor == CURSOR_START
    }
}

/// Native type of a stored key, as reported by TYPE
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyType {
    String,
    Hash,
    Set,
    Zset,
    List,
    Stream,
    /// Key no longer exists (TYPE returned `none`)
    None,
    /// Module or future types, kept verbatim
    Other(String),
}

impl KeyType {
    /// Parse a TYPE reply
    pub fn parse(s: &str) -> Self {
        match s {
            "string" => KeyType::String,
            "hash" => KeyType::Hash,
            "set" => KeyType::Set,
            "zset" => KeyType::Zset,
            "list" => KeyType::List,
            "stream" => KeyType::Stream,
            "none" => KeyType::None,
            other => KeyType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            KeyType::String => "string",
            KeyType::Hash => "hash",
            KeyType::Set => "set",
            KeyType::Zset => "zset",
            KeyType::List => "list",
            KeyType::Stream => "stream",
            KeyType::None => "none",
            KeyType::Other(s) => s,
        }
    }

    /// Composite types hold members, fields or elements
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            KeyType::Hash | KeyType::Set | KeyType::Zset | KeyType::List
        )
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw per-key metadata from a pipelined TYPE + PTTL round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawKeyMeta {
    pub key_type: KeyType,

    /// PTTL reply in milliseconds (`-1` no expiry, `-2` missing key)
    pub pttl_ms: i64,
}

/// Printable form of a raw key; invalid UTF-8 is replaced with U+FFFD
pub fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

/// Access to a key-value store
///
/// Keys travel as raw bytes so binary key names survive the round trip from
/// SCAN to the value commands. Values and field names come back decoded.
///
/// All calls are blocking and issued from a single thread; the pipeline never
/// shares a source across threads.
pub trait KeySource {
    /// One SCAN step: keys matching `pattern`, visiting roughly `count` slots
    fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> SourceResult<ScanPage<Vec<u8>>>;

    /// TYPE and PTTL for every key in one round trip.
    ///
    /// Succeeds for the whole batch or not at all, like a Redis pipeline
    /// where any rejected command fails the reply. A key-scoped error means
    /// at least one key of the batch could not be looked up; callers retry
    /// those keys one at a time. Results are in the same order as `keys`.
    fn key_meta(&mut self, keys: &[Vec<u8>]) -> SourceResult<Vec<RawKeyMeta>>;

    /// GET; `None` when the key disappeared
    fn get(&mut self, key: &[u8]) -> SourceResult<Option<String>>;

    /// One HSCAN step returning `(field, value)` pairs
    fn hscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        count: usize,
    ) -> SourceResult<ScanPage<(String, String)>>;

    /// One SSCAN step returning members
    fn sscan(&mut self, key: &[u8], cursor: u64, count: usize) -> SourceResult<ScanPage<String>>;

    /// One ZSCAN step returning `(member, raw score string)` pairs
    fn zscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        count: usize,
    ) -> SourceResult<ScanPage<(String, String)>>;

    /// LLEN
    fn llen(&mut self, key: &[u8]) -> SourceResult<u64>;

    /// LRANGE with inclusive bounds
    fn lrange(&mut self, key: &[u8], start: u64, stop: u64) -> SourceResult<Vec<String>>;
}

impl<S: KeySource + ?Sized> KeySource for &mut S {
    fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> SourceResult<ScanPage<Vec<u8>>> {
        (**self).scan(cursor, pattern, count)
    }

    fn key_meta(&mut self, keys: &[Vec<u8>]) -> SourceResult<Vec<RawKeyMeta>> {
        (**self).key_meta(keys)
    }

    fn get(&mut self, key: &[u8]) -> SourceResult<Option<String>> {
        (**self).get(key)
    }

    fn hscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        count: usize,
    ) -> SourceResult<ScanPage<(String, String)>> {
        (**self).hscan(key, cursor, count)
    }

    fn sscan(&mut self, key: &[u8], cursor: u64, count: usize) -> SourceResult<ScanPage<String>> {
        (**self).sscan(key, cursor, count)
    }

    fn zscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        count: usize,
    ) -> SourceResult<ScanPage<(String, String)>> {
        (**self).zscan(key, cursor, count)
    }

    fn llen(&mut self, key: &[u8]) -> SourceResult<u64> {
        (**self).llen(key)
    }

    fn lrange(&mut self, key: &[u8], start: u64, stop: u64) -> SourceResult<Vec<String>> {
        (**self).lrange(key, start, stop)
    }
}
