//! In-process key source
//!
//! `MemoryStore` behaves like a small Redis: keys are raw bytes kept in sorted
//! order, the SCAN family walks them with an offset cursor that visits `count`
//! slots per call (so a page may hold fewer matches than `count`), and glob
//! patterns follow Redis MATCH syntax. Faults can be injected per key or for
//! the keyspace scan to exercise the error paths of the pipeline. A failing
//! key fails the whole TYPE/PTTL batch it is looked up in, as a Redis
//! pipeline does.

use crate::error::{SourceError, SourceResult};
use crate::source::{display_key, KeySource, KeyType, RawKeyMeta, ScanPage};

use regex::bytes::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

/// A stored value
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryValue {
    String(String),
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
    /// Members with their raw score strings
    Zset(BTreeMap<String, String>),
    List(Vec<String>),
    /// Stored under a type the exporter has no flattening rule for
    Opaque(String),
}

impl MemoryValue {
    fn key_type(&self) -> KeyType {
        match self {
            MemoryValue::String(_) => KeyType::String,
            MemoryValue::Hash(_) => KeyType::Hash,
            MemoryValue::Set(_) => KeyType::Set,
            MemoryValue::Zset(_) => KeyType::Zset,
            MemoryValue::List(_) => KeyType::List,
            MemoryValue::Opaque(t) => KeyType::parse(t),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: MemoryValue,
    ttl: Option<Duration>,
}

/// Deterministic in-memory [`KeySource`]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<Vec<u8>, Entry>,
    failing_keys: HashSet<Vec<u8>>,
    fail_scan_after: Option<usize>,
    short_meta_replies: bool,
    scan_calls: usize,
    meta_round_trips: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key
    pub fn insert(&mut self, key: impl AsRef<[u8]>, value: MemoryValue) -> &mut Self {
        self.entries.insert(key.as_ref().to_vec(), Entry { value, ttl: None });
        self
    }

    pub fn set_string(&mut self, key: impl AsRef<[u8]>, value: &str) -> &mut Self {
        self.insert(key, MemoryValue::String(value.to_string()))
    }

    pub fn set_hash(&mut self, key: impl AsRef<[u8]>, fields: &[(&str, &str)]) -> &mut Self {
        let map = fields
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect();
        self.insert(key, MemoryValue::Hash(map))
    }

    pub fn set_members(&mut self, key: impl AsRef<[u8]>, members: &[&str]) -> &mut Self {
        let set = members.iter().map(|m| m.to_string()).collect();
        self.insert(key, MemoryValue::Set(set))
    }

    pub fn set_zset(&mut self, key: impl AsRef<[u8]>, members: &[(&str, &str)]) -> &mut Self {
        let map = members
            .iter()
            .map(|(m, s)| (m.to_string(), s.to_string()))
            .collect();
        self.insert(key, MemoryValue::Zset(map))
    }

    pub fn set_list(&mut self, key: impl AsRef<[u8]>, items: &[&str]) -> &mut Self {
        let list = items.iter().map(|i| i.to_string()).collect();
        self.insert(key, MemoryValue::List(list))
    }

    /// Attach a remaining time-to-live to an existing key
    pub fn expire(&mut self, key: impl AsRef<[u8]>, ttl: Duration) -> &mut Self {
        if let Some(entry) = self.entries.get_mut(key.as_ref()) {
            entry.ttl = Some(ttl);
        }
        self
    }

    /// Every command touching `key` is rejected by the server
    pub fn fail_key(&mut self, key: impl AsRef<[u8]>) -> &mut Self {
        self.failing_keys.insert(key.as_ref().to_vec());
        self
    }

    /// SCAN calls after the first `calls` fail with a transport error
    pub fn fail_scan_after(&mut self, calls: usize) -> &mut Self {
        self.fail_scan_after = Some(calls);
        self
    }

    /// TYPE/PTTL lookups of more than one key come back one result short
    pub fn short_meta_replies(&mut self) -> &mut Self {
        self.short_meta_replies = true;
        self
    }

    /// Number of SCAN calls served so far
    pub fn scan_calls(&self) -> usize {
        self.scan_calls
    }

    /// Number of pipelined TYPE/PTTL round trips served so far
    pub fn meta_round_trips(&self) -> usize {
        self.meta_round_trips
    }

    fn check_key(&self, command: &'static str, key: &[u8]) -> SourceResult<()> {
        if self.failing_keys.contains(key) {
            Err(SourceError::command(
                command,
                display_key(key),
                "NOPERM injected failure",
            ))
        } else {
            Ok(())
        }
    }

    fn value(&self, command: &'static str, key: &[u8]) -> SourceResult<Option<&MemoryValue>> {
        self.check_key(command, key)?;
        Ok(self.entries.get(key).map(|e| &e.value))
    }

    fn raw_meta(&self, key: &[u8]) -> RawKeyMeta {
        match self.entries.get(key) {
            Some(entry) => RawKeyMeta {
                key_type: entry.value.key_type(),
                pttl_ms: entry
                    .ttl
                    .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
                    .unwrap_or(-1),
            },
            None => RawKeyMeta {
                key_type: KeyType::None,
                pttl_ms: -2,
            },
        }
    }
}

fn wrong_type(command: &'static str, key: &[u8]) -> SourceError {
    SourceError::command(
        command,
        display_key(key),
        "WRONGTYPE Operation against a key holding the wrong kind of value",
    )
}

/// Offset-cursor page over an ordered sequence.
///
/// Visits `count` slots starting at `cursor`, keeping those accepted by
/// `keep`. The returned cursor is `0` once the end is reached.
fn page<T, I, F>(
    items: I,
    total: usize,
    cursor: u64,
    count: usize,
    mut keep: F,
) -> (u64, Vec<T>)
where
    I: Iterator<Item = T>,
    F: FnMut(&T) -> bool,
{
    let start = usize::try_from(cursor).unwrap_or(usize::MAX);
    let count = count.max(1);
    let picked = items
        .skip(start)
        .take(count)
        .filter(|item| keep(item))
        .collect();
    let end = start.saturating_add(count);
    let next = if end >= total { 0 } else { end as u64 };
    (next, picked)
}

/// Translate a Redis MATCH glob into an anchored byte regex
pub(crate) fn glob_to_regex(pattern: &str) -> Regex {
    // Byte semantics: `?` and `*` match any byte, including invalid UTF-8
    let mut re = String::with_capacity(pattern.len() * 2 + 8);
    re.push_str("(?s-u)^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    re.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    if c == '\\' || c == '[' {
                        re.push('\\');
                    }
                    re.push(c);
                }
                re.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    re.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');

    // A malformed class falls back to literal matching
    Regex::new(&re).unwrap_or_else(|_| {
        Regex::new(&format!("^{}$", regex::escape(pattern)))
            .expect("escaped literal is a valid regex")
    })
}

impl KeySource for MemoryStore {
    fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> SourceResult<ScanPage<Vec<u8>>> {
        if let Some(limit) = self.fail_scan_after {
            if self.scan_calls >= limit {
                return Err(SourceError::Connection {
                    url: "memory://".into(),
                    reason: "injected SCAN failure".into(),
                });
            }
        }
        self.scan_calls += 1;

        let matcher = glob_to_regex(pattern);
        let (next, keys) = page(
            self.entries.keys().cloned(),
            self.entries.len(),
            cursor,
            count,
            |k: &Vec<u8>| matcher.is_match(k),
        );
        Ok(ScanPage::new(next, keys))
    }

    fn key_meta(&mut self, keys: &[Vec<u8>]) -> SourceResult<Vec<RawKeyMeta>> {
        self.meta_round_trips += 1;

        for key in keys {
            self.check_key("TYPE", key)?;
        }

        let mut metas: Vec<RawKeyMeta> = keys.iter().map(|key| self.raw_meta(key)).collect();
        if self.short_meta_replies && metas.len() > 1 {
            metas.pop();
        }
        Ok(metas)
    }

    fn get(&mut self, key: &[u8]) -> SourceResult<Option<String>> {
        match self.value("GET", key)? {
            Some(MemoryValue::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type("GET", key)),
            None => Ok(None),
        }
    }

    fn hscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        count: usize,
    ) -> SourceResult<ScanPage<(String, String)>> {
        match self.value("HSCAN", key)? {
            Some(MemoryValue::Hash(map)) => {
                let items = map.iter().map(|(f, v)| (f.clone(), v.clone()));
                let (next, pairs) = page(items, map.len(), cursor, count, |_| true);
                Ok(ScanPage::new(next, pairs))
            }
            Some(_) => Err(wrong_type("HSCAN", key)),
            None => Ok(ScanPage::new(0, Vec::new())),
        }
    }

    fn sscan(&mut self, key: &[u8], cursor: u64, count: usize) -> SourceResult<ScanPage<String>> {
        match self.value("SSCAN", key)? {
            Some(MemoryValue::Set(set)) => {
                let members = set.iter().cloned();
                let (next, members) = page(members, set.len(), cursor, count, |_| true);
                Ok(ScanPage::new(next, members))
            }
            Some(_) => Err(wrong_type("SSCAN", key)),
            None => Ok(ScanPage::new(0, Vec::new())),
        }
    }

    fn zscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        count: usize,
    ) -> SourceResult<ScanPage<(String, String)>> {
        match self.value("ZSCAN", key)? {
            Some(MemoryValue::Zset(map)) => {
                let items = map.iter().map(|(m, s)| (m.clone(), s.clone()));
                let (next, pairs) = page(items, map.len(), cursor, count, |_| true);
                Ok(ScanPage::new(next, pairs))
            }
            Some(_) => Err(wrong_type("ZSCAN", key)),
            None => Ok(ScanPage::new(0, Vec::new())),
        }
    }

    fn llen(&mut self, key: &[u8]) -> SourceResult<u64> {
        match self.value("LLEN", key)? {
            Some(MemoryValue::List(items)) => Ok(items.len() as u64),
            Some(_) => Err(wrong_type("LLEN", key)),
            None => Ok(0),
        }
    }

    fn lrange(&mut self, key: &[u8], start: u64, stop: u64) -> SourceResult<Vec<String>> {
        match self.value("LRANGE", key)? {
            Some(MemoryValue::List(items)) => {
                let start = usize::try_from(start).unwrap_or(usize::MAX);
                let stop = usize::try_from(stop).unwrap_or(usize::MAX);
                if start >= items.len() || start > stop {
                    return Ok(Vec::new());
                }
                let end = stop.min(items.len() - 1);
                Ok(items[start..=end].to_vec())
            }
            Some(_) => Err(wrong_type("LRANGE", key)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<Vec<u8>> {
        names.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_glob_to_regex() {
        assert!(glob_to_regex("*").is_match(b"anything"));
        assert!(glob_to_regex("user:*").is_match(b"user:1"));
        assert!(!glob_to_regex("user:*").is_match(b"order:1"));
        assert!(glob_to_regex("h?llo").is_match(b"hello"));
        assert!(glob_to_regex("h[ae]llo").is_match(b"hallo"));
        assert!(!glob_to_regex("h[^e]llo").is_match(b"hello"));
        assert!(glob_to_regex("a.b").is_match(b"a.b"));
        assert!(!glob_to_regex("a.b").is_match(b"axb"));
        assert!(glob_to_regex(r"lit\*").is_match(b"lit*"));
        assert!(!glob_to_regex(r"lit\*").is_match(b"literal"));
    }

    #[test]
    fn test_glob_matches_binary_keys() {
        assert!(glob_to_regex("*").is_match(b"\xff\xfe"));
        assert!(glob_to_regex("bin:*").is_match(b"bin:\xff\n1"));
        assert!(glob_to_regex("bin:?").is_match(b"bin:\xff"));
    }

    #[test]
    fn test_scan_visits_count_slots() {
        let mut store = MemoryStore::new();
        for i in 0..5 {
            store.set_string(format!("k{}", i), "v");
        }

        let first = store.scan(0, "*", 2).unwrap();
        assert_eq!(first.items, keys(&["k0", "k1"]));
        assert_eq!(first.cursor, 2);

        let second = store.scan(first.cursor, "*", 2).unwrap();
        assert_eq!(second.items, keys(&["k2", "k3"]));

        let last = store.scan(second.cursor, "*", 2).unwrap();
        assert_eq!(last.items, keys(&["k4"]));
        assert!(last.is_last());
    }

    #[test]
    fn test_scan_pattern_may_return_fewer() {
        let mut store = MemoryStore::new();
        store
            .set_string("a:1", "x")
            .set_string("b:1", "y")
            .set_string("a:2", "z");

        let page = store.scan(0, "a:*", 2).unwrap();
        // visits a:1, a:2 (sorted) and finishes before b:1
        assert_eq!(page.items, keys(&["a:1", "a:2"]));
        assert_eq!(page.cursor, 2);

        let page = store.scan(page.cursor, "a:*", 2).unwrap();
        assert!(page.items.is_empty());
        assert!(page.is_last());
    }

    #[test]
    fn test_binary_key_round_trip() {
        let mut store = MemoryStore::new();
        store.set_string(b"bin:\xff", "v");

        let page = store.scan(0, "*", 10).unwrap();
        assert_eq!(page.items, vec![b"bin:\xff".to_vec()]);

        let metas = store.key_meta(&page.items).unwrap();
        assert_eq!(metas[0].key_type, KeyType::String);
        assert_eq!(store.get(&page.items[0]).unwrap(), Some("v".to_string()));
    }

    #[test]
    fn test_key_meta() {
        let mut store = MemoryStore::new();
        store
            .set_hash("h", &[("f", "v")])
            .set_string("s", "x")
            .expire("s", Duration::from_secs(90));

        let metas = store.key_meta(&keys(&["h", "s", "gone"])).unwrap();

        assert_eq!(metas[0].key_type, KeyType::Hash);
        assert_eq!(metas[0].pttl_ms, -1);
        assert_eq!(metas[1].pttl_ms, 90_000);
        assert_eq!(metas[2].key_type, KeyType::None);
        assert_eq!(metas[2].pttl_ms, -2);
        assert_eq!(store.meta_round_trips(), 1);
    }

    #[test]
    fn test_failing_key_fails_whole_lookup() {
        let mut store = MemoryStore::new();
        store.set_string("a", "1").set_string("b", "2").fail_key("b");

        let err = store.key_meta(&keys(&["a", "b"])).unwrap_err();
        assert!(err.is_key_scoped());
        assert!(store.key_meta(&keys(&["a"])).is_ok());
    }

    #[test]
    fn test_short_meta_replies() {
        let mut store = MemoryStore::new();
        store.set_string("a", "1").set_string("b", "2").short_meta_replies();

        assert_eq!(store.key_meta(&keys(&["a", "b"])).unwrap().len(), 1);
        assert_eq!(store.key_meta(&keys(&["a"])).unwrap().len(), 1);
    }

    #[test]
    fn test_lrange_bounds() {
        let mut store = MemoryStore::new();
        store.set_list("l", &["a", "b", "c"]);

        assert_eq!(store.lrange(b"l", 0, 1).unwrap(), vec!["a", "b"]);
        assert_eq!(store.lrange(b"l", 2, 10).unwrap(), vec!["c"]);
        assert!(store.lrange(b"l", 5, 10).unwrap().is_empty());
        assert_eq!(store.llen(b"l").unwrap(), 3);
    }

    #[test]
    fn test_wrong_type() {
        let mut store = MemoryStore::new();
        store.set_string("s", "x");
        assert!(store.hscan(b"s", 0, 10).is_err());
        assert!(store.lrange(b"s", 0, 10).is_err());
    }

    #[test]
    fn test_fail_scan_after() {
        let mut store = MemoryStore::new();
        store.set_string("a", "1").fail_scan_after(1);

        assert!(store.scan(0, "*", 1).is_ok());
        let err = store.scan(0, "*", 1).unwrap_err();
        assert!(!err.is_key_scoped());
    }
}
