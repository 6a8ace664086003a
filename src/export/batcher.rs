//! Metadata batcher
//!
//! Resolves TYPE and TTL for a whole key batch in one pipelined round trip.
//! When the server rejects the batch for a key-scoped reason (one key denied
//! by an ACL, a reply of the wrong shape) every key is looked up again on its
//! own, so only the keys that actually fail are skipped. Keys that vanished
//! since the SCAN are skipped as well.

use crate::error::{KeyOutcome, SourceError, SourceResult};
use crate::source::{display_key, KeySource, KeyType, RawKeyMeta};
use tracing::{debug, warn};

/// Resolved type and normalized TTL of one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMeta {
    /// Key name as stored, used for every command against the key
    pub raw_key: Vec<u8>,
    /// Printable key name written to records
    pub key: String,
    pub key_type: KeyType,
    /// Whole seconds remaining, or `-1` for no expiry
    pub ttl_seconds: i64,
}

impl KeyMeta {
    pub fn new(raw_key: impl Into<Vec<u8>>, key_type: KeyType, ttl_seconds: i64) -> Self {
        let raw_key = raw_key.into();
        Self {
            key: display_key(&raw_key),
            raw_key,
            key_type,
            ttl_seconds,
        }
    }
}

/// Result of resolving one key batch
#[derive(Debug, Default)]
pub struct MetadataBatch {
    /// Keys ready to export, in scan order
    pub resolved: Vec<KeyMeta>,
    /// Keys dropped from this batch
    pub skipped: Vec<KeyOutcome>,
}

impl MetadataBatch {
    fn accept(&mut self, key: &[u8], raw: RawKeyMeta) {
        if raw.key_type == KeyType::None {
            let key = display_key(key);
            warn!(key = %key, "Key disappeared before metadata lookup, skipping");
            self.skipped.push(KeyOutcome::Skipped {
                key,
                reason: "key no longer exists".to_string(),
            });
        } else {
            self.resolved.push(KeyMeta::new(
                key,
                raw.key_type,
                normalize_ttl(raw.pttl_ms),
            ));
        }
    }

    fn skip(&mut self, key: &[u8], error: &SourceError) {
        let key = display_key(key);
        warn!(key = %key, error = %error, "Metadata lookup failed, skipping key");
        self.skipped.push(KeyOutcome::Skipped {
            key,
            reason: error.to_string(),
        });
    }
}

/// Convert a PTTL reply to whole seconds.
///
/// Anything that is not a positive number of seconds after truncation (no
/// expiry, missing key, sub-second remainder) becomes `-1`.
pub fn normalize_ttl(pttl_ms: i64) -> i64 {
    let seconds = pttl_ms / 1000;
    if seconds <= 0 {
        -1
    } else {
        seconds
    }
}

/// TYPE + PTTL for every key of a batch.
///
/// A transport failure is returned as an error. A key-scoped failure of the
/// batched lookup, including a reply count that does not match the batch,
/// falls back to one lookup per key.
pub fn resolve_metadata<S: KeySource + ?Sized>(
    source: &mut S,
    keys: &[Vec<u8>],
) -> SourceResult<MetadataBatch> {
    let mut batch = MetadataBatch::default();
    if keys.is_empty() {
        return Ok(batch);
    }

    match lookup(source, keys) {
        Ok(replies) => {
            for (key, raw) in keys.iter().zip(replies) {
                batch.accept(key, raw);
            }
        }
        Err(e) if e.is_key_scoped() => {
            debug!(
                keys = keys.len(),
                error = %e,
                "Batched metadata lookup rejected, retrying key by key"
            );
            for key in keys {
                match lookup(source, std::slice::from_ref(key)) {
                    Ok(replies) => {
                        if let Some(raw) = replies.into_iter().next() {
                            batch.accept(key, raw);
                        }
                    }
                    Err(e) if e.is_key_scoped() => batch.skip(key, &e),
                    Err(e) => return Err(e),
                }
            }
        }
        Err(e) => return Err(e),
    }

    Ok(batch)
}

/// One `key_meta` round trip whose reply must cover every key
fn lookup<S: KeySource + ?Sized>(
    source: &mut S,
    keys: &[Vec<u8>],
) -> SourceResult<Vec<RawKeyMeta>> {
    let replies = source.key_meta(keys)?;
    if replies.len() != keys.len() {
        let target = match keys {
            [single] => display_key(single),
            _ => format!("{} keys", keys.len()),
        };
        return Err(SourceError::malformed(
            "PIPELINE",
            target,
            format!("expected {} results, got {}", keys.len(), replies.len()),
        ));
    }
    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryStore;
    use std::time::Duration;

    fn keys(names: &[&str]) -> Vec<Vec<u8>> {
        names.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    fn skipped_keys(batch: &MetadataBatch) -> Vec<&str> {
        batch
            .skipped
            .iter()
            .map(|o| match o {
                KeyOutcome::Skipped { key, .. } => key.as_str(),
                KeyOutcome::Exported { .. } => "",
            })
            .collect()
    }

    #[test]
    fn test_normalize_ttl() {
        assert_eq!(normalize_ttl(-1), -1);
        assert_eq!(normalize_ttl(-2), -1);
        assert_eq!(normalize_ttl(0), -1);
        assert_eq!(normalize_ttl(999), -1);
        assert_eq!(normalize_ttl(2_700_000), 2700);
        assert_eq!(normalize_ttl(2_700_999), 2700);
    }

    #[test]
    fn test_single_round_trip() {
        let mut store = MemoryStore::new();
        store
            .set_string("a", "1")
            .set_hash("b", &[("f", "v")])
            .set_list("c", &["x"]);
        store.expire("b", Duration::from_secs(45 * 60));

        let batch = resolve_metadata(&mut store, &keys(&["a", "b", "c"])).unwrap();
        assert_eq!(store.meta_round_trips(), 1);
        assert!(batch.skipped.is_empty());

        let types: Vec<&KeyType> = batch.resolved.iter().map(|m| &m.key_type).collect();
        assert_eq!(types, vec![&KeyType::String, &KeyType::Hash, &KeyType::List]);
        assert_eq!(batch.resolved[0].ttl_seconds, -1);
        assert_eq!(batch.resolved[1].ttl_seconds, 2700);
    }

    #[test]
    fn test_rejected_key_does_not_drop_batch() {
        let mut store = MemoryStore::new();
        store
            .set_string("a", "1")
            .set_string("b", "2")
            .set_string("c", "3")
            .fail_key("b");

        let batch = resolve_metadata(&mut store, &keys(&["a", "b", "c", "gone"])).unwrap();

        let resolved: Vec<&str> = batch.resolved.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(resolved, vec!["a", "c"]);
        assert_eq!(skipped_keys(&batch), vec!["b", "gone"]);

        // one rejected batch, then one lookup per key
        assert_eq!(store.meta_round_trips(), 5);
    }

    #[test]
    fn test_short_reply_falls_back_per_key() {
        let mut store = MemoryStore::new();
        store
            .set_string("a", "1")
            .set_string("b", "2")
            .short_meta_replies();

        let batch = resolve_metadata(&mut store, &keys(&["a", "b"])).unwrap();
        assert_eq!(batch.resolved.len(), 2);
        assert!(batch.skipped.is_empty());
        assert_eq!(store.meta_round_trips(), 3);
    }

    #[test]
    fn test_binary_key_resolves() {
        let mut store = MemoryStore::new();
        store.set_string(b"k\xff", "v");

        let batch = resolve_metadata(&mut store, &[b"k\xff".to_vec()]).unwrap();
        assert!(batch.skipped.is_empty());
        assert_eq!(batch.resolved[0].raw_key, b"k\xff".to_vec());
        assert_eq!(batch.resolved[0].key, "k\u{fffd}");
        assert_eq!(batch.resolved[0].key_type, KeyType::String);
    }

    #[test]
    fn test_empty_batch() {
        let mut store = MemoryStore::new();
        let batch = resolve_metadata(&mut store, &[]).unwrap();
        assert!(batch.resolved.is_empty());
        assert!(batch.skipped.is_empty());
        assert_eq!(store.meta_round_trips(), 0);
    }
}
