//! Value flattener
//!
//! Decomposes one key into records and streams them straight into the sink:
//!
//! | type     | synthetic key          | value                        |
//! |----------|------------------------|------------------------------|
//! | `string` | `<key>`                | literal content              |
//! | `hash`   | `<key>:field:<field>`  | field content                |
//! | `set`    | `<key>:member:<m>`     | member                       |
//! | `zset`   | `<key>:member:<m>`     | `score=<raw>,rank=<n>`       |
//! | `list`   | `<key>:index:<i>`      | element                      |
//!
//! Composite values are read page by page (HSCAN/SSCAN/ZSCAN cursors, LRANGE
//! windows for lists) so a single large key never sits in memory whole.
//! Zset ranks count emission order within the sub-scan, which is not
//! score order.
//!
//! A key that yields nothing (GET nil, an empty sub-scan, LLEN 0) was deleted
//! after its TYPE lookup, since Redis never keeps an empty composite, and is
//! skipped.

use crate::error::{DumperError, KeyOutcome, Result, SourceError};
use crate::export::batcher::KeyMeta;
use crate::sink::{PartitionedSink, Record, RecordType};
use crate::source::{KeySource, KeyType, CURSOR_START};
use tracing::{debug, warn};

/// Paging knobs for composite values
#[derive(Debug, Clone)]
pub struct FlattenOptions {
    /// COUNT hint for HSCAN/SSCAN/ZSCAN
    pub subscan_count: usize,
    /// Elements per LRANGE window
    pub list_page_size: usize,
    /// Emit a `{key, <type>, size=<n>}` row after each key's elements
    pub key_summary: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            subscan_count: 1000,
            list_page_size: 1000,
            key_summary: false,
        }
    }
}

/// Record count and payload bytes emitted for one key
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Emitted {
    records: u64,
    bytes: u64,
}

impl Emitted {
    fn add(&mut self, payload_len: usize) {
        self.records += 1;
        self.bytes += payload_len as u64;
    }
}

/// Rough key size used by keys-only exports; no value is fetched
pub fn estimate_key_size(key: &[u8], key_type: &KeyType) -> u64 {
    let len = key.len() as u64;
    if key_type.is_composite() {
        len * 10
    } else {
        len
    }
}

/// The single row written per key in keys-only mode
pub fn key_record(meta: &KeyMeta, exported_at: &str) -> Record {
    Record::new(
        meta.key.as_str(),
        RecordType::Key(meta.key_type.clone()),
        format!(
            "size_estimate={}",
            estimate_key_size(&meta.raw_key, &meta.key_type)
        ),
        meta.ttl_seconds,
        exported_at,
    )
}

/// Flatten one key into the sink.
///
/// Per-key source failures and unsupported types come back as
/// [`KeyOutcome::Skipped`]; records already written for the key stay in the
/// output. Transport and sink failures are returned as errors.
pub fn flatten_key<S: KeySource + ?Sized>(
    source: &mut S,
    sink: &mut PartitionedSink,
    meta: &KeyMeta,
    options: &FlattenOptions,
    exported_at: &str,
) -> Result<KeyOutcome> {
    let mut writer = KeyWriter {
        sink,
        meta,
        exported_at,
        emitted: Emitted::default(),
    };

    let result = match &meta.key_type {
        KeyType::String => writer.string(source),
        KeyType::Hash => writer.hash(source, options.subscan_count),
        KeyType::Set => writer.set(source, options.subscan_count),
        KeyType::Zset => writer.zset(source, options.subscan_count),
        KeyType::List => writer.list(source, options.list_page_size),
        other => {
            debug!(key = %meta.key, key_type = %other, "Unsupported type");
            return Ok(KeyOutcome::Skipped {
                key: meta.key.clone(),
                reason: format!("unsupported type '{}'", other),
            });
        }
    };

    match result {
        Ok(()) => {
            let emitted = writer.emitted;
            if options.key_summary {
                writer.summary()?;
            }
            Ok(KeyOutcome::Exported {
                records: writer.emitted.records,
                bytes: emitted.bytes,
            })
        }
        Err(DumperError::Source(e)) if e.is_key_scoped() => {
            warn!(
                key = %meta.key,
                written = writer.emitted.records,
                error = %e,
                "Failed to read value, skipping key"
            );
            Ok(KeyOutcome::Skipped {
                key: meta.key.clone(),
                reason: e.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

/// Writes the records of one key and keeps the running totals
struct KeyWriter<'a> {
    sink: &'a mut PartitionedSink,
    meta: &'a KeyMeta,
    exported_at: &'a str,
    emitted: Emitted,
}

impl KeyWriter<'_> {
    fn emit(
        &mut self,
        suffix: Option<(&str, &str)>,
        record_type: RecordType,
        value: String,
        payload_len: usize,
    ) -> Result<()> {
        let key = match suffix {
            Some((kind, name)) => format!("{}:{}:{}", self.meta.key, kind, name),
            None => self.meta.key.clone(),
        };
        let record = Record::new(
            key,
            record_type,
            value,
            self.meta.ttl_seconds,
            self.exported_at,
        );
        self.sink.write(&record)?;
        self.emitted.add(payload_len);
        Ok(())
    }

    /// Fails with a key-scoped error when nothing was read for the key
    fn ensure_found(&self, command: &'static str) -> Result<()> {
        if self.emitted.records == 0 {
            let key = self.meta.key.as_str();
            Err(SourceError::command(command, key, "key no longer exists").into())
        } else {
            Ok(())
        }
    }

    fn string<S: KeySource + ?Sized>(&mut self, source: &mut S) -> Result<()> {
        if let Some(value) = source.get(&self.meta.raw_key)? {
            let len = value.len();
            self.emit(None, RecordType::String, value, len)?;
        }
        self.ensure_found("GET")
    }

    fn hash<S: KeySource + ?Sized>(&mut self, source: &mut S, count: usize) -> Result<()> {
        let mut cursor = CURSOR_START;
        loop {
            let page = source.hscan(&self.meta.raw_key, cursor, count)?;
            for (field, value) in page.items {
                let len = field.len() + value.len();
                self.emit(Some(("field", &field)), RecordType::HashField, value, len)?;
            }
            if page.cursor == CURSOR_START {
                return self.ensure_found("HSCAN");
            }
            cursor = page.cursor;
        }
    }

    fn set<S: KeySource + ?Sized>(&mut self, source: &mut S, count: usize) -> Result<()> {
        let mut cursor = CURSOR_START;
        loop {
            let page = source.sscan(&self.meta.raw_key, cursor, count)?;
            for member in page.items {
                let len = member.len();
                let value = member.clone();
                self.emit(Some(("member", &member)), RecordType::SetMember, value, len)?;
            }
            if page.cursor == CURSOR_START {
                return self.ensure_found("SSCAN");
            }
            cursor = page.cursor;
        }
    }

    fn zset<S: KeySource + ?Sized>(&mut self, source: &mut S, count: usize) -> Result<()> {
        let mut cursor = CURSOR_START;
        let mut rank: u64 = 0;
        loop {
            let page = source.zscan(&self.meta.raw_key, cursor, count)?;
            for (member, score) in page.items {
                let len = member.len();
                let value = format!("score={},rank={}", score, rank);
                self.emit(Some(("member", &member)), RecordType::ZsetMember, value, len)?;
                rank += 1;
            }
            if page.cursor == CURSOR_START {
                return self.ensure_found("ZSCAN");
            }
            cursor = page.cursor;
        }
    }

    fn list<S: KeySource + ?Sized>(&mut self, source: &mut S, page_size: usize) -> Result<()> {
        let len = source.llen(&self.meta.raw_key)?;
        let page_size = page_size.max(1) as u64;

        let mut start = 0;
        while start < len {
            let stop = (start + page_size).min(len) - 1;
            let items = source.lrange(&self.meta.raw_key, start, stop)?;
            if items.is_empty() {
                // List shrank under us
                break;
            }
            for (offset, item) in items.into_iter().enumerate() {
                let index = (start + offset as u64).to_string();
                let item_len = item.len();
                self.emit(Some(("index", &index)), RecordType::ListItem, item, item_len)?;
            }
            start = stop + 1;
        }
        self.ensure_found("LRANGE")
    }

    fn summary(&mut self) -> Result<()> {
        let record = Record::new(
            self.meta.key.as_str(),
            RecordType::Key(self.meta.key_type.clone()),
            format!("size={}", self.emitted.bytes),
            self.meta.ttl_seconds,
            self.exported_at,
        );
        self.sink.write(&record)?;
        self.emitted.records += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::sink::SinkConfig;
    use crate::source::MemoryStore;
    use tempfile::{tempdir, TempDir};

    const NOW: &str = "2024-01-15T14:30:00Z";

    fn meta(key: &str, key_type: KeyType, ttl: i64) -> KeyMeta {
        KeyMeta::new(key, key_type, ttl)
    }

    fn flatten(store: &mut MemoryStore, sink: &mut PartitionedSink, meta: &KeyMeta) -> KeyOutcome {
        flatten_key(store, sink, meta, &FlattenOptions::default(), NOW).unwrap()
    }

    fn sink() -> (TempDir, PartitionedSink) {
        let dir = tempdir().unwrap();
        let sink = PartitionedSink::new(SinkConfig::new(dir.path(), OutputFormat::Csv)).unwrap();
        (dir, sink)
    }

    /// Read every data row of every CSV partition as (key, type, value, ttl)
    fn rows(sink: &mut PartitionedSink) -> Vec<(String, String, String, String)> {
        let meta = sink.close().unwrap();
        let mut out = Vec::new();
        for part in &meta.partitions {
            let path = crate::sink::partition_dir(sink.output_dir(), part.start_time)
                .join(&part.file_name);
            let mut reader = csv::Reader::from_path(path).unwrap();
            for row in reader.records() {
                let row = row.unwrap();
                out.push((
                    row[0].to_string(),
                    row[1].to_string(),
                    row[2].to_string(),
                    row[3].to_string(),
                ));
            }
        }
        out
    }

    #[test]
    fn test_hash_fields() {
        let mut store = MemoryStore::new();
        store.set_hash("k", &[("a", "1"), ("b", "2")]);
        let (_dir, mut sink) = sink();

        let outcome = flatten(&mut store, &mut sink, &meta("k", KeyType::Hash, -1));
        assert_eq!(outcome, KeyOutcome::Exported { records: 2, bytes: 4 });

        let rows = rows(&mut sink);
        assert_eq!(
            rows,
            vec![
                ("k:field:a".into(), "hash_field".into(), "1".into(), "-1".into()),
                ("k:field:b".into(), "hash_field".into(), "2".into(), "-1".into()),
            ]
        );
    }

    #[test]
    fn test_string_value() {
        let mut store = MemoryStore::new();
        store.set_string("user:2", "x");
        let (_dir, mut sink) = sink();

        let outcome = flatten(&mut store, &mut sink, &meta("user:2", KeyType::String, 2700));
        assert_eq!(outcome.records(), 1);
        assert_eq!(
            rows(&mut sink),
            vec![("user:2".into(), "string".into(), "x".into(), "2700".into())]
        );
    }

    #[test]
    fn test_zset_rank_follows_emission_order() {
        let mut store = MemoryStore::new();
        store.set_zset("board", &[("alice", "10"), ("bob", "7.5"), ("carol", "12")]);
        let (_dir, mut sink) = sink();

        let options = FlattenOptions {
            subscan_count: 1,
            ..Default::default()
        };
        let board = meta("board", KeyType::Zset, -1);
        flatten_key(&mut store, &mut sink, &board, &options, NOW).unwrap();

        let values: Vec<(String, String)> =
            rows(&mut sink).into_iter().map(|r| (r.0, r.2)).collect();
        assert_eq!(
            values,
            vec![
                ("board:member:alice".into(), "score=10,rank=0".into()),
                ("board:member:bob".into(), "score=7.5,rank=1".into()),
                ("board:member:carol".into(), "score=12,rank=2".into()),
            ]
        );
    }

    #[test]
    fn test_set_members() {
        let mut store = MemoryStore::new();
        store.set_members("tags", &["red", "blue"]);
        let (_dir, mut sink) = sink();

        flatten(&mut store, &mut sink, &meta("tags", KeyType::Set, -1));

        let keys: Vec<String> = rows(&mut sink).into_iter().map(|r| r.0).collect();
        assert_eq!(keys, vec!["tags:member:blue", "tags:member:red"]);
    }

    #[test]
    fn test_list_pages_use_absolute_index() {
        let mut store = MemoryStore::new();
        store.set_list("q", &["a", "b", "c", "d", "e"]);
        let (_dir, mut sink) = sink();

        let options = FlattenOptions {
            list_page_size: 2,
            ..Default::default()
        };
        let queue = meta("q", KeyType::List, -1);
        let outcome = flatten_key(&mut store, &mut sink, &queue, &options, NOW).unwrap();
        assert_eq!(outcome.records(), 5);

        let rows: Vec<(String, String)> =
            rows(&mut sink).into_iter().map(|r| (r.0, r.2)).collect();
        assert_eq!(rows[0], ("q:index:0".into(), "a".into()));
        assert_eq!(rows[4], ("q:index:4".into(), "e".into()));
    }

    #[test]
    fn test_unsupported_type_skipped() {
        let mut store = MemoryStore::new();
        let (_dir, mut sink) = sink();

        let outcome = flatten(&mut store, &mut sink, &meta("events", KeyType::Stream, -1));
        assert!(!outcome.is_exported());
        assert_eq!(sink.records_written(), 0);
    }

    #[test]
    fn test_vanished_key_skipped() {
        let mut store = MemoryStore::new();
        let (_dir, mut sink) = sink();

        for key_type in [
            KeyType::String,
            KeyType::Hash,
            KeyType::Set,
            KeyType::Zset,
            KeyType::List,
        ] {
            let outcome = flatten(&mut store, &mut sink, &meta("gone", key_type.clone(), -1));
            match outcome {
                KeyOutcome::Skipped { key, reason } => {
                    assert_eq!(key, "gone");
                    assert!(reason.contains("no longer exists"), "{}: {}", key_type, reason);
                }
                other => panic!("{} not skipped: {:?}", key_type, other),
            }
        }
        assert_eq!(sink.records_written(), 0);
    }

    #[test]
    fn test_binary_key_uses_raw_name() {
        let mut store = MemoryStore::new();
        store.set_hash(b"h\xff", &[("f", "v")]);
        let (_dir, mut sink) = sink();

        let meta = KeyMeta::new(b"h\xff".to_vec(), KeyType::Hash, -1);
        let outcome = flatten(&mut store, &mut sink, &meta);
        assert_eq!(outcome.records(), 1);
        assert_eq!(rows(&mut sink)[0].0, "h\u{fffd}:field:f");
    }

    #[test]
    fn test_key_summary_record() {
        let mut store = MemoryStore::new();
        store.set_hash("k", &[("a", "1"), ("bb", "22")]);
        let (_dir, mut sink) = sink();

        let options = FlattenOptions {
            key_summary: true,
            ..Default::default()
        };
        let hash = meta("k", KeyType::Hash, -1);
        let outcome = flatten_key(&mut store, &mut sink, &hash, &options, NOW).unwrap();
        assert_eq!(outcome, KeyOutcome::Exported { records: 3, bytes: 6 });

        let last = rows(&mut sink).pop().unwrap();
        assert_eq!(last, ("k".into(), "hash".into(), "size=6".into(), "-1".into()));
    }

    #[test]
    fn test_key_record_estimate() {
        let record = key_record(&meta("user:1", KeyType::Hash, 30), NOW);
        assert_eq!(record.value, "size_estimate=60");
        assert_eq!(record.record_type.as_str(), "hash");
        assert_eq!(record.ttl_seconds, 30);

        assert_eq!(estimate_key_size(b"abc", &KeyType::String), 3);
        assert_eq!(estimate_key_size(b"abc", &KeyType::Stream), 3);
    }
}
