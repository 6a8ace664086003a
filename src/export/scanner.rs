//! Key-space scanner
//!
//! Drives the SCAN cursor from `0` back to `0`, handing out keys in batches of
//! at most `batch_size`. Only one SCAN page is ever held in memory.

use crate::error::SourceResult;
use crate::source::{KeySource, CURSOR_START};
use std::collections::VecDeque;
use tracing::debug;

/// Resumable SCAN sweep over keys matching a glob pattern
#[derive(Debug)]
pub struct KeyScanner {
    pattern: String,
    batch_size: usize,
    cursor: u64,
    pending: VecDeque<Vec<u8>>,
    finished: bool,
    scan_calls: u64,
    keys_seen: u64,
}

impl KeyScanner {
    pub fn new(pattern: &str, batch_size: usize) -> Self {
        Self {
            pattern: pattern.to_string(),
            batch_size: batch_size.max(1),
            cursor: CURSOR_START,
            pending: VecDeque::new(),
            finished: false,
            scan_calls: 0,
            keys_seen: 0,
        }
    }

    /// Next batch of keys, or `None` once the sweep has completed.
    ///
    /// Any error from the store is returned as is and ends the sweep for the
    /// caller; there is no retry from the last good cursor.
    pub fn next_batch<S: KeySource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> SourceResult<Option<Vec<Vec<u8>>>> {
        loop {
            if !self.pending.is_empty() {
                let take = self.batch_size.min(self.pending.len());
                let batch: Vec<Vec<u8>> = self.pending.drain(..take).collect();
                self.keys_seen += batch.len() as u64;
                return Ok(Some(batch));
            }

            if self.finished {
                return Ok(None);
            }

            let page = source.scan(self.cursor, &self.pattern, self.batch_size)?;
            self.scan_calls += 1;

            debug!(
                cursor = self.cursor,
                next_cursor = page.cursor,
                keys = page.items.len(),
                "SCAN page"
            );

            self.finished = page.is_last();
            self.cursor = page.cursor;
            self.pending.extend(page.items);
        }
    }

    /// Cursor the next SCAN call will use
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.finished && self.pending.is_empty()
    }

    pub fn scan_calls(&self) -> u64 {
        self.scan_calls
    }

    /// Keys handed out so far
    pub fn keys_seen(&self) -> u64 {
        self.keys_seen
    }
}
