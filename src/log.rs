//! The replicated log: entries, their payload kind, and the refcounted
//! store that holds them, per spec §3/§4.1.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::membership::Configuration;
use crate::LogId;

/// What an entry carries. `Command` entries are opaque to the core and
/// handed to the `Fsm`; `Configuration` entries are interpreted by the core
/// itself to drive membership changes (spec §4.7).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EntryType {
    /// A no-op appended by a new leader to commit entries from prior terms,
    /// per the Leader Completeness safety argument (spec §4.2/§8).
    Blank,
    Command(Bytes),
    Configuration(Configuration),
}

/// One entry in the replicated log.
///
/// `payload` is modeled as `bytes::Bytes`: cloning an `Entry` is O(1) and
/// shares the same backing allocation, which is the idiomatic Rust
/// counterpart to the spec's refcounted batch-handle design (§3's
/// "entries sharing a backing allocation with refcounted release").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: LogId,
    pub entry_type: EntryType,
}

impl Entry {
    pub fn blank(id: LogId) -> Self {
        Self { id, entry_type: EntryType::Blank }
    }

    pub fn command(id: LogId, payload: Bytes) -> Self {
        Self { id, entry_type: EntryType::Command(payload) }
    }

    pub fn configuration(id: LogId, configuration: Configuration) -> Self {
        Self { id, entry_type: EntryType::Configuration(configuration) }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.entry_type, EntryType::Configuration(_))
    }
}

/// The in-memory replicated log.
///
/// Backed by a `VecDeque<Entry>` (a growable ring buffer by construction)
/// plus a `HashMap<u64, u32>` counting outstanding references to each
/// index still held by an in-flight replication or apply operation. An
/// index below `first_index()` can only be physically dropped once its
/// refcount reaches zero, mirroring spec §4.1's acquire/release contract
/// without hand-rolling a fixed-size open-addressed table.
#[derive(Debug, Default)]
pub struct Log {
    entries: VecDeque<Entry>,
    refs: HashMap<u64, u32>,
    /// Index of the entry immediately before `entries.front()`; 0 if the
    /// log is empty and no snapshot has been installed, otherwise the
    /// index of the most recent snapshot's last included entry.
    offset_index: u64,
    offset_term: u64,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log whose entries below `offset.index` have been
    /// compacted away by a snapshot, per spec §4.6.
    pub fn reset_to_snapshot(&mut self, offset: LogId) {
        self.entries.clear();
        self.refs.clear();
        self.offset_index = offset.index;
        self.offset_term = offset.term;
    }

    pub fn first_index(&self) -> u64 {
        self.offset_index + 1
    }

    pub fn last_index(&self) -> u64 {
        self.offset_index + self.entries.len() as u64
    }

    pub fn last_log_id(&self) -> LogId {
        match self.entries.back() {
            Some(e) => e.id,
            None => LogId::new(self.offset_term, self.offset_index),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn slot(&self, index: u64) -> Option<usize> {
        if index <= self.offset_index || index > self.last_index() {
            return None;
        }
        Some((index - self.offset_index - 1) as usize)
    }

    pub fn get(&self, index: u64) -> Option<&Entry> {
        self.slot(index).and_then(|s| self.entries.get(s))
    }

    pub fn term_of(&self, index: u64) -> Option<u64> {
        if index == self.offset_index {
            return Some(self.offset_term);
        }
        self.get(index).map(|e| e.id.term)
    }

    /// Entries in `[start, end)`, clamped to what is actually retained.
    pub fn range(&self, start: u64, end: u64) -> Vec<Entry> {
        let start = start.max(self.first_index());
        let end = end.min(self.last_index() + 1);
        if start >= end {
            return Vec::new();
        }
        (start..end).filter_map(|i| self.get(i).cloned()).collect()
    }

    /// Append entries at the end of the log. Callers are responsible for
    /// having already resolved any conflict via `truncate_suffix`.
    pub fn append(&mut self, entries: impl IntoIterator<Item = Entry>) {
        for entry in entries {
            debug_assert_eq!(entry.id.index, self.last_index() + 1);
            self.entries.push_back(entry);
        }
    }

    /// Drop every entry with index `>= from`, per spec §4.4's conflict
    /// resolution. Entries still referenced are retained logically (their
    /// bytes stay alive through the cloned `Bytes` held by the referencing
    /// operation) but removed from the log's own view.
    pub fn truncate_suffix(&mut self, from: u64) {
        if from > self.last_index() {
            return;
        }
        let keep = from.saturating_sub(self.offset_index + 1) as usize;
        self.entries.truncate(keep.min(self.entries.len()));
        self.refs.retain(|&index, _| index < from);
    }

    /// Drop compacted entries with index `<= through`, per spec §4.6. An
    /// entry with an outstanding reference is skipped and revisited the
    /// next time its refcount reaches zero via `release`.
    pub fn shift_prefix(&mut self, through: u64) {
        while let Some(front) = self.entries.front() {
            if front.id.index > through {
                break;
            }
            if self.refs.get(&front.id.index).copied().unwrap_or(0) > 0 {
                break;
            }
            self.offset_index = front.id.index;
            self.offset_term = front.id.term;
            self.entries.pop_front();
        }
    }

    /// Mark index as in use by an in-flight operation (e.g. a replication
    /// send or a pending apply), preventing `shift_prefix` from dropping it.
    pub fn acquire(&mut self, index: u64) {
        *self.refs.entry(index).or_insert(0) += 1;
    }

    /// Release a reference taken by `acquire`. Once the count for `index`
    /// reaches zero the index becomes eligible for compaction again.
    pub fn release(&mut self, index: u64) {
        if let Some(count) = self.refs.get_mut(&index) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.refs.remove(&index);
            }
        }
    }

    pub fn ref_count(&self, index: u64) -> u32 {
        self.refs.get(&index).copied().unwrap_or(0)
    }

    pub fn n_entries(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(term: u64, index: u64) -> Entry {
        Entry::command(LogId::new(term, index), Bytes::from_static(b"x"))
    }

    #[test]
    fn append_and_read_back() {
        let mut log = Log::new();
        log.append(vec![cmd(1, 1), cmd(1, 2), cmd(2, 3)]);
        assert_eq!(log.last_index(), 3);
        assert_eq!(log.first_index(), 1);
        assert_eq!(log.term_of(2), Some(1));
        assert_eq!(log.last_log_id(), LogId::new(2, 3));
    }

    #[test]
    fn truncate_suffix_drops_conflicting_tail() {
        let mut log = Log::new();
        log.append(vec![cmd(1, 1), cmd(1, 2), cmd(1, 3)]);
        log.truncate_suffix(2);
        assert_eq!(log.last_index(), 1);
        log.append(vec![cmd(2, 2)]);
        assert_eq!(log.term_of(2), Some(2));
    }

    #[test]
    fn shift_prefix_respects_outstanding_refs() {
        let mut log = Log::new();
        log.append(vec![cmd(1, 1), cmd(1, 2), cmd(1, 3)]);
        log.acquire(2);
        log.shift_prefix(3);
        // index 2 is still referenced, so compaction stops before it.
        assert_eq!(log.first_index(), 2);
        log.release(2);
        log.shift_prefix(3);
        assert_eq!(log.first_index(), 4);
    }

    #[test]
    fn refcount_soundness_across_acquire_release() {
        let mut log = Log::new();
        log.append(vec![cmd(1, 1)]);
        log.acquire(1);
        log.acquire(1);
        assert_eq!(log.ref_count(1), 2);
        log.release(1);
        assert_eq!(log.ref_count(1), 1);
        log.release(1);
        assert_eq!(log.ref_count(1), 0);
    }

    #[test]
    fn reset_to_snapshot_advances_offset() {
        let mut log = Log::new();
        log.append(vec![cmd(1, 1), cmd(1, 2)]);
        log.reset_to_snapshot(LogId::new(1, 2));
        assert!(log.is_empty());
        assert_eq!(log.first_index(), 3);
        assert_eq!(log.last_log_id(), LogId::new(1, 2));
    }
}
