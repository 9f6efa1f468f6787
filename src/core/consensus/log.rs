// src/core/consensus/log.rs

//! The in-memory replicated log owned by a raft machine.

use super::types::{LogEntry, LogIndex, Term};

/// An append-only log with suffix truncation on conflict. Index `i` lives at
/// `entries[i - 1]`.
#[derive(Debug, Clone, Default)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_index(&self) -> LogIndex {
        self.entries.len() as LogIndex
    }

    pub fn last_term(&self) -> Term {
        self.entries.last().map_or(0, |e| e.term)
    }

    /// The term of the entry at `index`. Index 0 has term 0; past the end is `None`.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        self.entry(index).map(|e| e.term)
    }

    pub fn entry(&self, index: LogIndex) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    /// Entries starting at `from` (inclusive), at most `max_count` of them and at
    /// most `max_bytes` of [`LogEntry::wire_size`]. The first entry is always
    /// included; `RaftNode::submit` keeps single entries within the budget.
    pub fn entries_from(
        &self,
        from: LogIndex,
        max_count: usize,
        max_bytes: usize,
    ) -> Vec<LogEntry> {
        let start = from.max(1) as usize - 1;
        if start >= self.entries.len() {
            return Vec::new();
        }
        let mut bytes = 0;
        let mut batch = Vec::new();
        for entry in self.entries[start..].iter().take(max_count.max(1)) {
            bytes += entry.wire_size();
            if !batch.is_empty() && bytes > max_bytes {
                break;
            }
            batch.push(entry.clone());
        }
        batch
    }

    /// Entries in `(after, up_to]`.
    pub fn range(&self, after: LogIndex, up_to: LogIndex) -> &[LogEntry] {
        let start = (after as usize).min(self.entries.len());
        let end = (up_to as usize).min(self.entries.len());
        if start >= end {
            return &[];
        }
        &self.entries[start..end]
    }

    /// Appends a new entry for `term` and returns its index.
    pub fn append(&mut self, term: Term, command: Vec<u8>) -> LogIndex {
        let index = self.last_index() + 1;
        self.entries.push(LogEntry {
            term,
            index,
            command,
        });
        index
    }

    /// True if our log holds an entry at `index` with `term` (the AppendEntries
    /// consistency check).
    pub fn matches(&self, index: LogIndex, term: Term) -> bool {
        self.term_at(index) == Some(term)
    }

    /// True if a log ending at `(last_term, last_index)` is at least as up to date
    /// as ours.
    pub fn is_up_to_date(&self, last_term: Term, last_index: LogIndex) -> bool {
        (last_term, last_index) >= (self.last_term(), self.last_index())
    }

    /// Merges entries received from a leader. An existing entry whose term
    /// differs from the incoming one is truncated together with its suffix.
    /// Returns true if anything was truncated.
    pub fn merge(&mut self, incoming: Vec<LogEntry>) -> bool {
        let mut truncated = false;
        for entry in incoming {
            match self.term_at(entry.index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    self.entries.truncate((entry.index - 1) as usize);
                    truncated = true;
                    self.entries.push(entry);
                }
                None => {
                    if entry.index == self.last_index() + 1 {
                        self.entries.push(entry);
                    }
                }
            }
        }
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: Term, index: LogIndex) -> LogEntry {
        LogEntry {
            term,
            index,
            command: format!("op-{index}").into_bytes(),
        }
    }

    #[test]
    fn empty_log_has_zero_sentinel() {
        let log = RaftLog::new();
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert!(log.matches(0, 0));
        assert!(!log.matches(1, 0));
    }

    #[test]
    fn merge_truncates_conflicting_suffix() {
        let mut log = RaftLog::new();
        log.append(1, b"a".to_vec());
        log.append(1, b"b".to_vec());
        log.append(1, b"c".to_vec());

        let truncated = log.merge(vec![entry(2, 2)]);
        assert!(truncated);
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.term_at(2), Some(2));
    }

    #[test]
    fn merge_ignores_duplicates() {
        let mut log = RaftLog::new();
        log.append(1, b"a".to_vec());
        let duplicate = log.entry(1).cloned().into_iter().collect();
        assert!(!log.merge(duplicate));
        assert_eq!(log.last_index(), 1);
    }

    #[test]
    fn up_to_date_compares_term_then_index() {
        let mut log = RaftLog::new();
        log.append(1, b"a".to_vec());
        log.append(2, b"b".to_vec());
        assert!(log.is_up_to_date(2, 2));
        assert!(log.is_up_to_date(3, 1));
        assert!(!log.is_up_to_date(2, 1));
        assert!(!log.is_up_to_date(1, 5));
    }

    #[test]
    fn range_and_entries_from_are_bounded() {
        let mut log = RaftLog::new();
        for i in 0..5 {
            log.append(1, vec![i]);
        }
        assert_eq!(log.range(1, 3).len(), 2);
        assert_eq!(log.range(4, 10).len(), 1);
        assert!(log.range(5, 5).is_empty());
        assert_eq!(log.entries_from(4, 10, usize::MAX).len(), 2);
        assert!(log.entries_from(6, 10, usize::MAX).is_empty());
        assert_eq!(log.entries_from(1, 3, usize::MAX).len(), 3);
    }

    #[test]
    fn entries_from_stops_at_the_byte_budget() {
        let mut log = RaftLog::new();
        for _ in 0..10 {
            log.append(1, vec![b'x'; 1000]);
        }
        let per_entry = log.entry(1).unwrap().wire_size();

        let batch = log.entries_from(1, 64, per_entry * 3 + 10);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].index, 1);

        // An entry larger than the budget still goes out alone.
        let batch = log.entries_from(2, 64, 100);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].index, 2);
    }
}
