// src/core/consensus/applier.rs

//! The seam between the raft engine and the storage/execution layer.

use super::types::{LogEntry, LogIndex};
use parking_lot::RwLock;

/// Receives committed entries in log order and answers local reads.
pub trait CommandApplier: Send + Sync + std::fmt::Debug {
    /// Applies one committed entry. Never called for no-op entries.
    fn apply(&self, entry: &LogEntry);

    /// Executes a read-only operation against the applied state.
    fn read(&self, operation: &str) -> Vec<String>;
}

/// The default applier: records every applied operation and answers reads
/// with the number of operations applied so far.
#[derive(Debug, Default)]
pub struct AppliedLog {
    applied: RwLock<Vec<(LogIndex, String)>>,
}

impl AppliedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every applied operation with its log index, in apply order.
    pub fn applied(&self) -> Vec<(LogIndex, String)> {
        self.applied.read().clone()
    }

    pub fn len(&self) -> usize {
        self.applied.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.read().is_empty()
    }
}

impl CommandApplier for AppliedLog {
    fn apply(&self, entry: &LogEntry) {
        let operation = String::from_utf8_lossy(&entry.command).into_owned();
        self.applied.write().push((entry.index, operation));
    }

    fn read(&self, _operation: &str) -> Vec<String> {
        vec![self.len().to_string()]
    }
}
