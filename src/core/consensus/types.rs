// src/core/consensus/types.rs

//! Identifiers, roles and log entries shared by every part of the raft engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A raft term. Monotonically increasing, never decreases on a member.
pub type Term = u64;

/// A 1-based position in the replicated log. `0` means "before the first entry".
pub type LogIndex = u64;

/// The identity of a cluster member.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random 40-character hex id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 20];
        if getrandom::fill(&mut bytes).is_err() {
            bytes = rand::random();
        }
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The raft role of a core member. Edge members always report `Follower`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl Role {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Role::Follower => 0,
            Role::Candidate => 1,
            Role::Leader => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            2 => Role::Leader,
            1 => Role::Candidate,
            _ => Role::Follower,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Follower => "FOLLOWER",
            Role::Candidate => "CANDIDATE",
            Role::Leader => "LEADER",
        };
        f.write_str(name)
    }
}

/// A single replicated command. An empty `command` is the no-op a new leader
/// appends for its own term; appliers never see it.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub command: Vec<u8>,
}

/// Upper bound on what an entry's term, index and length prefix add to its
/// command once encoded for the bus.
pub const ENTRY_OVERHEAD: usize = 32;

impl LogEntry {
    pub fn is_noop(&self) -> bool {
        self.command.is_empty()
    }

    /// Bytes this entry takes in an AppendEntries, rounded up.
    pub fn wire_size(&self) -> usize {
        self.command.len() + ENTRY_OVERHEAD
    }
}

/// An immutable snapshot of a raft node, republished on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftStatus {
    pub member: MemberId,
    pub role: Role,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub commit_index: LogIndex,
    pub last_log_index: LogIndex,
    /// Bumped every time any other field changes.
    pub version: u64,
}
