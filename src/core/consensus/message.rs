// src/core/consensus/message.rs

//! Raft RPCs exchanged between core members.

use super::types::{LogEntry, LogIndex, MemberId, Term};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub enum RaftMessage {
    RequestVote {
        term: Term,
        candidate: MemberId,
        last_log_index: LogIndex,
        last_log_term: Term,
    },
    Vote {
        term: Term,
        voter: MemberId,
        granted: bool,
    },
    AppendEntries {
        term: Term,
        leader: MemberId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit: LogIndex,
    },
    AppendResult {
        term: Term,
        follower: MemberId,
        success: bool,
        /// On success, the last index now matching the leader. On failure, a
        /// hint for where the leader should retry from.
        match_index: LogIndex,
    },
}

impl RaftMessage {
    pub fn term(&self) -> Term {
        match self {
            RaftMessage::RequestVote { term, .. }
            | RaftMessage::Vote { term, .. }
            | RaftMessage::AppendEntries { term, .. }
            | RaftMessage::AppendResult { term, .. } => *term,
        }
    }
}

/// A raft message together with its routing information.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: MemberId,
    pub to: MemberId,
    pub message: RaftMessage,
}
