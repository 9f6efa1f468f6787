// src/core/consensus/mod.rs

//! The raft engine: leader election, term and role management, and log
//! replication across the core members.

pub mod applier;
pub mod log;
pub mod machine;
pub mod message;
pub mod node;
pub mod transport;
pub mod types;

pub use applier::{AppliedLog, CommandApplier};
pub use log::RaftLog;
pub use machine::{Effect, Input, MachineConfig, Progress, RaftMachine, RoleState};
pub use message::{Envelope, RaftMessage};
pub use node::{RaftNode, RaftWorker};
pub use transport::RaftTransport;
pub use types::{ENTRY_OVERHEAD, LogEntry, LogIndex, MemberId, RaftStatus, Role, Term};
