// src/core/routing/table.rs

use crate::core::consensus::Term;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a client intends to do with a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => f.write_str("READ"),
            AccessMode::Write => f.write_str("WRITE"),
        }
    }
}

/// An immutable snapshot of where clients should send traffic. A newer table
/// replaces an older one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    /// Client address of the leader, if one is known.
    pub writer: Option<String>,
    /// Members that may serve reads.
    pub readers: Vec<String>,
    /// Core members that can answer discovery.
    pub routers: Vec<String>,
    pub term: Term,
    /// Monotonic per routing service.
    pub version: u64,
}

impl RoutingTable {
    pub fn is_readable(&self) -> bool {
        !self.readers.is_empty()
    }

    pub fn is_writable(&self) -> bool {
        self.writer.is_some()
    }
}
