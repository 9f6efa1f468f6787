// src/core/errors.rs

//! Defines the primary error type for the consensus and routing core.

use std::sync::Arc;
use thiserror::Error;

/// Fixed text returned when a READ session is asked to run a write.
pub const WRITE_IN_READ_MODE: &str = "Write queries cannot be performed in READ access mode.";

/// The main error enum. The user-visible variants carry their final message text,
/// so `to_string()` is what a client sees.
#[derive(Error, Debug)]
pub enum CoredgeError {
    #[error("No leader available after waiting {waited_ms}ms")]
    NoLeaderAvailable { waited_ms: u64 },

    #[error("Server at {address} is not the leader")]
    NotLeader { address: String },

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    SessionExpired(String),

    #[error("{0}")]
    ClientException(String),

    #[error("{0}")]
    Admin(String),

    #[error("Operation of {size} bytes exceeds the replication limit of {limit} bytes")]
    CommandTooLarge { size: usize, limit: usize },

    #[error("Server at {address} is unreachable")]
    Unreachable { address: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoredgeError {
    /// Builds the error an edge member (or an unreachable router) returns for discovery.
    pub fn discovery_failed(address: &str) -> Self {
        CoredgeError::ServiceUnavailable(format!("Server {address} couldn't perform discovery"))
    }

    /// Returns true if this error means the target could not be contacted at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, CoredgeError::Unreachable { .. } | CoredgeError::Io(_))
    }
}

impl Clone for CoredgeError {
    fn clone(&self) -> Self {
        match self {
            CoredgeError::NoLeaderAvailable { waited_ms } => CoredgeError::NoLeaderAvailable {
                waited_ms: *waited_ms,
            },
            CoredgeError::NotLeader { address } => CoredgeError::NotLeader {
                address: address.clone(),
            },
            CoredgeError::ServiceUnavailable(s) => CoredgeError::ServiceUnavailable(s.clone()),
            CoredgeError::SessionExpired(s) => CoredgeError::SessionExpired(s.clone()),
            CoredgeError::ClientException(s) => CoredgeError::ClientException(s.clone()),
            CoredgeError::Admin(s) => CoredgeError::Admin(s.clone()),
            CoredgeError::CommandTooLarge { size, limit } => CoredgeError::CommandTooLarge {
                size: *size,
                limit: *limit,
            },
            CoredgeError::Unreachable { address } => CoredgeError::Unreachable {
                address: address.clone(),
            },
            CoredgeError::Protocol(s) => CoredgeError::Protocol(s.clone()),
            CoredgeError::Io(e) => CoredgeError::Io(Arc::clone(e)),
            CoredgeError::Internal(s) => CoredgeError::Internal(s.clone()),
        }
    }
}

impl PartialEq for CoredgeError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                CoredgeError::NoLeaderAvailable { waited_ms: a },
                CoredgeError::NoLeaderAvailable { waited_ms: b },
            ) => a == b,
            (CoredgeError::NotLeader { address: a }, CoredgeError::NotLeader { address: b }) => {
                a == b
            }
            (CoredgeError::ServiceUnavailable(a), CoredgeError::ServiceUnavailable(b)) => a == b,
            (CoredgeError::SessionExpired(a), CoredgeError::SessionExpired(b)) => a == b,
            (CoredgeError::ClientException(a), CoredgeError::ClientException(b)) => a == b,
            (CoredgeError::Admin(a), CoredgeError::Admin(b)) => a == b,
            (
                CoredgeError::CommandTooLarge { size: a, limit: x },
                CoredgeError::CommandTooLarge { size: b, limit: y },
            ) => a == b && x == y,
            (
                CoredgeError::Unreachable { address: a },
                CoredgeError::Unreachable { address: b },
            ) => a == b,
            (CoredgeError::Protocol(a), CoredgeError::Protocol(b)) => a == b,
            (CoredgeError::Io(e1), CoredgeError::Io(e2)) => e1.to_string() == e2.to_string(),
            (CoredgeError::Internal(a), CoredgeError::Internal(b)) => a == b,
            _ => false,
        }
    }
}

impl From<std::io::Error> for CoredgeError {
    fn from(e: std::io::Error) -> Self {
        CoredgeError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for CoredgeError {
    fn from(e: serde_json::Error) -> Self {
        CoredgeError::Protocol(e.to_string())
    }
}

impl From<tokio_util::codec::LinesCodecError> for CoredgeError {
    fn from(e: tokio_util::codec::LinesCodecError) -> Self {
        match e {
            tokio_util::codec::LinesCodecError::Io(io) => CoredgeError::Io(Arc::new(io)),
            other => CoredgeError::Protocol(other.to_string()),
        }
    }
}
