// src/core/protocol/mod.rs

//! Client-facing request/response types, framed as one JSON document per line.

use crate::core::consensus::{MemberId, Role, Term};
use crate::core::errors::CoredgeError;
use crate::core::membership::MemberKind;
use crate::core::routing::{AccessMode, RoutingTable};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::codec::LinesCodec;

/// Upper bound on one framed message.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

pub fn codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_LINE_LENGTH)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Asks for the current routing table.
    Discover,
    /// Asks for a single address for a session in `mode`.
    Route { mode: AccessMode },
    /// Executes an operation on this member.
    Run { mode: AccessMode, operation: String },
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Table(RoutingTable),
    Routed { address: String, term: Term },
    Ran { rows: Vec<String>, term: Term },
    Status(MemberStatus),
    Error(ErrorReply),
}

impl Response {
    pub fn error(err: &CoredgeError) -> Self {
        Response::Error(ErrorReply::from(err))
    }
}

/// What `Status` reports about a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStatus {
    pub member: MemberId,
    pub kind: MemberKind,
    pub address: String,
    pub role: Role,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub commit_index: u64,
    pub members: usize,
    #[serde(with = "humantime_serde")]
    pub staleness: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NoLeaderAvailable,
    NotLeader,
    ServiceUnavailable,
    SessionExpired,
    ClientError,
    Admin,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub code: ErrorCode,
    pub message: String,
    /// The address named by `NotLeader`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// The wait named by `NoLeaderAvailable`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waited_ms: Option<u64>,
}

impl From<&CoredgeError> for ErrorReply {
    fn from(err: &CoredgeError) -> Self {
        let (code, address, waited_ms) = match err {
            CoredgeError::NoLeaderAvailable { waited_ms } => {
                (ErrorCode::NoLeaderAvailable, None, Some(*waited_ms))
            }
            CoredgeError::NotLeader { address } => {
                (ErrorCode::NotLeader, Some(address.clone()), None)
            }
            CoredgeError::ServiceUnavailable(_) => (ErrorCode::ServiceUnavailable, None, None),
            CoredgeError::SessionExpired(_) => (ErrorCode::SessionExpired, None, None),
            // Clients see an oversized operation as their own error.
            CoredgeError::ClientException(_) | CoredgeError::CommandTooLarge { .. } => {
                (ErrorCode::ClientError, None, None)
            }
            CoredgeError::Admin(_) => (ErrorCode::Admin, None, None),
            CoredgeError::Unreachable { .. }
            | CoredgeError::Protocol(_)
            | CoredgeError::Io(_)
            | CoredgeError::Internal(_) => (ErrorCode::Internal, None, None),
        };
        Self {
            code,
            message: err.to_string(),
            address,
            waited_ms,
        }
    }
}

impl From<ErrorReply> for CoredgeError {
    fn from(reply: ErrorReply) -> Self {
        match reply.code {
            ErrorCode::NoLeaderAvailable => CoredgeError::NoLeaderAvailable {
                waited_ms: reply.waited_ms.unwrap_or_default(),
            },
            ErrorCode::NotLeader => CoredgeError::NotLeader {
                address: reply.address.unwrap_or_default(),
            },
            ErrorCode::ServiceUnavailable => CoredgeError::ServiceUnavailable(reply.message),
            ErrorCode::SessionExpired => CoredgeError::SessionExpired(reply.message),
            ErrorCode::ClientError => CoredgeError::ClientException(reply.message),
            ErrorCode::Admin => CoredgeError::Admin(reply.message),
            ErrorCode::Internal => CoredgeError::Internal(reply.message),
        }
    }
}

pub fn encode_line<T: Serialize>(value: &T) -> Result<String, CoredgeError> {
    Ok(serde_json::to_string(value)?)
}

pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, CoredgeError> {
    Ok(serde_json::from_str(line)?)
}
