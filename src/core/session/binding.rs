// src/core/session/binding.rs

//! A client session bound to one member address.

use super::classify;
use crate::core::client::Connector;
use crate::core::consensus::Term;
use crate::core::errors::{CoredgeError, WRITE_IN_READ_MODE};
use crate::core::metrics::SESSIONS_EXPIRED_TOTAL;
use crate::core::protocol::{ErrorCode, Request, Response};
use crate::core::routing::AccessMode;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// Terminal. Holds the reason every later call fails with.
    Expired(String),
}

/// A binding of {access mode, member address, acquisition term}.
///
/// Never retries. Once expired, the caller routes again and opens a new session.
pub struct Session {
    mode: AccessMode,
    address: String,
    term: Term,
    state: SessionState,
    connector: Arc<dyn Connector>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("address", &self.address)
            .field("term", &self.term)
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    pub fn new(
        mode: AccessMode,
        address: String,
        term: Term,
        connector: Arc<dyn Connector>,
    ) -> Self {
        debug!("Bound {} session to {} at term {}", mode, address, term);
        Self {
            mode,
            address,
            term,
            state: SessionState::Active,
            connector,
        }
    }

    /// The address this session sends every operation to.
    pub fn bound_address(&self) -> &str {
        &self.address
    }

    pub fn access_mode(&self) -> AccessMode {
        self.mode
    }

    /// The term that was current when routing chose the address.
    pub fn acquisition_term(&self) -> Term {
        self.term
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.state, SessionState::Expired(_))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Runs `operation` on the bound member and returns its rows.
    pub async fn run(&mut self, operation: &str) -> Result<Vec<String>, CoredgeError> {
        if let SessionState::Expired(reason) = &self.state {
            return Err(CoredgeError::SessionExpired(reason.clone()));
        }
        if self.mode == AccessMode::Read && classify::is_write(operation) {
            return Err(CoredgeError::ClientException(WRITE_IN_READ_MODE.to_string()));
        }

        let request = Request::Run {
            mode: self.mode,
            operation: operation.to_string(),
        };
        match self.connector.call(&self.address, request).await {
            Ok(Response::Ran { rows, .. }) => Ok(rows),
            Ok(Response::Error(reply)) => match (self.mode, reply.code) {
                (AccessMode::Write, ErrorCode::NotLeader) => Err(self.expire()),
                _ => Err(reply.into()),
            },
            Ok(other) => Err(CoredgeError::Protocol(format!(
                "unexpected reply to run: {other:?}"
            ))),
            Err(e) if e.is_connectivity() => Err(self.expire()),
            Err(e) => Err(e),
        }
    }

    /// Moves to EXPIRED and returns the error describing why.
    fn expire(&mut self) -> CoredgeError {
        let reason = match self.mode {
            AccessMode::Write => format!("Server at {} no longer accepts writes", self.address),
            AccessMode::Read => format!("Server at {} is no longer available", self.address),
        };
        info!("Session expired: {}", reason);
        SESSIONS_EXPIRED_TOTAL.inc();
        self.state = SessionState::Expired(reason.clone());
        CoredgeError::SessionExpired(reason)
    }
}
