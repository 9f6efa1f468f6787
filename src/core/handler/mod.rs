// src/core/handler/mod.rs

//! Executes one client `Request` against a member.

use crate::core::errors::{CoredgeError, WRITE_IN_READ_MODE};
use crate::core::protocol::{Request, Response};
use crate::core::routing::AccessMode;
use crate::core::session::classify;
use crate::core::state::MemberState;
use crate::core::consensus::Role;
use std::sync::Arc;
use tracing::debug;

/// The entry point every transport (TCP connection, in-process connector) calls.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    state: Arc<MemberState>,
}

impl RequestHandler {
    pub fn new(state: Arc<MemberState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<MemberState> {
        &self.state
    }

    /// Handles a request. Failures become `Response::Error`.
    pub async fn handle(&self, request: Request) -> Response {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Request on {} failed: {}", self.state.me.client_addr, e);
                Response::error(&e)
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response, CoredgeError> {
        match request {
            Request::Discover => Ok(Response::Table(self.state.routing.routing_table()?)),
            Request::Route { mode } => {
                let address = self.state.routing.route(mode).await?;
                Ok(Response::Routed {
                    address,
                    term: self.state.term(),
                })
            }
            Request::Run { mode, operation } => self.run(mode, operation).await,
            Request::Status => Ok(Response::Status(self.state.status())),
        }
    }

    async fn run(&self, mode: AccessMode, operation: String) -> Result<Response, CoredgeError> {
        let is_write = classify::is_write(&operation);
        if mode == AccessMode::Read && is_write {
            return Err(CoredgeError::ClientException(WRITE_IN_READ_MODE.to_string()));
        }

        if mode == AccessMode::Write || is_write {
            let raft = self.state.raft.as_ref().ok_or_else(|| self.state.not_leader())?;
            if raft.current_role() != Role::Leader {
                return Err(self.state.not_leader());
            }
            if is_write {
                raft.submit(operation.into_bytes()).await?;
                return Ok(Response::Ran {
                    rows: Vec::new(),
                    term: raft.current_term(),
                });
            }
        }

        Ok(Response::Ran {
            rows: self.state.applier.read(&operation),
            term: self.state.term(),
        })
    }
}
