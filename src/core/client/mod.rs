// src/core/client/mod.rs

//! Ways for a driver to reach a member: over TCP or in-process.

use crate::core::errors::CoredgeError;
use crate::core::protocol::{Request, Response};
use async_trait::async_trait;

pub mod local;
pub mod tcp;

pub use local::LocalConnector;
pub use tcp::TcpConnector;

/// Sends one request to the member at `address` and returns its reply.
///
/// A member that cannot be contacted yields `CoredgeError::Unreachable`; a member
/// that answers with an error still yields `Ok(Response::Error(..))`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn call(&self, address: &str, request: Request) -> Result<Response, CoredgeError>;
}
