// src/core/session/driver.rs

//! The client-side entry point: discovery, routing and session creation.

use super::binding::Session;
use crate::core::client::Connector;
use crate::core::errors::CoredgeError;
use crate::core::protocol::{ErrorCode, Request, Response};
use crate::core::routing::{AccessMode, RoutingTable};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Driver {
    initial: String,
    connector: Arc<dyn Connector>,
    table: RwLock<RoutingTable>,
}

impl Driver {
    /// Performs discovery against `routing_addr`. Edge members and unreachable
    /// addresses both fail with `ServiceUnavailable`.
    pub async fn connect(
        routing_addr: &str,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, CoredgeError> {
        let table = discover(connector.as_ref(), routing_addr).await?;
        Ok(Self {
            initial: routing_addr.to_string(),
            connector,
            table: RwLock::new(table),
        })
    }

    pub fn routing_table(&self) -> RoutingTable {
        self.table.read().clone()
    }

    /// The initial address first, then the routers learned from discovery.
    pub fn routers(&self) -> Vec<String> {
        let mut routers = vec![self.initial.clone()];
        for router in &self.table.read().routers {
            if !routers.contains(router) {
                routers.push(router.clone());
            }
        }
        routers
    }

    /// Re-runs discovery against the first router that answers.
    pub async fn refresh(&self) -> Result<RoutingTable, CoredgeError> {
        for router in self.routers() {
            match discover(self.connector.as_ref(), &router).await {
                Ok(table) => {
                    let mut current = self.table.write();
                    if table.term >= current.term {
                        *current = table.clone();
                    }
                    return Ok(table);
                }
                Err(e) => debug!("Discovery via {} failed: {}", router, e),
            }
        }
        Err(CoredgeError::discovery_failed(&self.initial))
    }

    /// Routes a new session in `mode` and binds it. A route from a newer term
    /// than the cached table triggers a [`Driver::refresh`] first.
    pub async fn session(&self, mode: AccessMode) -> Result<Session, CoredgeError> {
        for router in self.routers() {
            let reply = self.connector.call(&router, Request::Route { mode }).await;
            match reply {
                Ok(Response::Routed { address, term }) => {
                    let stale = term > self.table.read().term;
                    if stale && let Err(e) = self.refresh().await {
                        debug!("Routing table refresh at term {} failed: {}", term, e);
                    }
                    return Ok(Session::new(mode, address, term, self.connector.clone()));
                }
                // This router cannot route; try the next one.
                Ok(Response::Error(reply)) if reply.code == ErrorCode::ServiceUnavailable => {
                    debug!("Router {} cannot route: {}", router, reply.message);
                }
                Ok(Response::Error(reply)) => return Err(reply.into()),
                Ok(other) => {
                    return Err(CoredgeError::Protocol(format!(
                        "unexpected reply to route: {other:?}"
                    )));
                }
                Err(e) => warn!("Router {} unreachable: {}", router, e),
            }
        }
        Err(CoredgeError::discovery_failed(&self.initial))
    }
}

async fn discover(connector: &dyn Connector, address: &str) -> Result<RoutingTable, CoredgeError> {
    match connector.call(address, Request::Discover).await {
        Ok(Response::Table(table)) => Ok(table),
        Ok(Response::Error(reply)) => Err(reply.into()),
        Ok(other) => Err(CoredgeError::Protocol(format!(
            "unexpected reply to discover: {other:?}"
        ))),
        Err(_) => Err(CoredgeError::discovery_failed(address)),
    }
}
