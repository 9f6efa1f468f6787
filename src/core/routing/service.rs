// src/core/routing/service.rs

//! Answers "where should this client go" from the raft engine's state.

use super::table::{AccessMode, RoutingTable};
use crate::core::consensus::{MemberId, RaftNode};
use crate::core::errors::CoredgeError;
use crate::core::membership::{ClusterMember, ClusterView, MemberKind};
use crate::core::metrics::ROUTING_REQUESTS_TOTAL;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

pub struct RoutingService {
    me: ClusterMember,
    view: Arc<ClusterView>,
    /// `None` on edge members, which cannot route.
    raft: Option<Arc<RaftNode>>,
    routing_timeout: Duration,
    cursor: AtomicUsize,
    version: AtomicU64,
}

impl RoutingService {
    pub fn new(
        me: ClusterMember,
        view: Arc<ClusterView>,
        raft: Option<Arc<RaftNode>>,
        routing_timeout: Duration,
    ) -> Self {
        Self {
            me,
            view,
            raft,
            routing_timeout,
            cursor: AtomicUsize::new(0),
            version: AtomicU64::new(0),
        }
    }

    fn raft(&self) -> Result<&Arc<RaftNode>, CoredgeError> {
        match (&self.me.kind, &self.raft) {
            (MemberKind::Core, Some(raft)) => Ok(raft),
            _ => Err(CoredgeError::discovery_failed(&self.me.client_addr)),
        }
    }

    fn client_addr_of(&self, id: &MemberId) -> Option<String> {
        if *id == self.me.id {
            return Some(self.me.client_addr.clone());
        }
        self.view.address_of(id)
    }

    /// Picks an address for a session in `mode`.
    pub async fn route(&self, mode: AccessMode) -> Result<String, CoredgeError> {
        let outcome = self.route_inner(mode).await;
        let label = match &outcome {
            Ok(_) => "ok",
            Err(CoredgeError::NoLeaderAvailable { .. }) => "no_leader",
            Err(CoredgeError::ServiceUnavailable(_)) => "unavailable",
            Err(_) => "error",
        };
        ROUTING_REQUESTS_TOTAL
            .with_label_values(&[mode.as_str(), label])
            .inc();
        outcome
    }

    async fn route_inner(&self, mode: AccessMode) -> Result<String, CoredgeError> {
        let raft = self.raft()?;
        match mode {
            AccessMode::Write => {
                let no_leader = || CoredgeError::NoLeaderAvailable {
                    waited_ms: self.routing_timeout.as_millis() as u64,
                };
                let leader = raft
                    .await_leader(self.routing_timeout)
                    .await
                    .ok_or_else(no_leader)?;
                match self.client_addr_of(&leader) {
                    Some(addr) => {
                        debug!("Routing WRITE to leader {} at {}", leader, addr);
                        Ok(addr)
                    }
                    None => {
                        warn!("Leader {} is not in the view; cannot route writes.", leader);
                        Err(no_leader())
                    }
                }
            }
            AccessMode::Read => {
                let readers = self.view.reachable();
                if readers.is_empty() {
                    return Ok(self.me.client_addr.clone());
                }
                let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % readers.len();
                Ok(readers[slot].client_addr.clone())
            }
        }
    }

    /// The full table as currently known. `writer` is empty when no leader is known
    /// right now; this call never waits.
    pub fn routing_table(&self) -> Result<RoutingTable, CoredgeError> {
        let raft = self.raft()?;
        let status = raft.status();
        let writer = status
            .leader
            .as_ref()
            .and_then(|leader| self.client_addr_of(leader));

        let reachable = self.view.reachable();
        let readers = reachable.iter().map(|m| m.client_addr.clone()).collect();
        let routers = reachable
            .iter()
            .filter(|m| m.is_core())
            .map(|m| m.client_addr.clone())
            .collect();

        Ok(RoutingTable {
            writer,
            readers,
            routers,
            term: status.term,
            version: self.version.fetch_add(1, Ordering::Relaxed) + 1,
        })
    }
}
