// src/core/state/core.rs

//! Defines `MemberState`, the shared state of one cluster member.

use super::client::ClientMap;
use crate::config::Config;
use crate::core::admin::RoleRegistry;
use crate::core::bus::{ClusterBus, Inbound};
use crate::core::consensus::{CommandApplier, RaftNode, RaftTransport, RaftWorker, Role, Term};
use crate::core::errors::CoredgeError;
use crate::core::membership::{ClusterMember, ClusterView, Discovery};
use crate::core::protocol::MemberStatus;
use crate::core::routing::RoutingService;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tokio::sync::mpsc;

const RAFT_INBOX_CAPACITY: usize = 1024;

/// Everything produced while wiring a member that still has to be spawned.
pub struct MemberInit {
    pub state: Arc<MemberState>,
    /// The raft event loop, present on core members.
    pub raft_worker: Option<RaftWorker>,
    pub discovery: Arc<Discovery>,
    /// Routes inbound bus traffic to the raft inbox and discovery.
    pub inbound: Inbound,
}

/// The shared state of a member. Wrapped in an `Arc` and handed to every
/// connection and background task.
pub struct MemberState {
    pub me: ClusterMember,
    pub view: Arc<ClusterView>,
    /// `None` on edge members.
    pub raft: Option<Arc<RaftNode>>,
    pub routing: RoutingService,
    pub applier: Arc<dyn CommandApplier>,
    pub roles: RoleRegistry,
    pub clients: ClientMap,
    pub next_session_id: AtomicU64,
    pub max_clients: usize,
}

impl std::fmt::Debug for MemberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberState")
            .field("me", &self.me)
            .field("role", &self.role())
            .field("term", &self.term())
            .finish()
    }
}

impl MemberState {
    /// Wires a member over `bus`. `view` must already hold the bootstrap members,
    /// since the core membership fixes the raft voters.
    pub fn initialize<B>(
        config: &Config,
        me: ClusterMember,
        view: Arc<ClusterView>,
        bus: Arc<B>,
        applier: Arc<dyn CommandApplier>,
    ) -> MemberInit
    where
        B: ClusterBus + RaftTransport + 'static,
    {
        let (raft, raft_worker, raft_tx) = if me.is_core() {
            let (raft_tx, raft_rx) = mpsc::channel(RAFT_INBOX_CAPACITY);
            let voters = view.voters().into_iter().map(|m| m.id);
            let transport: Arc<dyn RaftTransport> = bus.clone();
            let (node, worker) = RaftNode::new(
                me.id.clone(),
                me.client_addr.clone(),
                voters,
                &config.raft,
                transport,
                applier.clone(),
                raft_rx,
            );
            (Some(node), Some(worker), Some(raft_tx))
        } else {
            (None, None, None)
        };

        let cluster_bus: Arc<dyn ClusterBus> = bus;
        let discovery = Discovery::new(
            view.clone(),
            cluster_bus,
            raft.clone(),
            config.discovery.clone(),
        );
        let inbound = Inbound::new(raft_tx, discovery.clone());
        let routing = RoutingService::new(
            me.clone(),
            view.clone(),
            raft.clone(),
            config.routing.routing_timeout,
        );

        let state = Arc::new(Self {
            me,
            view,
            raft,
            routing,
            applier,
            roles: RoleRegistry::new(),
            clients: Arc::new(DashMap::new()),
            next_session_id: AtomicU64::new(1),
            max_clients: config.max_clients,
        });

        MemberInit {
            state,
            raft_worker,
            discovery,
            inbound,
        }
    }

    pub fn role(&self) -> Role {
        self.raft
            .as_ref()
            .map_or(Role::Follower, |raft| raft.current_role())
    }

    pub fn term(&self) -> Term {
        self.raft.as_ref().map_or(0, |raft| raft.current_term())
    }

    pub fn not_leader(&self) -> CoredgeError {
        CoredgeError::NotLeader {
            address: self.me.client_addr.clone(),
        }
    }

    pub fn status(&self) -> MemberStatus {
        let raft = self.raft.as_ref().map(|r| r.status());
        MemberStatus {
            member: self.me.id.clone(),
            kind: self.me.kind,
            address: self.me.client_addr.clone(),
            role: raft.as_ref().map_or(Role::Follower, |s| s.role),
            term: raft.as_ref().map_or(0, |s| s.term),
            leader: raft
                .as_ref()
                .and_then(|s| s.leader.clone())
                .or_else(|| self.view.leader_hint()),
            commit_index: raft.as_ref().map_or(0, |s| s.commit_index),
            members: self.view.members().len(),
            staleness: self.view.staleness(),
        }
    }
}
