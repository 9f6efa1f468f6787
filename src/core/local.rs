// src/core/local.rs

//! An in-process cluster over `LocalNetwork` and `LocalConnector`.
//!
//! Every member runs its real raft worker, discovery loop and request handler;
//! only the network and the client transport are simulated.

use crate::config::Config;
use crate::core::bus::{self, LocalNetwork};
use crate::core::client::{Connector, LocalConnector};
use crate::core::consensus::{AppliedLog, MemberId, Role};
use crate::core::errors::CoredgeError;
use crate::core::handler::RequestHandler;
use crate::core::membership::{ClusterMember, ClusterView, MemberKind};
use crate::core::session::Driver;
use crate::core::state::MemberState;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct LocalMember {
    pub state: Arc<MemberState>,
    pub handler: RequestHandler,
    pub applier: Arc<AppliedLog>,
    shutdown_tx: broadcast::Sender<()>,
    alive: AtomicBool,
}

impl LocalMember {
    pub fn id(&self) -> &MemberId {
        &self.state.me.id
    }

    pub fn address(&self) -> &str {
        &self.state.me.client_addr
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

pub struct LocalCluster {
    network: Arc<LocalNetwork>,
    connector: Arc<LocalConnector>,
    /// Core members first, then edge members.
    members: Vec<LocalMember>,
    cores: usize,
    tasks: JoinSet<()>,
}

fn local_member(kind: MemberKind, i: usize) -> ClusterMember {
    let name = match kind {
        MemberKind::Core => format!("core-{i}"),
        MemberKind::Edge => format!("edge-{i}"),
    };
    ClusterMember {
        id: MemberId::new(name.clone()),
        client_addr: format!("{name}:7687"),
        bus_addr: format!("{name}:17687"),
        kind,
    }
}

impl LocalCluster {
    /// Starts `cores` core members and `edges` edge members with the timing of `config`.
    pub fn start(cores: usize, edges: usize, config: &Config) -> Self {
        let network = LocalNetwork::new();
        let connector = LocalConnector::new();
        let mut tasks = JoinSet::new();

        let all: Vec<ClusterMember> = (0..cores)
            .map(|i| local_member(MemberKind::Core, i))
            .chain((0..edges).map(|i| local_member(MemberKind::Edge, i)))
            .collect();

        let mut members = Vec::with_capacity(all.len());
        for me in &all {
            let view = Arc::new(ClusterView::new(
                me.clone(),
                all.iter().cloned(),
                config.discovery.member_timeout,
            ));
            let applier = Arc::new(AppliedLog::new());
            let init =
                MemberState::initialize(config, me.clone(), view, network.clone(), applier.clone());

            let (shutdown_tx, _) = broadcast::channel(1);
            let inbox = network.register(&me.id);
            tasks.spawn(bus::dispatch(inbox, init.inbound, shutdown_tx.subscribe()));
            tasks.spawn(init.discovery.run(shutdown_tx.subscribe()));
            if let Some(worker) = init.raft_worker {
                tasks.spawn(worker.run(shutdown_tx.subscribe()));
            }

            let handler = RequestHandler::new(init.state.clone());
            connector.register(me.client_addr.clone(), handler.clone());
            members.push(LocalMember {
                state: init.state,
                handler,
                applier,
                shutdown_tx,
                alive: AtomicBool::new(true),
            });
        }

        info!("Local cluster started with {} core and {} edge members.", cores, edges);
        Self {
            network,
            connector,
            members,
            cores,
            tasks,
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }

    /// Connects a driver through the member at `address`.
    pub async fn driver(&self, address: &str) -> Result<Driver, CoredgeError> {
        Driver::connect(address, self.connector()).await
    }

    pub fn members(&self) -> &[LocalMember] {
        &self.members
    }

    pub fn core(&self, i: usize) -> Option<&LocalMember> {
        self.members[..self.cores].get(i)
    }

    pub fn edge(&self, i: usize) -> Option<&LocalMember> {
        self.members[self.cores..].get(i)
    }

    pub fn member_by_address(&self, address: &str) -> Option<&LocalMember> {
        self.members.iter().find(|m| m.address() == address)
    }

    fn live_cores(&self) -> impl Iterator<Item = &LocalMember> {
        self.members[..self.cores].iter().filter(|m| m.is_alive())
    }

    /// A live core member currently in `role`. For `Leader`, the one with the
    /// highest term wins, since a deposed leader may not have noticed yet.
    pub fn member_with_role(&self, role: Role) -> Option<&LocalMember> {
        self.live_cores()
            .filter(|m| m.role() == role)
            .max_by_key(|m| m.state.term())
    }

    /// Waits until a live core member leads at the highest live term.
    pub async fn await_leader(&self, timeout: Duration) -> Option<&LocalMember> {
        let deadline = Instant::now() + timeout;
        loop {
            let top_term = self.live_cores().map(|m| m.state.term()).max();
            let leader = self
                .live_cores()
                .find(|m| m.role() == Role::Leader && Some(m.state.term()) == top_term);
            if leader.is_some() {
                return leader;
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Starts an election on some live follower. Returns its address.
    pub async fn trigger_election(&self) -> Option<String> {
        for member in self.live_cores() {
            let Some(raft) = member.state.raft.as_ref() else {
                continue;
            };
            if raft.current_role() != Role::Leader && raft.trigger_election().await {
                return Some(member.address().to_string());
            }
        }
        None
    }

    /// Cuts the bus links of the member at `address`. Client traffic still reaches it.
    pub fn isolate(&self, address: &str) -> bool {
        match self.member_by_address(address) {
            Some(member) => {
                self.network.isolate(member.id());
                true
            }
            None => false,
        }
    }

    pub fn heal(&self, address: &str) -> bool {
        match self.member_by_address(address) {
            Some(member) => {
                self.network.heal(member.id());
                true
            }
            None => false,
        }
    }

    /// Stops the member at `address` as if its process exited.
    pub fn shutdown_member(&self, address: &str) -> bool {
        let Some(member) = self.member_by_address(address) else {
            return false;
        };
        if !member.alive.swap(false, Ordering::AcqRel) {
            return false;
        }
        info!("Shutting down local member {}.", address);
        self.connector.shutdown(address);
        self.network.unregister(member.id());
        let _ = member.shutdown_tx.send(());
        true
    }

    /// Stops every member and waits for their tasks.
    pub async fn shutdown(mut self) {
        for member in &self.members {
            member.alive.store(false, Ordering::Release);
            let _ = member.shutdown_tx.send(());
        }
        while self.tasks.join_next().await.is_some() {}
    }
}
