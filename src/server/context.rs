// src/server/context.rs

use crate::config::Config;
use crate::core::bus::{Inbound, UdpBus};
use crate::core::consensus::RaftWorker;
use crate::core::membership::Discovery;
use crate::core::state::MemberState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub config: Config,
    pub state: Arc<MemberState>,
    /// Taken by the spawner. `None` on edge members.
    pub raft_worker: Option<RaftWorker>,
    pub discovery: Arc<Discovery>,
    pub inbound: Inbound,
    pub bus: Arc<UdpBus>,
    pub listener: TcpListener,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    pub connection_permits: Arc<Semaphore>,
}
