// src/server/initialization.rs

//! Builds the member's state, its cluster bus and its client listener.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::bus::UdpBus;
use crate::core::consensus::AppliedLog;
use crate::core::membership::{ClusterView, MemberKind};
use crate::core::state::MemberState;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let me = config.myself();
    let seeds = config.cluster.members.iter().map(|seed| seed.to_member());
    let view = Arc::new(ClusterView::new(
        me.clone(),
        seeds,
        config.discovery.member_timeout,
    ));

    let bus_bind = format!("{}:{}", config.host, config.bus_port);
    let bus = UdpBus::bind(&bus_bind, view.clone(), config.password.clone())
        .await
        .with_context(|| format!("Failed to bind the cluster bus on {bus_bind}"))?;

    let init = MemberState::initialize(
        &config,
        me,
        view,
        bus.clone(),
        Arc::new(AppliedLog::new()),
    );
    info!("Member state initialized.");

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("coredge member listening on {}:{}", config.host, config.port);
    let connection_permits = Arc::new(Semaphore::new(config.max_clients));

    Ok(ServerContext {
        config,
        state: init.state,
        raft_worker: init.raft_worker,
        discovery: init.discovery,
        inbound: init.inbound,
        bus,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        connection_permits,
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Starting {} member {} (client {}, bus {}).",
        config.kind,
        config.member_id,
        config.client_addr(),
        config.bus_addr()
    );
    let cores = config
        .cluster
        .members
        .iter()
        .filter(|m| m.kind == MemberKind::Core)
        .count()
        + usize::from(config.kind == MemberKind::Core);
    info!(
        "Raft timing: election {:?}..{:?}, heartbeat {:?}, lease {} rounds.",
        config.raft.election_timeout_min,
        config.raft.election_timeout_max,
        config.raft.heartbeat_interval,
        config.raft.lease_rounds
    );
    if config.password.is_none() {
        warn!("No cluster password set. Bus messages are not authenticated.");
    }
    if cores == 1 {
        warn!("Only one core member is configured. The cluster cannot survive its loss.");
    }
}
