// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use coredge::config::Config;
use coredge::core::local::LocalCluster;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// How long any test waits for an election to settle.
pub const LEADER_WAIT: Duration = Duration::from_secs(5);

/// A config with timings short enough for tests but in the same ratios as production.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.raft.election_timeout_min = Duration::from_millis(150);
    config.raft.election_timeout_max = Duration::from_millis(300);
    config.raft.heartbeat_interval = Duration::from_millis(30);
    config.raft.lease_rounds = 4;
    config.routing.routing_timeout = Duration::from_secs(3);
    config.discovery.gossip_interval = Duration::from_millis(50);
    config.discovery.member_timeout = Duration::from_secs(1);
    config
}

pub fn init_tracing() {
    // Ignore the error if another test already installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Starts a cluster and waits for its first leader.
pub async fn start_with_leader(cores: usize, edges: usize) -> LocalCluster {
    init_tracing();
    let cluster = LocalCluster::start(cores, edges, &fast_config());
    assert!(
        cluster.await_leader(LEADER_WAIT).await.is_some(),
        "no leader elected within {LEADER_WAIT:?}"
    );
    cluster
}

/// Polls `check` every 20ms until it holds or `timeout` passes.
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Forces leadership away from the current leader. Returns (old, new) leader addresses.
pub async fn move_leadership(cluster: &LocalCluster) -> (String, String) {
    let old = cluster
        .await_leader(LEADER_WAIT)
        .await
        .expect("a leader before moving leadership")
        .address()
        .to_string();

    let deadline = tokio::time::Instant::now() + LEADER_WAIT * 2;
    while tokio::time::Instant::now() < deadline {
        cluster.trigger_election().await;
        if let Some(leader) = cluster.await_leader(Duration::from_secs(1)).await
            && leader.address() != old
        {
            // Wait until every live member routes to the new leader.
            let id = leader.id().clone();
            let settled = eventually(LEADER_WAIT, || {
                cluster
                    .members()
                    .iter()
                    .filter(|m| m.is_alive() && m.state.raft.is_some())
                    .all(|m| m.state.status().leader.as_ref() == Some(&id))
            })
            .await;
            if settled {
                return (old, leader.address().to_string());
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("leadership never moved away from {old}");
}
