// tests/integration/routing_test.rs

//! Routing requests against core and edge members.

use super::test_helpers::{LEADER_WAIT, eventually, fast_config, init_tracing, start_with_leader};
use coredge::core::client::Connector;
use coredge::core::errors::CoredgeError;
use coredge::core::local::LocalCluster;
use coredge::core::protocol::{ErrorCode, Request, Response};
use coredge::core::routing::AccessMode;
use std::collections::HashSet;
use std::time::Duration;

async fn route(cluster: &LocalCluster, address: &str, mode: AccessMode) -> Response {
    cluster
        .connector()
        .call(address, Request::Route { mode })
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_routes_to_the_leader_from_any_core() {
    let cluster = start_with_leader(3, 0).await;
    let leader = cluster.await_leader(LEADER_WAIT).await.unwrap();
    let leader_addr = leader.address().to_string();

    // Followers learn the leader from its first heartbeat.
    let leader_id = leader.id().clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            cluster
                .members()
                .iter()
                .all(|m| m.state.status().leader.as_ref() == Some(&leader_id))
        })
        .await
    );

    for i in 0..3 {
        let core = cluster.core(i).unwrap().address().to_string();
        match route(&cluster, &core, AccessMode::Write).await {
            Response::Routed { address, .. } => assert_eq!(address, leader_addr),
            other => panic!("expected a routed reply from {core}, got {other:?}"),
        }
    }
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_edge_member_cannot_route() {
    let cluster = start_with_leader(1, 1).await;
    let edge = cluster.edge(0).unwrap().address().to_string();

    for request in [
        Request::Route {
            mode: AccessMode::Write,
        },
        Request::Route {
            mode: AccessMode::Read,
        },
        Request::Discover,
    ] {
        let reply = cluster.connector().call(&edge, request).await.unwrap();
        let Response::Error(reply) = reply else {
            panic!("edge member answered a routing request: {reply:?}");
        };
        assert_eq!(reply.code, ErrorCode::ServiceUnavailable);
        assert_eq!(reply.message, "Server edge-0:7687 couldn't perform discovery");
    }
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_routing_without_a_leader_times_out() {
    init_tracing();
    let mut config = fast_config();
    config.routing.routing_timeout = Duration::from_millis(400);
    let cluster = LocalCluster::start(3, 0, &config);
    // Partition every core before the first election timeout can fire.
    for i in 0..3 {
        let address = cluster.core(i).unwrap().address().to_string();
        cluster.isolate(&address);
    }

    let started = tokio::time::Instant::now();
    let reply = route(&cluster, "core-0:7687", AccessMode::Write).await;
    let Response::Error(reply) = reply else {
        panic!("routed a write without a leader: {reply:?}");
    };
    assert!(started.elapsed() >= Duration::from_millis(400));
    let err: CoredgeError = reply.into();
    assert_eq!(err, CoredgeError::NoLeaderAvailable { waited_ms: 400 });
    assert_eq!(err.to_string(), "No leader available after waiting 400ms");
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_routing_table_lists_writer_readers_and_routers() {
    let cluster = start_with_leader(3, 1).await;
    let leader_addr = cluster
        .await_leader(LEADER_WAIT)
        .await
        .unwrap()
        .address()
        .to_string();

    // Gossip has to refresh the bootstrap entries before they count as reachable.
    let mut table = None;
    let found = eventually(Duration::from_secs(3), || {
        let current = cluster
            .member_by_address(&leader_addr)
            .unwrap()
            .state
            .routing
            .routing_table()
            .unwrap();
        let complete = current.readers.len() == 4 && current.routers.len() == 3;
        table = Some(current);
        complete
    })
    .await;
    let table = table.unwrap();
    assert!(found, "table never became complete: {table:?}");

    assert_eq!(table.writer.as_deref(), Some(leader_addr.as_str()));
    assert!(table.readers.contains(&"edge-0:7687".to_string()));
    assert!(!table.routers.contains(&"edge-0:7687".to_string()));
    assert!(table.is_writable() && table.is_readable());
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_routing_spreads_over_reachable_members() {
    let cluster = start_with_leader(3, 1).await;
    let routing = &cluster.core(0).unwrap().state.routing;
    assert!(
        eventually(Duration::from_secs(3), || {
            cluster.core(0).unwrap().state.view.reachable().len() == 4
        })
        .await
    );

    let mut seen = HashSet::new();
    for _ in 0..8 {
        seen.insert(routing.route(AccessMode::Read).await.unwrap());
    }
    assert_eq!(seen.len(), 4, "round-robin skipped members: {seen:?}");
    cluster.shutdown().await;
}
