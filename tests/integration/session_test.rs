// tests/integration/session_test.rs

//! Session binding and invalidation through the client driver.

use super::test_helpers::{LEADER_WAIT, eventually, fast_config, move_leadership, start_with_leader};
use coredge::core::consensus::Role;
use coredge::core::errors::{CoredgeError, WRITE_IN_READ_MODE};
use coredge::core::routing::AccessMode;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_session_expires_after_leadership_moves() {
    let cluster = start_with_leader(3, 0).await;
    let leader_addr = cluster
        .await_leader(LEADER_WAIT)
        .await
        .unwrap()
        .address()
        .to_string();

    let driver = cluster.driver(&leader_addr).await.unwrap();
    let mut session = driver.session(AccessMode::Write).await.unwrap();
    assert_eq!(session.bound_address(), leader_addr);
    assert_eq!(session.access_mode(), AccessMode::Write);

    session
        .run("CREATE CONSTRAINT ON (p:Person) ASSERT p.name IS UNIQUE")
        .await
        .unwrap();

    let (old, _new) = move_leadership(&cluster).await;
    assert_eq!(old, leader_addr);
    assert_ne!(
        cluster.member_by_address(&old).unwrap().role(),
        Role::Leader
    );

    let err = session.run("CREATE (:Person {name: 'x'})").await.unwrap_err();
    assert_eq!(
        err,
        CoredgeError::SessionExpired(format!("Server at {old} no longer accepts writes"))
    );
    assert!(session.is_expired());

    // A fresh session routes to the new leader and succeeds.
    let mut fresh = driver.session(AccessMode::Write).await.unwrap();
    assert_ne!(fresh.bound_address(), old);
    fresh.run("CREATE (:Person {name: 'y'})").await.unwrap();
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_driver_against_edge_member_fails_discovery() {
    let cluster = start_with_leader(1, 1).await;
    let edge = cluster.edge(0).unwrap().address().to_string();

    let err = cluster.driver(&edge).await.err().unwrap();
    assert_eq!(
        err,
        CoredgeError::ServiceUnavailable("Server edge-0:7687 couldn't perform discovery".into())
    );
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_driver_against_missing_member_fails_discovery() {
    let cluster = start_with_leader(1, 0).await;
    let err = cluster.driver("nowhere:7687").await.err().unwrap();
    assert_eq!(
        err.to_string(),
        "Server nowhere:7687 couldn't perform discovery"
    );
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_session_expires_when_its_member_shuts_down() {
    let cluster = start_with_leader(3, 0).await;
    let driver = cluster.driver("core-0:7687").await.unwrap();
    let mut session = driver.session(AccessMode::Read).await.unwrap();
    let bound = session.bound_address().to_string();

    let rows = session.run("MATCH (n) RETURN count(n)").await.unwrap();
    assert_eq!(rows.len(), 1);

    assert!(cluster.shutdown_member(&bound));
    let err = session.run("MATCH (n) RETURN count(n)").await.unwrap_err();
    assert_eq!(
        err,
        CoredgeError::SessionExpired(format!("Server at {bound} is no longer available"))
    );
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_session_refuses_writes_and_stays_usable() {
    let cluster = start_with_leader(1, 0).await;
    let driver = cluster.driver("core-0:7687").await.unwrap();
    let mut session = driver.session(AccessMode::Read).await.unwrap();

    let err = session.run("CREATE (n)").await.unwrap_err();
    assert_eq!(err, CoredgeError::ClientException(WRITE_IN_READ_MODE.into()));
    assert!(!session.is_expired());
    assert!(session.run("RETURN 1").await.is_ok());
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_committed_writes_are_visible_to_reads() {
    let cluster = start_with_leader(1, 0).await;
    let driver = cluster.driver("core-0:7687").await.unwrap();

    let mut writer = driver.session(AccessMode::Write).await.unwrap();
    writer.run("CREATE (:A)").await.unwrap();
    writer.run("CREATE (:B)").await.unwrap();

    let mut reader = driver.session(AccessMode::Read).await.unwrap();
    assert_eq!(reader.run("MATCH (n) RETURN count(n)").await.unwrap(), vec!["2"]);
    assert_eq!(
        cluster.core(0).unwrap().applier.applied(),
        vec![(2, "CREATE (:A)".to_string()), (3, "CREATE (:B)".to_string())]
    );
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_session_fails_over_to_a_learned_router() {
    let cluster = start_with_leader(3, 0).await;
    let leader_addr = cluster
        .await_leader(LEADER_WAIT)
        .await
        .unwrap()
        .address()
        .to_string();
    let initial = cluster
        .members()
        .iter()
        .map(|m| m.address().to_string())
        .find(|a| *a != leader_addr)
        .unwrap();

    // Wait for gossip so the initial router advertises all three cores.
    let member = cluster.member_by_address(&initial).unwrap();
    assert!(
        eventually(Duration::from_secs(3), || {
            member.state.routing.routing_table().unwrap().routers.len() == 3
        })
        .await
    );
    let driver = cluster.driver(&initial).await.unwrap();
    assert_eq!(driver.routers()[0], initial);
    assert_eq!(driver.routers().len(), 3);

    assert!(cluster.shutdown_member(&initial));
    let mut session = driver.session(AccessMode::Write).await.unwrap();
    assert_eq!(session.bound_address(), leader_addr);
    session.run("CREATE (:AfterFailover)").await.unwrap();
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_driver_refreshes_its_table_when_the_term_moves() {
    let cluster = start_with_leader(3, 0).await;
    let driver = cluster.driver("core-0:7687").await.unwrap();
    let before = driver.routing_table().term;

    let (_old, new) = move_leadership(&cluster).await;
    let session = driver.session(AccessMode::Write).await.unwrap();
    assert_eq!(session.bound_address(), new);

    let table = driver.routing_table();
    assert!(table.term > before, "table stayed at term {}", table.term);
    assert_eq!(table.writer.as_deref(), Some(new.as_str()));
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_write_is_a_client_error() {
    let cluster = start_with_leader(1, 0).await;
    let driver = cluster.driver("core-0:7687").await.unwrap();
    let mut session = driver.session(AccessMode::Write).await.unwrap();

    let blob = "x".repeat(70_000);
    let operation = format!("CREATE (:Blob {{data: '{blob}'}})");
    let limit = fast_config().raft.machine().max_command_bytes();

    let err = session.run(&operation).await.unwrap_err();
    let expected = CoredgeError::CommandTooLarge {
        size: operation.len(),
        limit,
    };
    assert_eq!(err, CoredgeError::ClientException(expected.to_string()));
    assert!(!session.is_expired());
    assert!(cluster.core(0).unwrap().applier.applied().is_empty());

    session.run("CREATE (:Small)").await.unwrap();
    cluster.shutdown().await;
}
