// tests/integration/election_test.rs

//! Leader election, lease step-down and log agreement on an in-process core.

use super::test_helpers::{LEADER_WAIT, eventually, move_leadership, start_with_leader};
use coredge::core::consensus::Role;
use coredge::core::errors::CoredgeError;
use coredge::core::routing::AccessMode;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_three_cores_elect_exactly_one_leader() {
    let cluster = start_with_leader(3, 0).await;
    let leader = cluster.await_leader(LEADER_WAIT).await.unwrap();
    let term = leader.state.term();

    let leaders_at_term = cluster
        .members()
        .iter()
        .filter(|m| m.role() == Role::Leader && m.state.term() == term)
        .count();
    assert_eq!(leaders_at_term, 1);

    // Every core eventually names the same leader.
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
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_isolated_leader_steps_down_and_core_recovers() {
    let cluster = start_with_leader(3, 0).await;
    let old = cluster.await_leader(LEADER_WAIT).await.unwrap();
    let old_addr = old.address().to_string();
    let old_term = old.state.term();

    cluster.isolate(&old_addr);

    // Lease of 4 heartbeat rounds at 30ms; allow generous scheduling slack.
    let old_member = cluster.member_by_address(&old_addr).unwrap();
    assert!(
        eventually(Duration::from_secs(2), || old_member.role() != Role::Leader).await,
        "isolated leader kept leading"
    );

    let new = cluster.await_leader(LEADER_WAIT).await.unwrap();
    assert_ne!(new.address(), old_addr);
    assert!(new.state.term() > old_term);

    // The healed member may force one more election with its inflated term, but
    // its log is behind, so it can only come back as a follower.
    cluster.heal(&old_addr);
    let old_id = old_member.id().clone();
    assert!(
        eventually(Duration::from_secs(3), || {
            let status = old_member.state.status();
            status.role == Role::Follower
                && status.leader.as_ref().is_some_and(|leader| *leader != old_id)
        })
        .await,
        "healed member did not rejoin as a follower"
    );
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pending_write_fails_when_the_leader_loses_its_majority() {
    let cluster = start_with_leader(3, 0).await;
    let leader = cluster.await_leader(LEADER_WAIT).await.unwrap();
    let address = leader.address().to_string();
    let raft = leader.state.raft.clone().unwrap();

    cluster.isolate(&address);
    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        raft.submit(b"CREATE (:Lost)".to_vec()),
    )
    .await;
    assert_eq!(
        outcome,
        Ok(Err(CoredgeError::NotLeader {
            address: address.clone()
        }))
    );

    // The entry never reached a majority, so no member ever applies it.
    cluster.heal(&address);
    assert!(
        eventually(Duration::from_secs(3), || {
            let leaders: Vec<_> = cluster
                .members()
                .iter()
                .map(|m| m.state.status().leader)
                .collect();
            leaders[0].is_some() && leaders.iter().all(|l| *l == leaders[0])
        })
        .await,
        "the core did not settle on one leader after healing"
    );
    for member in cluster.members() {
        assert!(
            member
                .applier
                .applied()
                .iter()
                .all(|(_, op)| op != "CREATE (:Lost)"),
            "{} applied a write that never committed",
            member.address()
        );
    }
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_committed_prefixes_agree_across_leader_changes() {
    let cluster = start_with_leader(3, 0).await;
    let driver = cluster.driver("core-0:7687").await.unwrap();

    let mut written = 0;
    for round in 0..2 {
        let mut session = driver.session(AccessMode::Write).await.unwrap();
        for i in 0..3 {
            session
                .run(&format!("CREATE (:Round{round} {{i: {i}}})"))
                .await
                .unwrap();
            written += 1;
        }
        move_leadership(&cluster).await;
    }

    assert!(
        eventually(Duration::from_secs(3), || {
            cluster.members().iter().all(|m| m.applier.len() == written)
        })
        .await,
        "not every core applied all {written} writes"
    );

    let logs: Vec<_> = cluster.members().iter().map(|m| m.applier.applied()).collect();
    for log in &logs[1..] {
        assert_eq!(log, &logs[0]);
    }
    cluster.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_trigger_election_is_refused_by_the_leader() {
    let cluster = start_with_leader(1, 0).await;
    let leader = cluster.core(0).unwrap();
    assert_eq!(leader.role(), Role::Leader);

    let raft = leader.state.raft.as_ref().unwrap();
    assert!(!raft.trigger_election().await);
    assert!(cluster.trigger_election().await.is_none());
    cluster.shutdown().await;
}
