// src/core/metrics.rs

//! Defines and registers Prometheus metrics for consensus and routing.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire process. Per-member gauges are labelled by member id,
//! since an in-process cluster hosts several members in one registry.

use lazy_static::lazy_static;
use prometheus::{
    IntCounter, IntCounterVec, IntGauge, IntGaugeVec, TextEncoder, register_int_counter,
    register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
};

lazy_static! {
    // --- Raft ---
    /// Elections started by any local member (each new candidacy counts once).
    pub static ref ELECTIONS_STARTED_TOTAL: IntCounter =
        register_int_counter!("coredge_elections_started_total", "Total number of elections started.").unwrap();
    /// Times a local member became leader.
    pub static ref LEADER_CHANGES_TOTAL: IntCounter =
        register_int_counter!("coredge_leader_changes_total", "Total number of times a local member became leader.").unwrap();
    /// Current raft term, per member.
    pub static ref RAFT_TERM: IntGaugeVec =
        register_int_gauge_vec!("coredge_raft_term", "Current raft term.", &["member"]).unwrap();
    /// Current raft role, per member (0 follower, 1 candidate, 2 leader).
    pub static ref RAFT_ROLE: IntGaugeVec =
        register_int_gauge_vec!("coredge_raft_role", "Current raft role (0 follower, 1 candidate, 2 leader).", &["member"]).unwrap();
    /// Non-empty entries handed to the command applier.
    pub static ref COMMITTED_ENTRIES_TOTAL: IntCounter =
        register_int_counter!("coredge_committed_entries_total", "Total number of committed entries applied.").unwrap();

    // --- Routing and sessions ---
    /// Routing requests, labelled by access mode and outcome.
    pub static ref ROUTING_REQUESTS_TOTAL: IntCounterVec =
        register_int_counter_vec!("coredge_routing_requests_total", "Total routing requests, labelled by mode and outcome.", &["mode", "outcome"]).unwrap();
    /// Sessions invalidated because their binding went stale.
    pub static ref SESSIONS_EXPIRED_TOTAL: IntCounter =
        register_int_counter!("coredge_sessions_expired_total", "Total number of client sessions expired.").unwrap();

    // --- Server ---
    /// The number of clients currently connected to this process.
    pub static ref CONNECTED_CLIENTS: IntGauge =
        register_int_gauge!("coredge_connected_clients", "Number of currently connected clients.").unwrap();
    /// Members currently flagged stale in the local view.
    pub static ref STALE_MEMBERS: IntGaugeVec =
        register_int_gauge_vec!("coredge_stale_members", "Members currently flagged stale in the view.", &["member"]).unwrap();
}

/// Gathers all registered metrics and encodes them into the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
