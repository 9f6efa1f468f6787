// src/core/consensus/transport.rs

//! Outbound delivery of raft messages.

use super::message::Envelope;
use async_trait::async_trait;

/// Fire-and-forget delivery of a raft envelope to `envelope.to`. Loss and
/// reordering are tolerated by the protocol, so implementations never report
/// failures back to the engine.
#[async_trait]
pub trait RaftTransport: Send + Sync {
    async fn send(&self, envelope: Envelope);
}
