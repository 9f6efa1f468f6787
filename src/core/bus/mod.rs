// src/core/bus/mod.rs

//! The cluster bus carries raft traffic and discovery gossip between members.
//! `UdpBus` is the network implementation; `LocalNetwork` connects in-process
//! members and can inject faults.

pub mod local;
pub mod secure;
pub mod udp;

use crate::core::consensus::{Envelope, MemberId};
use crate::core::membership::{Discovery, DiscoveryMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

pub use local::LocalNetwork;
pub use secure::SecureBusMessage;
pub use udp::UdpBus;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Room reserved in a datagram for the envelope, timestamp and signature
/// around a batch of log entries.
pub const DATAGRAM_HEADROOM: usize = 4 * 1024;

/// Everything that travels over the bus.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    Raft(Envelope),
    Discovery(DiscoveryMessage),
}

impl BusMessage {
    pub fn sender(&self) -> &MemberId {
        match self {
            BusMessage::Raft(envelope) => &envelope.from,
            BusMessage::Discovery(message) => &message.sender().member.id,
        }
    }
}

/// Best-effort delivery of a bus message to a member.
#[async_trait]
pub trait ClusterBus: Send + Sync {
    async fn deliver(&self, to: &MemberId, message: BusMessage);
}

/// Fans inbound bus messages out to the raft inbox and the discovery handler.
#[derive(Clone)]
pub struct Inbound {
    raft_tx: Option<mpsc::Sender<Envelope>>,
    discovery: Arc<Discovery>,
}

impl Inbound {
    /// `raft_tx` is `None` on edge members, which drop raft traffic.
    pub fn new(raft_tx: Option<mpsc::Sender<Envelope>>, discovery: Arc<Discovery>) -> Self {
        Self { raft_tx, discovery }
    }

    pub async fn route(&self, message: BusMessage) {
        match message {
            BusMessage::Raft(envelope) => match &self.raft_tx {
                Some(tx) => {
                    if tx.try_send(envelope).is_err() {
                        debug!("Raft inbox full or closed; dropping message.");
                    }
                }
                None => debug!(
                    "Edge member dropping raft message from {}",
                    envelope.from
                ),
            },
            BusMessage::Discovery(message) => self.discovery.handle(message).await,
        }
    }
}

/// Drains an in-process inbox until shutdown.
pub async fn dispatch(
    mut inbox: mpsc::Receiver<BusMessage>,
    inbound: Inbound,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Bus dispatcher shutting down.");
                return;
            }
            message = inbox.recv() => match message {
                Some(message) => inbound.route(message).await,
                None => return,
            },
        }
    }
}
