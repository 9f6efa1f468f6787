// src/core/membership/discovery.rs

//! Discovery gossip: members periodically exchange adverts so every view
//! converges on who exists, what kind they are, and what role they claim.

use super::member::MemberAdvert;
use super::view::ClusterView;
use crate::config::DiscoveryConfig;
use crate::core::bus::{BusMessage, ClusterBus};
use crate::core::consensus::{RaftNode, Role};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    Ping {
        sender: MemberAdvert,
        known: Vec<MemberAdvert>,
    },
    Pong {
        sender: MemberAdvert,
        known: Vec<MemberAdvert>,
    },
}

impl DiscoveryMessage {
    pub fn sender(&self) -> &MemberAdvert {
        match self {
            DiscoveryMessage::Ping { sender, .. } | DiscoveryMessage::Pong { sender, .. } => sender,
        }
    }
}

pub struct Discovery {
    view: Arc<ClusterView>,
    bus: Arc<dyn ClusterBus>,
    /// Present on core members; edge members always advertise `Follower`.
    raft: Option<Arc<RaftNode>>,
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(
        view: Arc<ClusterView>,
        bus: Arc<dyn ClusterBus>,
        raft: Option<Arc<RaftNode>>,
        config: DiscoveryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            view,
            bus,
            raft,
            config,
        })
    }

    pub fn view(&self) -> &Arc<ClusterView> {
        &self.view
    }

    /// Republishes our own advert from the raft node's current status.
    fn refresh_local(&self) -> MemberAdvert {
        match &self.raft {
            Some(raft) => {
                let status = raft.status();
                self.view
                    .update_local(status.role, status.term, status.leader)
            }
            None => self.view.update_local(Role::Follower, 0, None),
        }
    }

    /// Pings a sample of known members.
    pub async fn gossip_round(&self) {
        let sender = self.refresh_local();
        let known = self.view.sample_adverts(self.config.gossip_fanout);

        let mut targets = self.view.peers();
        if targets.len() > self.config.gossip_fanout {
            let mut rng = rand::thread_rng();
            targets = targets
                .choose_multiple(&mut rng, self.config.gossip_fanout)
                .cloned()
                .collect();
        }

        for target in targets {
            debug!("Sending discovery PING to {}", target.id);
            let ping = DiscoveryMessage::Ping {
                sender: sender.clone(),
                known: known.clone(),
            };
            self.bus
                .deliver(&target.id, BusMessage::Discovery(ping))
                .await;
        }
    }

    /// Merges an inbound message and answers pings.
    pub async fn handle(&self, message: DiscoveryMessage) {
        match message {
            DiscoveryMessage::Ping { sender, known } => {
                let reply_to = sender.member.id.clone();
                self.merge_all(sender, known);
                let pong = DiscoveryMessage::Pong {
                    sender: self.refresh_local(),
                    known: self.view.sample_adverts(self.config.gossip_fanout),
                };
                self.bus
                    .deliver(&reply_to, BusMessage::Discovery(pong))
                    .await;
            }
            DiscoveryMessage::Pong { sender, known } => self.merge_all(sender, known),
        }
    }

    fn merge_all(&self, sender: MemberAdvert, known: Vec<MemberAdvert>) {
        self.view.merge(sender);
        for advert in known {
            self.view.merge(advert);
        }
    }

    /// The main entry point for the discovery background task.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick = time::interval(self.config.gossip_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Discovery worker for {} shutting down.", self.view.my_id());
                    return;
                }
                _ = tick.tick() => {
                    self.gossip_round().await;
                    self.view.expire();
                }
            }
        }
    }
}
