// src/core/bus/local.rs

//! An in-process bus with fault injection.

use super::{BusMessage, ClusterBus};
use crate::core::consensus::{Envelope, MemberId, RaftTransport};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

const INBOX_CAPACITY: usize = 1024;
const PPM: f64 = 1_000_000.0;

/// Connects in-process members through per-member inboxes.
#[derive(Debug, Default)]
pub struct LocalNetwork {
    inboxes: DashMap<MemberId, mpsc::Sender<BusMessage>>,
    isolated: RwLock<HashSet<MemberId>>,
    /// Drop probability in parts per million.
    drop_ppm: AtomicU32,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates the inbox for `id`. Re-registering replaces the old inbox.
    pub fn register(&self, id: &MemberId) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.inboxes.insert(id.clone(), tx);
        rx
    }

    pub fn unregister(&self, id: &MemberId) {
        self.inboxes.remove(id);
    }

    /// Cuts every link to and from `id`.
    pub fn isolate(&self, id: &MemberId) {
        info!("Isolating {} from the local network.", id);
        self.isolated.write().insert(id.clone());
    }

    pub fn heal(&self, id: &MemberId) {
        info!("Reconnecting {} to the local network.", id);
        self.isolated.write().remove(id);
    }

    pub fn is_isolated(&self, id: &MemberId) -> bool {
        self.isolated.read().contains(id)
    }

    /// Sets the probability in `[0, 1]` that any message is silently lost.
    pub fn set_drop_rate(&self, probability: f64) {
        let ppm = (probability.clamp(0.0, 1.0) * PPM) as u32;
        self.drop_ppm.store(ppm, Ordering::Relaxed);
    }

    fn should_drop(&self, from: &MemberId, to: &MemberId) -> bool {
        if self.is_isolated(from) || self.is_isolated(to) {
            return true;
        }
        let ppm = self.drop_ppm.load(Ordering::Relaxed);
        ppm > 0 && rand::thread_rng().gen_bool(f64::from(ppm) / PPM)
    }
}

#[async_trait]
impl ClusterBus for LocalNetwork {
    async fn deliver(&self, to: &MemberId, message: BusMessage) {
        if self.should_drop(message.sender(), to) {
            return;
        }
        let Some(inbox) = self.inboxes.get(to).map(|tx| tx.clone()) else {
            debug!("No local inbox for {}; dropping message.", to);
            return;
        };
        if inbox.try_send(message).is_err() {
            debug!("Local inbox for {} is full or closed; dropping message.", to);
        }
    }
}

#[async_trait]
impl RaftTransport for LocalNetwork {
    async fn send(&self, envelope: Envelope) {
        let to = envelope.to.clone();
        self.deliver(&to, BusMessage::Raft(envelope)).await;
    }
}
