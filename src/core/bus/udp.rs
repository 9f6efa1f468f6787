// src/core/bus/udp.rs

//! The UDP cluster bus used by member processes.

use super::secure::SecureBusMessage;
use super::{BusMessage, ClusterBus, Inbound, MAX_DATAGRAM_SIZE};
use crate::core::consensus::{Envelope, MemberId, RaftTransport};
use crate::core::membership::{ClusterView, now_ms};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const UDP_BUFFER_SIZE: usize = 65535;

pub struct UdpBus {
    socket: Arc<UdpSocket>,
    view: Arc<ClusterView>,
    password: Option<String>,
}

impl UdpBus {
    pub async fn bind(
        addr: &str,
        view: Arc<ClusterView>,
        password: Option<String>,
    ) -> std::io::Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Cluster bus listening on UDP {}.", socket.local_addr()?);
        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            view,
            password,
        }))
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    /// Datagrams older or newer than this are dropped as replays or clock trouble.
    fn freshness_window_ms(&self) -> u64 {
        (self.view.member_timeout() * 2).as_millis() as u64
    }

    async fn send_to(&self, addr: &str, message: BusMessage) {
        let datagram = match SecureBusMessage::new(message, now_ms(), &self.password)
            .and_then(|secure| secure.encode())
        {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to prepare bus message for {}: {}", addr, e);
                return;
            }
        };
        if datagram.len() > MAX_DATAGRAM_SIZE {
            warn!(
                "Dropping {} byte bus message to {}: larger than a datagram.",
                datagram.len(),
                addr
            );
            return;
        }
        if let Err(e) = self.socket.send_to(&datagram, addr).await {
            warn!("Failed to send bus message to {}: {}", addr, e);
        }
    }

    /// Receives, verifies and routes datagrams until shutdown.
    pub async fn run_receiver(
        self: Arc<Self>,
        inbound: Inbound,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Cluster bus receiver shutting down.");
                    return;
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, src) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            error!("Error receiving from cluster bus: {}", e);
                            continue;
                        }
                    };
                    let secure = match SecureBusMessage::decode(&buf[..len]) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!("Failed to deserialize bus message from {}: {}", src, e);
                            continue;
                        }
                    };
                    match secure.verify(&self.password) {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!("Received bus message with invalid signature from {}. Ignoring.", src);
                            continue;
                        }
                        Err(e) => {
                            warn!("Error verifying bus message signature from {}: {}", src, e);
                            continue;
                        }
                    }
                    let now = now_ms();
                    if !secure.is_fresh(now, self.freshness_window_ms()) {
                        warn!(
                            "Dropping stale bus message from {}: message ts={}, now={}",
                            src, secure.timestamp_ms, now
                        );
                        continue;
                    }
                    debug!("Bus message from {} ({})", secure.message.sender(), src);
                    inbound.route(secure.message).await;
                }
            }
        }
    }
}

#[async_trait]
impl ClusterBus for UdpBus {
    async fn deliver(&self, to: &MemberId, message: BusMessage) {
        match self.view.bus_address_of(to) {
            Some(addr) => self.send_to(&addr, message).await,
            None => debug!("No bus address known for {}; dropping message.", to),
        }
    }
}

#[async_trait]
impl RaftTransport for UdpBus {
    async fn send(&self, envelope: Envelope) {
        let to = envelope.to.clone();
        self.deliver(&to, BusMessage::Raft(envelope)).await;
    }
}
