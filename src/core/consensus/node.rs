// src/core/consensus/node.rs

//! The tokio runtime around a [`RaftMachine`].
//!
//! A `RaftNode` is the handle the rest of the member uses; a `RaftWorker` is the
//! single task that owns the machine. Timers, inbound messages, control
//! requests and shutdown are multiplexed in one `select!` loop, so every
//! transition of a member is serialized through that task.

use super::applier::CommandApplier;
use super::machine::{Effect, Input, RaftMachine};
use super::message::Envelope;
use super::transport::RaftTransport;
use super::types::{LogIndex, MemberId, RaftStatus, Role, Term};
use crate::config::RaftConfig;
use crate::core::errors::CoredgeError;
use crate::core::metrics;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const CONTROL_CHANNEL_CAPACITY: usize = 256;

type SubmitReply = oneshot::Sender<Result<LogIndex, CoredgeError>>;

/// Requests from handles to the worker task.
enum Control {
    Submit {
        command: Vec<u8>,
        reply: SubmitReply,
    },
    TriggerElection {
        reply: oneshot::Sender<bool>,
    },
}

/// A caller waiting for its entry to commit.
struct Waiter {
    term: Term,
    reply: SubmitReply,
}

/// The shared handle of a raft member.
#[derive(Debug)]
pub struct RaftNode {
    id: MemberId,
    /// Client address, quoted in `NotLeader` errors.
    address: String,
    max_command_bytes: usize,
    role: AtomicU8,
    term: AtomicU64,
    status_rx: watch::Receiver<RaftStatus>,
    control_tx: mpsc::Sender<Control>,
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Control::Submit { command, .. } => {
                write!(f, "Submit({} bytes)", command.len())
            }
            Control::TriggerElection { .. } => f.write_str("TriggerElection"),
        }
    }
}

impl RaftNode {
    /// Creates the handle and the worker that must be spawned to drive it.
    /// `inbox` receives the raft envelopes addressed to this member.
    pub fn new(
        id: MemberId,
        address: String,
        voters: impl IntoIterator<Item = MemberId>,
        config: &RaftConfig,
        transport: Arc<dyn RaftTransport>,
        applier: Arc<dyn CommandApplier>,
        inbox: mpsc::Receiver<Envelope>,
    ) -> (Arc<Self>, RaftWorker) {
        let machine_config = config.machine();
        let machine = RaftMachine::new(id.clone(), voters, machine_config);
        let mut initial = machine.status();
        initial.version = 1;
        let (status_tx, status_rx) = watch::channel(initial);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);

        let node = Arc::new(Self {
            id,
            address,
            max_command_bytes: machine_config.max_command_bytes(),
            role: AtomicU8::new(Role::Follower.as_u8()),
            term: AtomicU64::new(0),
            status_rx,
            control_tx,
        });

        let worker = RaftWorker {
            node: node.clone(),
            machine,
            election_timeout: (config.election_timeout_min, config.election_timeout_max),
            heartbeat_interval: config.heartbeat_interval,
            transport,
            applier,
            inbox,
            control_rx,
            status_tx,
            waiters: BTreeMap::new(),
            last_applied: 0,
            election_deadline: Instant::now(),
        };
        (node, worker)
    }

    pub fn id(&self) -> &MemberId {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn current_role(&self) -> Role {
        Role::from_u8(self.role.load(Ordering::Acquire))
    }

    pub fn current_term(&self) -> Term {
        self.term.load(Ordering::Acquire)
    }

    pub fn status(&self) -> RaftStatus {
        self.status_rx.borrow().clone()
    }

    /// A receiver that observes every published status.
    pub fn subscribe(&self) -> watch::Receiver<RaftStatus> {
        self.status_rx.clone()
    }

    fn not_leader(&self) -> CoredgeError {
        CoredgeError::NotLeader {
            address: self.address.clone(),
        }
    }

    /// Forces an election round now. Returns false on a leader, where it does nothing.
    pub async fn trigger_election(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .control_tx
            .send(Control::TriggerElection { reply })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Replicates `command` and resolves with its index once a majority stores it.
    /// Commands that would not fit in one AppendEntries are refused up front.
    pub async fn submit(&self, command: Vec<u8>) -> Result<LogIndex, CoredgeError> {
        if command.len() > self.max_command_bytes {
            return Err(CoredgeError::CommandTooLarge {
                size: command.len(),
                limit: self.max_command_bytes,
            });
        }
        if self.current_role() != Role::Leader {
            return Err(self.not_leader());
        }
        let (reply, rx) = oneshot::channel();
        self.control_tx
            .send(Control::Submit { command, reply })
            .await
            .map_err(|_| self.not_leader())?;
        rx.await.unwrap_or_else(|_| Err(self.not_leader()))
    }

    /// Waits until some leader is known, or `timeout` elapses.
    pub async fn await_leader(&self, timeout: Duration) -> Option<MemberId> {
        let mut rx = self.status_rx.clone();
        let wait = async move {
            loop {
                let leader = rx.borrow_and_update().leader.clone();
                if leader.is_some() {
                    return leader;
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };
        time::timeout(timeout, wait).await.ok().flatten()
    }
}

/// The task that owns a member's raft machine.
pub struct RaftWorker {
    node: Arc<RaftNode>,
    machine: RaftMachine,
    election_timeout: (Duration, Duration),
    heartbeat_interval: Duration,
    transport: Arc<dyn RaftTransport>,
    applier: Arc<dyn CommandApplier>,
    inbox: mpsc::Receiver<Envelope>,
    control_rx: mpsc::Receiver<Control>,
    status_tx: watch::Sender<RaftStatus>,
    waiters: BTreeMap<LogIndex, Waiter>,
    last_applied: LogIndex,
    election_deadline: Instant,
}

impl RaftWorker {
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut heartbeat = time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.reset_election_deadline();
        self.publish();
        info!("Raft node {} started.", self.node.id);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Raft node {} shutting down.", self.node.id);
                    break;
                }
                Some(control) = self.control_rx.recv() => {
                    self.on_control(control).await;
                }
                Some(envelope) = self.inbox.recv() => {
                    self.step(Input::Message(envelope), None).await;
                }
                _ = heartbeat.tick() => {
                    self.purge_abandoned();
                    if self.machine.is_leader() {
                        self.step(Input::HeartbeatTick, None).await;
                    }
                }
                _ = time::sleep_until(self.election_deadline) => {
                    self.step(Input::ElectionTimeout, None).await;
                    self.reset_election_deadline();
                }
            }
        }

        self.fail_waiters();
    }

    fn reset_election_deadline(&mut self) {
        let (min, max) = self.election_timeout;
        let min_ms = min.as_millis() as u64;
        let max_ms = (max.as_millis() as u64).max(min_ms);
        let timeout = rand::thread_rng().gen_range(min_ms..=max_ms);
        self.election_deadline = Instant::now() + Duration::from_millis(timeout);
    }

    async fn on_control(&mut self, control: Control) {
        match control {
            Control::Submit { command, reply } => {
                if !self.machine.is_leader() {
                    let _ = reply.send(Err(self.node.not_leader()));
                    return;
                }
                self.step(Input::Propose(command), Some(reply)).await;
            }
            Control::TriggerElection { reply } => {
                if self.machine.is_leader() {
                    info!(
                        "Raft node {} is already leader; election trigger ignored.",
                        self.node.id
                    );
                    let _ = reply.send(false);
                    return;
                }
                self.step(Input::TriggerElection, None).await;
                let _ = reply.send(true);
            }
        }
    }

    /// Feeds one input to the machine and performs the resulting effects.
    async fn step(&mut self, input: Input, mut submitter: Option<SubmitReply>) {
        let effects = self.machine.handle(input);
        for effect in effects {
            match effect {
                Effect::Send(envelope) => self.transport.send(envelope).await,
                Effect::ResetElectionTimer => self.reset_election_deadline(),
                Effect::RoleChanged { role, term, leader } => {
                    match role {
                        Role::Candidate => metrics::ELECTIONS_STARTED_TOTAL.inc(),
                        Role::Leader => metrics::LEADER_CHANGES_TOTAL.inc(),
                        Role::Follower => {}
                    }
                    debug!(
                        "Raft node {} is now {} in term {} (leader: {:?})",
                        self.node.id, role, term, leader
                    );
                }
                Effect::Appended { index, term } => {
                    if let Some(reply) = submitter.take() {
                        self.waiters.insert(index, Waiter { term, reply });
                    }
                }
                Effect::Committed { up_to } => self.apply_committed(up_to),
                Effect::SteppedDown { term } => {
                    warn!(
                        "Raft node {} lost leadership in term {}; failing {} pending writes.",
                        self.node.id,
                        term,
                        self.waiters.len()
                    );
                    self.fail_waiters();
                }
            }
        }
        if let Some(reply) = submitter {
            let _ = reply.send(Err(self.node.not_leader()));
        }
        self.publish();
    }

    fn apply_committed(&mut self, up_to: LogIndex) {
        while self.last_applied < up_to {
            let next = self.last_applied + 1;
            let Some(entry) = self.machine.log().entry(next) else {
                break;
            };
            if !entry.is_noop() {
                self.applier.apply(entry);
                metrics::COMMITTED_ENTRIES_TOTAL.inc();
            }
            self.last_applied = next;
        }

        let pending = self.waiters.split_off(&(self.last_applied + 1));
        let resolved = std::mem::replace(&mut self.waiters, pending);
        for (index, waiter) in resolved {
            // A different term at this index means our entry was overwritten.
            let outcome = match self.machine.log().term_at(index) {
                Some(term) if term == waiter.term => Ok(index),
                _ => Err(self.node.not_leader()),
            };
            let _ = waiter.reply.send(outcome);
        }
    }

    fn fail_waiters(&mut self) {
        for (_, waiter) in std::mem::take(&mut self.waiters) {
            let _ = waiter.reply.send(Err(self.node.not_leader()));
        }
    }

    /// Drops waiters whose caller stopped listening.
    fn purge_abandoned(&mut self) {
        let before = self.waiters.len();
        self.waiters.retain(|_, w| !w.reply.is_closed());
        let purged = before - self.waiters.len();
        if purged > 0 {
            debug!(
                "Raft node {} purged {} abandoned submit waiters.",
                self.node.id, purged
            );
        }
    }

    fn publish(&mut self) {
        let mut status = self.machine.status();
        self.node.role.store(status.role.as_u8(), Ordering::Release);
        self.node.term.store(status.term, Ordering::Release);

        let member = self.node.id.as_str();
        metrics::RAFT_TERM
            .with_label_values(&[member])
            .set(status.term as i64);
        metrics::RAFT_ROLE
            .with_label_values(&[member])
            .set(status.role.as_u8() as i64);

        self.status_tx.send_if_modified(move |current| {
            status.version = current.version;
            if *current == status {
                return false;
            }
            status.version += 1;
            *current = status;
            true
        });
    }
}
