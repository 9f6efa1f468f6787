// src/core/consensus/machine.rs

//! The deterministic raft state machine.
//!
//! `RaftMachine` owns the term, vote, log and per-role bookkeeping of one core
//! member. Every transition goes through [`RaftMachine::handle`], which consumes
//! an [`Input`] and returns the [`Effect`]s the runtime must perform. The machine
//! never touches the network, timers or the clock, so the same code drives the
//! tokio node, the unit tests and the property tests.
//!
//! Leadership is guarded by a lease counted in heartbeat rounds: a leader that
//! goes more than `lease_rounds` rounds without hearing from a majority steps
//! down, so an isolated leader stops accepting writes on its own.

use super::log::RaftLog;
use super::message::{Envelope, RaftMessage};
use super::types::{ENTRY_OVERHEAD, LogEntry, LogIndex, MemberId, RaftStatus, Role, Term};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Tunables of the pure machine. Timing lives in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Heartbeat rounds a leader may go without majority acks before stepping down.
    pub lease_rounds: u32,
    /// Maximum entries carried by a single AppendEntries.
    pub max_append_entries: usize,
    /// Maximum entry bytes carried by a single AppendEntries.
    pub max_append_bytes: usize,
}

impl MachineConfig {
    /// The largest command that still fits in one AppendEntries on its own.
    pub fn max_command_bytes(&self) -> usize {
        self.max_append_bytes.saturating_sub(ENTRY_OVERHEAD)
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            lease_rounds: 4,
            max_append_entries: 64,
            max_append_bytes: 32 * 1024,
        }
    }
}

/// Replication cursor the leader keeps for each follower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub next_index: LogIndex,
    pub match_index: LogIndex,
    /// Set when the follower answered during the current heartbeat round.
    pub acked: bool,
}

/// The role of the machine together with the data that only exists in that role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleState {
    Follower {
        leader: Option<MemberId>,
    },
    Candidate {
        votes: BTreeSet<MemberId>,
    },
    Leader {
        progress: BTreeMap<MemberId, Progress>,
        missed_rounds: u32,
    },
}

impl RoleState {
    pub fn role(&self) -> Role {
        match self {
            RoleState::Follower { .. } => Role::Follower,
            RoleState::Candidate { .. } => Role::Candidate,
            RoleState::Leader { .. } => Role::Leader,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    ElectionTimeout,
    /// Operator request for an immediate election. Ignored by a leader.
    TriggerElection,
    HeartbeatTick,
    Message(Envelope),
    Propose(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(Envelope),
    ResetElectionTimer,
    RoleChanged {
        role: Role,
        term: Term,
        leader: Option<MemberId>,
    },
    /// A proposal was appended locally at `index`.
    Appended { index: LogIndex, term: Term },
    /// The commit index advanced to `up_to`.
    Committed { up_to: LogIndex },
    /// This member was leader and no longer is.
    SteppedDown { term: Term },
}

#[derive(Debug, Clone)]
pub struct RaftMachine {
    id: MemberId,
    voters: BTreeSet<MemberId>,
    config: MachineConfig,
    term: Term,
    voted_for: Option<MemberId>,
    log: RaftLog,
    commit_index: LogIndex,
    state: RoleState,
}

impl RaftMachine {
    /// Creates a follower. `voters` is the full core membership; `id` is added
    /// to it if missing.
    pub fn new(
        id: MemberId,
        voters: impl IntoIterator<Item = MemberId>,
        config: MachineConfig,
    ) -> Self {
        let mut voters: BTreeSet<MemberId> = voters.into_iter().collect();
        voters.insert(id.clone());
        Self {
            id,
            voters,
            config,
            term: 0,
            voted_for: None,
            log: RaftLog::new(),
            commit_index: 0,
            state: RoleState::Follower { leader: None },
        }
    }

    pub fn id(&self) -> &MemberId {
        &self.id
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    pub fn state(&self) -> &RoleState {
        &self.state
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.state, RoleState::Leader { .. })
    }

    pub fn voted_for(&self) -> Option<&MemberId> {
        self.voted_for.as_ref()
    }

    pub fn leader(&self) -> Option<MemberId> {
        match &self.state {
            RoleState::Leader { .. } => Some(self.id.clone()),
            RoleState::Follower { leader } => leader.clone(),
            RoleState::Candidate { .. } => None,
        }
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn log(&self) -> &RaftLog {
        &self.log
    }

    /// Committed entries in `(after, commit_index]`.
    pub fn committed_since(&self, after: LogIndex) -> &[LogEntry] {
        self.log.range(after, self.commit_index)
    }

    pub fn quorum(&self) -> usize {
        self.voters.len() / 2 + 1
    }

    /// A snapshot with `version` left at zero; the runtime stamps it.
    pub fn status(&self) -> RaftStatus {
        RaftStatus {
            member: self.id.clone(),
            role: self.role(),
            term: self.term,
            leader: self.leader(),
            commit_index: self.commit_index,
            last_log_index: self.log.last_index(),
            version: 0,
        }
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut fx = Vec::new();
        match input {
            Input::ElectionTimeout => {
                if !self.is_leader() {
                    self.start_election(&mut fx);
                }
            }
            Input::TriggerElection => {
                if self.is_leader() {
                    debug!("Ignoring election trigger on leader {}", self.id);
                } else {
                    info!("Election triggered on {} in term {}", self.id, self.term);
                    self.start_election(&mut fx);
                }
            }
            Input::HeartbeatTick => self.heartbeat_round(&mut fx),
            Input::Message(envelope) => self.receive(envelope, &mut fx),
            Input::Propose(command) => self.propose(command, &mut fx),
        }
        fx
    }

    fn peers(&self) -> Vec<MemberId> {
        self.voters
            .iter()
            .filter(|m| **m != self.id)
            .cloned()
            .collect()
    }

    fn send(&self, to: MemberId, message: RaftMessage, fx: &mut Vec<Effect>) {
        fx.push(Effect::Send(Envelope {
            from: self.id.clone(),
            to,
            message,
        }));
    }

    fn role_changed(&self, fx: &mut Vec<Effect>) {
        fx.push(Effect::RoleChanged {
            role: self.role(),
            term: self.term,
            leader: self.leader(),
        });
    }

    fn start_election(&mut self, fx: &mut Vec<Effect>) {
        self.term += 1;
        self.voted_for = Some(self.id.clone());
        let mut votes = BTreeSet::new();
        votes.insert(self.id.clone());
        self.state = RoleState::Candidate { votes };
        info!("{} starting election for term {}", self.id, self.term);
        self.role_changed(fx);
        fx.push(Effect::ResetElectionTimer);

        if self.quorum() <= 1 {
            self.become_leader(fx);
            return;
        }

        let request = RaftMessage::RequestVote {
            term: self.term,
            candidate: self.id.clone(),
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        for peer in self.peers() {
            self.send(peer, request.clone(), fx);
        }
    }

    fn become_leader(&mut self, fx: &mut Vec<Effect>) {
        let next_index = self.log.last_index() + 1;
        let progress = self
            .peers()
            .into_iter()
            .map(|peer| {
                (
                    peer,
                    Progress {
                        next_index,
                        match_index: 0,
                        acked: false,
                    },
                )
            })
            .collect();
        self.state = RoleState::Leader {
            progress,
            missed_rounds: 0,
        };
        // Entries from earlier terms only commit behind one of our own.
        self.log.append(self.term, Vec::new());
        info!("{} became leader for term {}", self.id, self.term);
        self.role_changed(fx);
        self.advance_commit(fx);
        self.broadcast_append(fx);
    }

    /// Adopts `term` if it is newer and reverts to follower under `leader`.
    fn become_follower(&mut self, term: Term, leader: Option<MemberId>, fx: &mut Vec<Effect>) {
        let was_leader = self.is_leader();
        let previous = (self.role(), self.term, self.leader());
        if term > self.term {
            self.term = term;
            self.voted_for = None;
        }
        self.state = RoleState::Follower { leader };
        if was_leader {
            info!("{} stepped down in term {}", self.id, self.term);
            fx.push(Effect::SteppedDown { term: self.term });
        }
        if previous != (self.role(), self.term, self.leader()) {
            self.role_changed(fx);
        }
    }

    fn propose(&mut self, command: Vec<u8>, fx: &mut Vec<Effect>) {
        if !self.is_leader() {
            return;
        }
        let index = self.log.append(self.term, command);
        fx.push(Effect::Appended {
            index,
            term: self.term,
        });
        self.advance_commit(fx);
        self.broadcast_append(fx);
    }

    fn heartbeat_round(&mut self, fx: &mut Vec<Effect>) {
        let quorum = self.quorum();
        let lease_rounds = self.config.lease_rounds;
        let RoleState::Leader {
            progress,
            missed_rounds,
        } = &mut self.state
        else {
            return;
        };

        let acked = 1 + progress.values().filter(|p| p.acked).count();
        if acked >= quorum {
            *missed_rounds = 0;
        } else {
            *missed_rounds += 1;
        }
        for p in progress.values_mut() {
            p.acked = false;
        }

        if *missed_rounds > lease_rounds {
            warn!(
                "{} lost contact with a majority for {} heartbeat rounds; stepping down",
                self.id, missed_rounds
            );
            let term = self.term;
            self.become_follower(term, None, fx);
            return;
        }
        self.broadcast_append(fx);
    }

    fn broadcast_append(&self, fx: &mut Vec<Effect>) {
        for peer in self.peers() {
            self.send_append(&peer, fx);
        }
    }

    fn send_append(&self, peer: &MemberId, fx: &mut Vec<Effect>) {
        let RoleState::Leader { progress, .. } = &self.state else {
            return;
        };
        let Some(p) = progress.get(peer) else {
            return;
        };
        let prev_log_index = p.next_index.saturating_sub(1);
        let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);
        let entries = self.log.entries_from(
            p.next_index,
            self.config.max_append_entries,
            self.config.max_append_bytes,
        );
        self.send(
            peer.clone(),
            RaftMessage::AppendEntries {
                term: self.term,
                leader: self.id.clone(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: self.commit_index,
            },
            fx,
        );
    }

    fn receive(&mut self, envelope: Envelope, fx: &mut Vec<Effect>) {
        if envelope.to != self.id || !self.voters.contains(&envelope.from) {
            debug!(
                "{} dropping raft message from non-voter {}",
                self.id, envelope.from
            );
            return;
        }

        if envelope.message.term() > self.term {
            // A newer leader is only known once it sends AppendEntries.
            self.become_follower(envelope.message.term(), None, fx);
        }

        match envelope.message {
            RaftMessage::RequestVote {
                term,
                candidate,
                last_log_index,
                last_log_term,
            } => self.on_request_vote(term, candidate, last_log_index, last_log_term, fx),
            RaftMessage::Vote {
                term,
                voter,
                granted,
            } => self.on_vote(term, voter, granted, fx),
            RaftMessage::AppendEntries {
                term,
                leader,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => self.on_append_entries(
                term,
                leader,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
                fx,
            ),
            RaftMessage::AppendResult {
                term,
                follower,
                success,
                match_index,
            } => self.on_append_result(term, follower, success, match_index, fx),
        }
    }

    fn on_request_vote(
        &mut self,
        term: Term,
        candidate: MemberId,
        last_log_index: LogIndex,
        last_log_term: Term,
        fx: &mut Vec<Effect>,
    ) {
        let granted = term == self.term
            && self.voted_for.as_ref().is_none_or(|v| *v == candidate)
            && self.log.is_up_to_date(last_log_term, last_log_index);

        if granted {
            self.voted_for = Some(candidate.clone());
            fx.push(Effect::ResetElectionTimer);
            debug!("{} voted for {} in term {}", self.id, candidate, term);
        }
        self.send(
            candidate,
            RaftMessage::Vote {
                term: self.term,
                voter: self.id.clone(),
                granted,
            },
            fx,
        );
    }

    fn on_vote(&mut self, term: Term, voter: MemberId, granted: bool, fx: &mut Vec<Effect>) {
        if term != self.term || !granted {
            return;
        }
        let quorum = self.quorum();
        let RoleState::Candidate { votes } = &mut self.state else {
            return;
        };
        votes.insert(voter);
        if votes.len() >= quorum {
            self.become_leader(fx);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_append_entries(
        &mut self,
        term: Term,
        leader: MemberId,
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit: LogIndex,
        fx: &mut Vec<Effect>,
    ) {
        if term < self.term {
            self.send(
                leader,
                RaftMessage::AppendResult {
                    term: self.term,
                    follower: self.id.clone(),
                    success: false,
                    match_index: self.log.last_index(),
                },
                fx,
            );
            return;
        }

        if self.is_leader() {
            // Two leaders in one term cannot happen; refuse rather than corrupt the log.
            warn!(
                "{} received AppendEntries from {} while leading term {}",
                self.id, leader, term
            );
            return;
        }

        if self.leader().as_ref() != Some(&leader) || self.role() != Role::Follower {
            self.become_follower(term, Some(leader.clone()), fx);
        }
        fx.push(Effect::ResetElectionTimer);

        if !self.log.matches(prev_log_index, prev_log_term) {
            let hint = self.log.last_index().min(prev_log_index.saturating_sub(1));
            self.send(
                leader,
                RaftMessage::AppendResult {
                    term: self.term,
                    follower: self.id.clone(),
                    success: false,
                    match_index: hint,
                },
                fx,
            );
            return;
        }

        let last_new = prev_log_index + entries.len() as LogIndex;
        if self.log.merge(entries) {
            debug!("{} truncated conflicting log suffix", self.id);
        }

        if leader_commit > self.commit_index {
            let up_to = leader_commit.min(last_new);
            if up_to > self.commit_index {
                self.commit_index = up_to;
                fx.push(Effect::Committed { up_to });
            }
        }

        self.send(
            leader,
            RaftMessage::AppendResult {
                term: self.term,
                follower: self.id.clone(),
                success: true,
                match_index: last_new,
            },
            fx,
        );
    }

    fn on_append_result(
        &mut self,
        term: Term,
        follower: MemberId,
        success: bool,
        match_index: LogIndex,
        fx: &mut Vec<Effect>,
    ) {
        if term != self.term {
            return;
        }
        let last_index = self.log.last_index();
        let RoleState::Leader { progress, .. } = &mut self.state else {
            return;
        };
        let Some(p) = progress.get_mut(&follower) else {
            return;
        };
        p.acked = true;

        if success {
            if match_index > p.match_index {
                p.match_index = match_index.min(last_index);
            }
            p.next_index = p.match_index + 1;
            let behind = p.next_index <= last_index;
            self.advance_commit(fx);
            if behind {
                self.send_append(&follower, fx);
            }
        } else {
            let retry_from = (match_index + 1).min(p.next_index.saturating_sub(1)).max(1);
            p.next_index = retry_from.max(p.match_index + 1);
            self.send_append(&follower, fx);
        }
    }

    /// Moves the commit index to the highest index stored on a majority, but only
    /// if that entry belongs to the current term.
    fn advance_commit(&mut self, fx: &mut Vec<Effect>) {
        let RoleState::Leader { progress, .. } = &self.state else {
            return;
        };
        let mut matched: Vec<LogIndex> = progress.values().map(|p| p.match_index).collect();
        matched.push(self.log.last_index());
        matched.sort_unstable_by(|a, b| b.cmp(a));

        let Some(&candidate) = matched.get(self.quorum() - 1) else {
            return;
        };
        if candidate > self.commit_index && self.log.term_at(candidate) == Some(self.term) {
            self.commit_index = candidate;
            fx.push(Effect::Committed { up_to: candidate });
        }
    }
}
