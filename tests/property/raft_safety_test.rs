// tests/property/raft_safety_test.rs

//! Election safety and log agreement under random delivery, loss and timeouts.

use coredge::core::consensus::{
    Effect, Envelope, Input, LogIndex, MachineConfig, MemberId, RaftMachine, Role, Term,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone)]
enum Action {
    /// An election timeout on a non-leader, a heartbeat tick on a leader.
    Tick(usize),
    Propose(usize, u8),
    /// Delivers (or drops) the pending message at this position, modulo queue length.
    Deliver { slot: usize, drop: bool },
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        2 => (0usize..5).prop_map(Action::Tick),
        2 => (0usize..5, any::<u8>()).prop_map(|(i, b)| Action::Propose(i, b)),
        // Weighted so most messages arrive; roughly one in five is lost.
        8 => (any::<usize>(), prop::bool::weighted(0.2))
            .prop_map(|(slot, drop)| Action::Deliver { slot, drop }),
    ]
}

struct Cluster {
    machines: Vec<RaftMachine>,
    in_flight: VecDeque<Envelope>,
    /// Who led each term. One entry per term, ever.
    leaders: BTreeMap<Term, MemberId>,
    /// The term of every entry ever committed, by index.
    committed: BTreeMap<LogIndex, Term>,
}

impl Cluster {
    fn new(size: usize) -> Self {
        let ids: Vec<MemberId> = (0..size).map(|i| MemberId::new(format!("core-{i}"))).collect();
        let machines = ids
            .iter()
            .map(|id| RaftMachine::new(id.clone(), ids.clone(), MachineConfig::default()))
            .collect();
        Self {
            machines,
            in_flight: VecDeque::new(),
            leaders: BTreeMap::new(),
            committed: BTreeMap::new(),
        }
    }

    fn position(&self, id: &MemberId) -> Option<usize> {
        self.machines.iter().position(|m| m.id() == id)
    }

    fn input(&mut self, i: usize, input: Input) {
        for effect in self.machines[i].handle(input) {
            if let Effect::Send(envelope) = effect {
                self.in_flight.push_back(envelope);
            }
        }
    }

    fn apply(&mut self, action: Action) {
        let n = self.machines.len();
        match action {
            Action::Tick(i) => {
                let i = i % n;
                let input = if self.machines[i].is_leader() {
                    Input::HeartbeatTick
                } else {
                    Input::ElectionTimeout
                };
                self.input(i, input);
            }
            Action::Propose(i, b) => self.input(i % n, Input::Propose(vec![1, b])),
            Action::Deliver { slot, drop } => {
                if self.in_flight.is_empty() {
                    return;
                }
                let slot = slot % self.in_flight.len();
                let Some(envelope) = self.in_flight.remove(slot) else {
                    return;
                };
                if drop {
                    return;
                }
                if let Some(to) = self.position(&envelope.to) {
                    self.input(to, Input::Message(envelope));
                }
            }
        }
    }

    fn check(&mut self) -> Result<(), TestCaseError> {
        for machine in &self.machines {
            if machine.role() == Role::Leader {
                let leader = self
                    .leaders
                    .entry(machine.term())
                    .or_insert_with(|| machine.id().clone());
                prop_assert_eq!(
                    &*leader,
                    machine.id(),
                    "two leaders in term {}",
                    machine.term()
                );
            }

            for index in 1..=machine.commit_index() {
                let entry = machine.log().entry(index);
                prop_assert!(entry.is_some(), "committed index {} missing", index);
                let term = entry.map(|e| e.term).unwrap_or_default();
                let first = *self.committed.entry(index).or_insert(term);
                prop_assert_eq!(
                    first,
                    term,
                    "index {} committed with different terms",
                    index
                );
            }
        }

        // Log matching: equal (index, term) implies identical prefixes.
        for a in &self.machines {
            for b in &self.machines {
                let upto = a.commit_index().min(b.commit_index());
                for index in 1..=upto {
                    prop_assert_eq!(a.log().entry(index), b.log().entry(index));
                }
            }
        }
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_safety_under_random_schedules(
        size in prop::sample::select(vec![3usize, 5]),
        actions in prop::collection::vec(action(), 1..400),
    ) {
        let mut cluster = Cluster::new(size);
        for action in actions {
            cluster.apply(action);
            cluster.check()?;
        }
    }

    #[test]
    fn test_commit_index_never_moves_backwards(
        actions in prop::collection::vec(action(), 1..300),
    ) {
        let mut cluster = Cluster::new(3);
        let mut high_water = vec![0; 3];
        for action in actions {
            cluster.apply(action);
            for (i, machine) in cluster.machines.iter().enumerate() {
                prop_assert!(machine.commit_index() >= high_water[i]);
                high_water[i] = machine.commit_index();
            }
        }
    }
}

#[test]
fn test_reliable_delivery_commits_on_every_member() {
    let mut cluster = Cluster::new(3);
    cluster.apply(Action::Tick(0));
    while !cluster.in_flight.is_empty() {
        cluster.apply(Action::Deliver { slot: 0, drop: false });
    }
    assert!(cluster.machines[0].is_leader());

    cluster.apply(Action::Propose(0, 7));
    cluster.apply(Action::Tick(0));
    for _ in 0..3 {
        while !cluster.in_flight.is_empty() {
            cluster.apply(Action::Deliver { slot: 0, drop: false });
        }
        cluster.apply(Action::Tick(0));
    }
    while !cluster.in_flight.is_empty() {
        cluster.apply(Action::Deliver { slot: 0, drop: false });
    }

    for machine in &cluster.machines {
        assert_eq!(machine.commit_index(), 2, "{}", machine.id());
        assert_eq!(machine.log().entry(2).unwrap().command, vec![1, 7]);
    }
    cluster.check().unwrap();
}
