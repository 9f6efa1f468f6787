// src/core/membership/view.rs

//! `ClusterView` is this member's eventually consistent picture of the cluster.

use super::member::{Cluster, ClusterMember, MemberAdvert, MemberFlags, MemberKind};
use crate::core::consensus::{MemberId, Role, Term};
use crate::core::metrics;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Helper to get the current system time in milliseconds since the UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One entry of the view: the latest advert plus local bookkeeping that is
/// never gossiped.
#[derive(Debug, Clone)]
pub struct MemberEntry {
    pub advert: MemberAdvert,
    pub flags: MemberFlags,
    pub refreshed: Instant,
    /// From the static bootstrap list; flagged stale but never removed.
    pub bootstrap: bool,
}

#[derive(Debug)]
pub struct ClusterView {
    my_id: MemberId,
    myself: ClusterMember,
    entries: DashMap<MemberId, MemberEntry>,
    member_timeout: Duration,
    /// Seeded from the wall clock so a restarted member still advances.
    heartbeat: AtomicU64,
}

impl ClusterView {
    /// Creates a view holding `myself` plus the static bootstrap members.
    pub fn new(
        myself: ClusterMember,
        bootstrap: impl IntoIterator<Item = ClusterMember>,
        member_timeout: Duration,
    ) -> Self {
        let now = Instant::now();
        let heartbeat = now_ms();
        let entries = DashMap::new();

        for member in bootstrap {
            if member.id == myself.id {
                continue;
            }
            let flags = MemberFlags::for_kind(member.kind) | MemberFlags::STALE;
            entries.insert(
                member.id.clone(),
                MemberEntry {
                    advert: MemberAdvert {
                        member,
                        role: Role::Follower,
                        term: 0,
                        leader: None,
                        heartbeat: 0,
                    },
                    flags,
                    refreshed: now,
                    bootstrap: true,
                },
            );
        }

        let my_id = myself.id.clone();
        let flags = MemberFlags::MYSELF | MemberFlags::for_kind(myself.kind);
        entries.insert(
            my_id.clone(),
            MemberEntry {
                advert: MemberAdvert {
                    member: myself.clone(),
                    role: Role::Follower,
                    term: 0,
                    leader: None,
                    heartbeat,
                },
                flags,
                refreshed: now,
                bootstrap: true,
            },
        );

        Self {
            my_id,
            myself,
            entries,
            member_timeout,
            heartbeat: AtomicU64::new(heartbeat),
        }
    }

    pub fn my_id(&self) -> &MemberId {
        &self.my_id
    }

    pub fn member_timeout(&self) -> Duration {
        self.member_timeout
    }

    /// Records this member's own role and bumps its heartbeat.
    pub fn update_local(&self, role: Role, term: Term, leader: Option<MemberId>) -> MemberAdvert {
        let heartbeat = self.heartbeat.fetch_add(1, Ordering::AcqRel) + 1;
        let advert = MemberAdvert {
            member: self.myself.clone(),
            role,
            term,
            leader,
            heartbeat,
        };
        self.entries.insert(
            self.my_id.clone(),
            MemberEntry {
                advert: advert.clone(),
                flags: MemberFlags::MYSELF | MemberFlags::for_kind(self.myself.kind),
                refreshed: Instant::now(),
                bootstrap: true,
            },
        );
        advert
    }

    pub fn local_advert(&self) -> Option<MemberAdvert> {
        self.entries.get(&self.my_id).map(|e| e.advert.clone())
    }

    /// Applies a gossiped advert. Returns true if the view changed.
    pub fn merge(&self, advert: MemberAdvert) -> bool {
        if advert.member.id == self.my_id {
            return false;
        }

        let id = advert.member.id.clone();
        if let Some(mut entry) = self.entries.get_mut(&id) {
            if advert.heartbeat <= entry.advert.heartbeat {
                return false;
            }
            if entry.flags.contains(MemberFlags::STALE) && entry.advert.heartbeat > 0 {
                info!("Member {} is reachable again.", id);
            }
            if advert.member.kind != entry.advert.member.kind {
                warn!(
                    "Member {} changed kind from {:?} to {:?}",
                    id, entry.advert.member.kind, advert.member.kind
                );
            }
            entry.flags = MemberFlags::for_kind(advert.member.kind);
            entry.advert = advert;
            entry.refreshed = Instant::now();
            drop(entry);
            self.report_stale();
            return true;
        }

        info!(
            "Discovered new {:?} member {} at {}",
            advert.member.kind, id, advert.member.client_addr
        );
        self.entries.insert(
            id,
            MemberEntry {
                flags: MemberFlags::for_kind(advert.member.kind),
                advert,
                refreshed: Instant::now(),
                bootstrap: false,
            },
        );
        true
    }

    /// Flags entries older than `member_timeout` as stale and removes
    /// non-bootstrap entries older than twice that. Returns the removed ids.
    pub fn expire(&self) -> Vec<MemberId> {
        let now = Instant::now();
        let mut removed = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.flags.contains(MemberFlags::MYSELF) {
                continue;
            }
            let age = now.duration_since(entry.refreshed);
            if age > self.member_timeout * 2 && !entry.bootstrap {
                removed.push(entry.key().clone());
            } else if age > self.member_timeout && !entry.flags.contains(MemberFlags::STALE) {
                warn!(
                    "Member {} has not been heard from for {:?}; marking stale.",
                    entry.key(),
                    age
                );
                entry.flags.insert(MemberFlags::STALE);
            }
        }
        for id in &removed {
            self.entries.remove(id);
            info!("Member {} timed out and left the view.", id);
        }
        self.report_stale();
        removed
    }

    fn report_stale(&self) {
        let stale = self
            .entries
            .iter()
            .filter(|e| e.flags.contains(MemberFlags::STALE))
            .count();
        metrics::STALE_MEMBERS
            .with_label_values(&[self.my_id.as_str()])
            .set(stale as i64);
    }

    pub fn entry(&self, id: &MemberId) -> Option<MemberEntry> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    pub fn flags(&self, id: &MemberId) -> Option<MemberFlags> {
        self.entries.get(id).map(|e| e.flags)
    }

    pub fn member(&self, id: &MemberId) -> Option<ClusterMember> {
        self.entries.get(id).map(|e| e.advert.member.clone())
    }

    /// Client address of a member, if known.
    pub fn address_of(&self, id: &MemberId) -> Option<String> {
        self.entries.get(id).map(|e| e.advert.member.client_addr.clone())
    }

    /// Bus address of a member, if known.
    pub fn bus_address_of(&self, id: &MemberId) -> Option<String> {
        self.entries.get(id).map(|e| e.advert.member.bus_addr.clone())
    }

    fn sorted(&self, filter: impl Fn(&MemberEntry) -> bool) -> Vec<ClusterMember> {
        let mut members: Vec<ClusterMember> = self
            .entries
            .iter()
            .filter(|e| filter(e.value()))
            .map(|e| e.advert.member.clone())
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    /// A consistent snapshot of every known member, split by kind.
    pub fn members(&self) -> Cluster {
        let mut cluster = Cluster::default();
        for member in self.sorted(|_| true) {
            match member.kind {
                MemberKind::Core => cluster.core.push(member),
                MemberKind::Edge => cluster.edge.push(member),
            }
        }
        cluster
    }

    /// Core members only. Edge members never vote.
    pub fn voters(&self) -> Vec<ClusterMember> {
        self.sorted(|e| e.advert.member.is_core())
    }

    /// Members heard from within `member_timeout`, core or edge, in id order.
    pub fn reachable(&self) -> Vec<ClusterMember> {
        let now = Instant::now();
        self.sorted(|e| {
            e.flags.contains(MemberFlags::MYSELF)
                || (!e.flags.contains(MemberFlags::STALE)
                    && now.duration_since(e.refreshed) <= self.member_timeout)
        })
    }

    /// Any core member whose last advert claims `role`.
    pub fn member_with_role(&self, role: Role) -> Option<ClusterMember> {
        self.sorted(|e| {
            e.advert.member.is_core()
                && e.advert.role == role
                && !e.flags.contains(MemberFlags::STALE)
        })
        .into_iter()
        .next()
    }

    /// The leader named by the freshest, highest-term advert. Diagnostic only.
    pub fn leader_hint(&self) -> Option<MemberId> {
        self.entries
            .iter()
            .filter(|e| !e.flags.contains(MemberFlags::STALE) && e.advert.leader.is_some())
            .max_by_key(|e| e.advert.term)
            .and_then(|e| e.advert.leader.clone())
    }

    /// Age of the oldest refresh among other members.
    pub fn staleness(&self) -> Duration {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| !e.flags.contains(MemberFlags::MYSELF))
            .map(|e| now.duration_since(e.refreshed))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Up to `max` adverts to piggyback on a gossip message, freshest first.
    pub fn sample_adverts(&self, max: usize) -> Vec<MemberAdvert> {
        let mut adverts: Vec<(Instant, MemberAdvert)> = self
            .entries
            .iter()
            .filter(|e| !e.flags.contains(MemberFlags::STALE) && e.advert.heartbeat > 0)
            .map(|e| (e.refreshed, e.advert.clone()))
            .collect();
        adverts.sort_by(|a, b| b.0.cmp(&a.0));
        adverts.into_iter().take(max).map(|(_, a)| a).collect()
    }

    /// Every other member, bootstrap seeds first.
    pub fn peers(&self) -> Vec<ClusterMember> {
        let mut peers: Vec<(bool, ClusterMember)> = self
            .entries
            .iter()
            .filter(|e| !e.flags.contains(MemberFlags::MYSELF))
            .map(|e| (!e.bootstrap, e.advert.member.clone()))
            .collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        peers.into_iter().map(|(_, m)| m).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, kind: MemberKind) -> ClusterMember {
        ClusterMember {
            id: MemberId::new(id),
            client_addr: format!("{id}:7687"),
            bus_addr: format!("{id}:17687"),
            kind,
        }
    }

    fn advert(id: &str, kind: MemberKind, role: Role, heartbeat: u64) -> MemberAdvert {
        MemberAdvert {
            member: member(id, kind),
            role,
            term: 1,
            leader: None,
            heartbeat,
        }
    }

    fn view() -> ClusterView {
        ClusterView::new(
            member("core-0", MemberKind::Core),
            [
                member("core-0", MemberKind::Core),
                member("core-1", MemberKind::Core),
                member("core-2", MemberKind::Core),
            ],
            Duration::from_millis(50),
        )
    }

    #[test]
    fn bootstrap_members_start_stale() {
        let view = view();
        assert_eq!(view.members().core.len(), 3);
        assert_eq!(view.reachable().len(), 1);
        assert_eq!(
            view.flags(&MemberId::new("core-1")),
            Some(MemberFlags::CORE | MemberFlags::STALE)
        );
        assert!(
            view.flags(&MemberId::new("core-0"))
                .is_some_and(|f| f.contains(MemberFlags::MYSELF))
        );
    }

    #[test]
    fn merge_accepts_only_newer_heartbeats() {
        let view = view();
        assert!(view.merge(advert("core-1", MemberKind::Core, Role::Leader, 10)));
        assert!(!view.merge(advert("core-1", MemberKind::Core, Role::Follower, 9)));
        assert_eq!(
            view.member_with_role(Role::Leader).map(|m| m.id),
            Some(MemberId::new("core-1"))
        );
        assert_eq!(view.reachable().len(), 2);
    }

    #[test]
    fn edge_members_never_hold_roles_or_vote() {
        let view = view();
        assert!(view.merge(advert("edge-0", MemberKind::Edge, Role::Leader, 1)));
        assert_eq!(view.member_with_role(Role::Leader), None);
        assert_eq!(view.voters().len(), 3);
        assert_eq!(view.members().edge.len(), 1);
        assert_eq!(view.members().quorum(), 2);
    }

    #[test]
    fn adverts_about_myself_are_ignored() {
        let view = view();
        assert!(!view.merge(advert("core-0", MemberKind::Core, Role::Leader, u64::MAX)));
        let local = view.update_local(Role::Candidate, 3, None);
        assert_eq!(local.role, Role::Candidate);
        assert_eq!(view.local_advert(), Some(local));
    }

    #[test]
    fn expiry_flags_then_removes_discovered_members() {
        let view = view();
        view.merge(advert("edge-0", MemberKind::Edge, Role::Follower, 1));
        view.merge(advert("core-1", MemberKind::Core, Role::Follower, 1));

        std::thread::sleep(Duration::from_millis(60));
        assert!(view.expire().is_empty());
        assert!(
            view.flags(&MemberId::new("edge-0"))
                .is_some_and(|f| f.contains(MemberFlags::STALE))
        );
        assert!(view.staleness() >= Duration::from_millis(50));

        std::thread::sleep(Duration::from_millis(50));
        let removed = view.expire();
        assert_eq!(removed, vec![MemberId::new("edge-0")]);
        // Bootstrap core members stay, only flagged.
        assert!(view.member(&MemberId::new("core-1")).is_some());
        assert_eq!(view.reachable().len(), 1);
    }

    #[test]
    fn leader_hint_prefers_highest_term() {
        let view = view();
        let mut old = advert("core-1", MemberKind::Core, Role::Leader, 5);
        old.leader = Some(MemberId::new("core-1"));
        let mut new = advert("core-2", MemberKind::Core, Role::Leader, 5);
        new.term = 2;
        new.leader = Some(MemberId::new("core-2"));
        view.merge(old);
        view.merge(new);
        assert_eq!(view.leader_hint(), Some(MemberId::new("core-2")));
    }
}
