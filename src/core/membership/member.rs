// src/core/membership/member.rs

//! Member descriptors, advertisements and flags.

use crate::core::consensus::{MemberId, Role, Term};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a member takes part in consensus.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    /// Votes, replicates and answers routing requests.
    Core,
    /// A read replica. Never votes and never routes.
    Edge,
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKind::Core => f.write_str("core"),
            MemberKind::Edge => f.write_str("edge"),
        }
    }
}

/// The static identity of a member and where to reach it.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct ClusterMember {
    pub id: MemberId,
    /// Address clients connect to.
    pub client_addr: String,
    /// Address of the cluster bus.
    pub bus_addr: String,
    pub kind: MemberKind,
}

impl ClusterMember {
    pub fn is_core(&self) -> bool {
        self.kind == MemberKind::Core
    }
}

/// What a member says about itself on the discovery gossip. `heartbeat` only
/// ever grows for a given member, so a receiver can discard older adverts.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub struct MemberAdvert {
    pub member: ClusterMember,
    pub role: Role,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub heartbeat: u64,
}

bitflags! {
    /// Flags describing how this member sees an entry of the view.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemberFlags: u8 {
        const MYSELF = 1 << 0;
        const CORE   = 1 << 1;
        const EDGE   = 1 << 2;
        const STALE  = 1 << 3;
    }
}

impl MemberFlags {
    pub fn for_kind(kind: MemberKind) -> Self {
        match kind {
            MemberKind::Core => MemberFlags::CORE,
            MemberKind::Edge => MemberFlags::EDGE,
        }
    }
}

/// A snapshot of the membership split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub core: Vec<ClusterMember>,
    pub edge: Vec<ClusterMember>,
}

impl Cluster {
    /// Votes needed for a majority of the core members.
    pub fn quorum(&self) -> usize {
        self.core.len() / 2 + 1
    }

    pub fn len(&self) -> usize {
        self.core.len() + self.edge.len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty() && self.edge.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &ClusterMember> {
        self.core.iter().chain(self.edge.iter())
    }
}
