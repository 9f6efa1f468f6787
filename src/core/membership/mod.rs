// src/core/membership/mod.rs

//! The cluster membership view and the discovery gossip that keeps it fresh.

pub mod discovery;
pub mod member;
pub mod view;

pub use discovery::{Discovery, DiscoveryMessage};
pub use member::{Cluster, ClusterMember, MemberAdvert, MemberFlags, MemberKind};
pub use view::{ClusterView, MemberEntry, now_ms};
