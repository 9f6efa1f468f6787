// src/config.rs

//! Manages member configuration: loading, resolving derived values, and validation.

use crate::core::bus::{DATAGRAM_HEADROOM, MAX_DATAGRAM_SIZE};
use crate::core::consensus::{ENTRY_OVERHEAD, MachineConfig, MemberId};
use crate::core::membership::{ClusterMember, MemberKind};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Timing and sizing of the raft engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout.
    #[serde(default = "default_election_timeout_min", with = "humantime_serde")]
    pub election_timeout_min: Duration,
    /// Upper bound of the randomized election timeout.
    #[serde(default = "default_election_timeout_max", with = "humantime_serde")]
    pub election_timeout_max: Duration,
    /// How often a leader sends AppendEntries and checks its lease.
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Heartbeat rounds without majority acknowledgement before a leader steps down.
    #[serde(default = "default_lease_rounds")]
    pub lease_rounds: u32,
    #[serde(default = "default_max_append_entries")]
    pub max_append_entries: usize,
    /// Entry bytes per AppendEntries. Also bounds a single command, since
    /// every AppendEntries must fit in one bus datagram.
    #[serde(default = "default_max_append_bytes")]
    pub max_append_bytes: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: default_election_timeout_min(),
            election_timeout_max: default_election_timeout_max(),
            heartbeat_interval: default_heartbeat_interval(),
            lease_rounds: default_lease_rounds(),
            max_append_entries: default_max_append_entries(),
            max_append_bytes: default_max_append_bytes(),
        }
    }
}

impl RaftConfig {
    pub fn machine(&self) -> MachineConfig {
        MachineConfig {
            lease_rounds: self.lease_rounds,
            max_append_entries: self.max_append_entries,
            max_append_bytes: self.max_append_bytes,
        }
    }
}

fn default_election_timeout_min() -> Duration {
    Duration::from_millis(300)
}
fn default_election_timeout_max() -> Duration {
    Duration::from_millis(600)
}
fn default_heartbeat_interval() -> Duration {
    Duration::from_millis(75)
}
fn default_lease_rounds() -> u32 {
    4
}
fn default_max_append_entries() -> usize {
    64
}
fn default_max_append_bytes() -> usize {
    32 * 1024
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoutingConfig {
    /// How long a write-routing request waits for a leader to be known.
    #[serde(default = "default_routing_timeout", with = "humantime_serde")]
    pub routing_timeout: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            routing_timeout: default_routing_timeout(),
        }
    }
}

fn default_routing_timeout() -> Duration {
    Duration::from_secs(5)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_gossip_interval", with = "humantime_serde")]
    pub gossip_interval: Duration,
    /// Age after which a view entry is flagged stale; removal happens at twice this.
    #[serde(default = "default_member_timeout", with = "humantime_serde")]
    pub member_timeout: Duration,
    /// Maximum adverts carried by a single ping or pong.
    #[serde(default = "default_gossip_fanout")]
    pub gossip_fanout: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            gossip_interval: default_gossip_interval(),
            member_timeout: default_member_timeout(),
            gossip_fanout: default_gossip_fanout(),
        }
    }
}

fn default_gossip_interval() -> Duration {
    Duration::from_millis(500)
}
fn default_member_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_gossip_fanout() -> usize {
    10
}

/// A member of the static bootstrap list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SeedMember {
    pub id: String,
    pub kind: MemberKind,
    pub address: String,
    pub bus_address: String,
}

impl SeedMember {
    pub fn to_member(&self) -> ClusterMember {
        ClusterMember {
            id: MemberId::new(self.id.clone()),
            client_addr: self.address.clone(),
            bus_addr: self.bus_address.clone(),
            kind: self.kind,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ClusterConfig {
    /// The fixed core membership plus any known edge members.
    #[serde(default)]
    pub members: Vec<SeedMember>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    8878
}

/// A raw representation of the config file before resolution.
#[derive(Deserialize)]
struct RawConfig {
    member_id: Option<String>,
    #[serde(default = "default_kind")]
    kind: MemberKind,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    announce_host: Option<String>,
    announce_bus_port: Option<u16>,
    #[serde(default = "default_bus_port_offset")]
    bus_port_offset: u16,
    password: Option<String>,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default)]
    raft: RaftConfig,
    #[serde(default)]
    routing: RoutingConfig,
    #[serde(default)]
    discovery: DiscoveryConfig,
    #[serde(default)]
    cluster: ClusterConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_kind() -> MemberKind {
    MemberKind::Core
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7687
}
fn default_bus_port_offset() -> u16 {
    10000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10000
}

/// The resolved configuration of one member.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub member_id: MemberId,
    pub kind: MemberKind,
    pub host: String,
    pub port: u16,
    /// Host other members and clients should use to reach us.
    pub announce_host: Option<String>,
    pub bus_port: u16,
    /// Cluster bus HMAC key. Without one, bus messages are unsigned.
    pub password: Option<String>,
    pub log_level: String,
    pub max_clients: usize,
    pub raft: RaftConfig,
    pub routing: RoutingConfig,
    pub discovery: DiscoveryConfig,
    pub cluster: ClusterConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        let port = default_port();
        Self {
            member_id: MemberId::random(),
            kind: default_kind(),
            host: default_host(),
            port,
            announce_host: None,
            bus_port: port + default_bus_port_offset(),
            password: None,
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            raft: RaftConfig::default(),
            routing: RoutingConfig::default(),
            discovery: DiscoveryConfig::default(),
            cluster: ClusterConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Loads, resolves and validates the configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid configuration in '{path}'"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents).context("Failed to parse TOML")?;

        let bus_port = match raw.announce_bus_port {
            Some(port) => port,
            None => raw
                .port
                .checked_add(raw.bus_port_offset)
                .ok_or_else(|| anyhow!("port + bus_port_offset overflows"))?,
        };

        let config = Config {
            member_id: raw
                .member_id
                .map(MemberId::new)
                .unwrap_or_else(MemberId::random),
            kind: raw.kind,
            host: raw.host,
            port: raw.port,
            announce_host: raw.announce_host,
            bus_port,
            password: raw.password,
            log_level: raw.log_level,
            max_clients: raw.max_clients,
            raft: raw.raft,
            routing: raw.routing,
            discovery: raw.discovery,
            cluster: raw.cluster,
            metrics: raw.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    fn advertised_host(&self) -> &str {
        self.announce_host.as_deref().unwrap_or(&self.host)
    }

    pub fn client_addr(&self) -> String {
        format!("{}:{}", self.advertised_host(), self.port)
    }

    pub fn bus_addr(&self) -> String {
        format!("{}:{}", self.advertised_host(), self.bus_port)
    }

    /// This member as it appears in views and routing tables.
    pub fn myself(&self) -> ClusterMember {
        ClusterMember {
            id: self.member_id.clone(),
            client_addr: self.client_addr(),
            bus_addr: self.bus_addr(),
            kind: self.kind,
        }
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.bus_port == self.port {
            return Err(anyhow!("the cluster bus port cannot equal the client port"));
        }

        let raft = &self.raft;
        if raft.heartbeat_interval.is_zero() {
            return Err(anyhow!("raft.heartbeat_interval cannot be 0"));
        }
        if raft.heartbeat_interval >= raft.election_timeout_min {
            return Err(anyhow!(
                "raft.heartbeat_interval ({:?}) must be shorter than raft.election_timeout_min ({:?})",
                raft.heartbeat_interval,
                raft.election_timeout_min
            ));
        }
        if raft.election_timeout_min > raft.election_timeout_max {
            return Err(anyhow!(
                "raft.election_timeout_min ({:?}) cannot exceed raft.election_timeout_max ({:?})",
                raft.election_timeout_min,
                raft.election_timeout_max
            ));
        }
        if raft.election_timeout_max >= self.routing.routing_timeout {
            return Err(anyhow!(
                "routing.routing_timeout ({:?}) must be longer than raft.election_timeout_max ({:?})",
                self.routing.routing_timeout,
                raft.election_timeout_max
            ));
        }
        if raft.lease_rounds == 0 {
            return Err(anyhow!("raft.lease_rounds cannot be 0"));
        }
        if raft.max_append_entries == 0 {
            return Err(anyhow!("raft.max_append_entries cannot be 0"));
        }
        if raft.max_append_bytes <= ENTRY_OVERHEAD {
            return Err(anyhow!(
                "raft.max_append_bytes must be larger than {} bytes",
                ENTRY_OVERHEAD
            ));
        }
        if raft.max_append_bytes + DATAGRAM_HEADROOM > MAX_DATAGRAM_SIZE {
            return Err(anyhow!(
                "raft.max_append_bytes ({}) cannot exceed {} bytes: AppendEntries must fit in one bus datagram",
                raft.max_append_bytes,
                MAX_DATAGRAM_SIZE - DATAGRAM_HEADROOM
            ));
        }

        if self.discovery.gossip_interval >= self.discovery.member_timeout {
            return Err(anyhow!(
                "discovery.gossip_interval must be shorter than discovery.member_timeout"
            ));
        }
        if self.discovery.gossip_fanout == 0 {
            return Err(anyhow!("discovery.gossip_fanout cannot be 0"));
        }

        let mut ids = HashSet::new();
        for seed in &self.cluster.members {
            if !ids.insert(seed.id.as_str()) {
                return Err(anyhow!("duplicate member id '{}' in cluster.members", seed.id));
            }
            if seed.id == self.member_id.as_str() && seed.kind != self.kind {
                return Err(anyhow!(
                    "cluster.members lists '{}' as {:?} but this member is {:?}",
                    seed.id,
                    seed.kind,
                    self.kind
                ));
            }
        }
        let cores = self
            .cluster
            .members
            .iter()
            .filter(|m| m.kind == MemberKind::Core)
            .count();
        if cores > 0 && cores % 2 == 0 {
            warn!(
                "cluster.members lists an even number of core members ({}). An odd core tolerates the same failures with one member less.",
                cores
            );
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port || self.metrics.port == self.bus_port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the client or bus port"
                ));
            }
        }

        Ok(())
    }
}
