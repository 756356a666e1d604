//! Common types used across the lab tooling.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Unique identifier for a device in the testbed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection settings for one managed router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique identifier for this device (e.g. "R1").
    #[serde(rename = "name")]
    pub id: DeviceId,
    /// SSH hostname or management IP address.
    pub host: String,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// SSH username.
    pub user: String,
    /// Path to SSH private key.
    pub identity_file: String,
    /// Interface that carries the management address.
    #[serde(default = "default_management_interface")]
    pub management_interface: String,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_management_interface() -> String {
    "GigabitEthernet0/0".to_string()
}

/// One (device, interface) pair to be flapped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlapTarget {
    pub device: DeviceId,
    pub interface: String,
}

impl FlapTarget {
    pub fn new(device: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            device: DeviceId::new(device),
            interface: interface.into(),
        }
    }
}

impl std::fmt::Display for FlapTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.device, self.interface)
    }
}

/// OSPF neighbor adjacency state (RFC 2328 section 10.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjacencyState {
    Down,
    Attempt,
    Init,
    #[serde(rename = "2WAY")]
    TwoWay,
    #[serde(rename = "EXSTART")]
    ExStart,
    Exchange,
    Loading,
    Full,
}

impl AdjacencyState {
    pub fn is_full(self) -> bool {
        self == Self::Full
    }

    /// Parse the state part of an IOS neighbor entry ("FULL/  -", "2WAY/DROTHER").
    pub fn from_ios(raw: &str) -> Option<Self> {
        let state = raw.split('/').next().unwrap_or(raw).trim();
        match state.to_ascii_uppercase().as_str() {
            "DOWN" => Some(Self::Down),
            "ATTEMPT" => Some(Self::Attempt),
            "INIT" => Some(Self::Init),
            "2WAY" => Some(Self::TwoWay),
            "EXSTART" => Some(Self::ExStart),
            "EXCHANGE" => Some(Self::Exchange),
            "LOADING" => Some(Self::Loading),
            "FULL" => Some(Self::Full),
            _ => None,
        }
    }

    pub fn as_ios(self) -> &'static str {
        match self {
            Self::Down => "DOWN",
            Self::Attempt => "ATTEMPT",
            Self::Init => "INIT",
            Self::TwoWay => "2WAY",
            Self::ExStart => "EXSTART",
            Self::Exchange => "EXCHANGE",
            Self::Loading => "LOADING",
            Self::Full => "FULL",
        }
    }
}

impl std::fmt::Display for AdjacencyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ios())
    }
}

/// One row of `show ip ospf neighbor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborRecord {
    /// Remote router ID.
    pub router_id: Ipv4Addr,
    /// Local interface the adjacency is formed on (canonical long name).
    pub interface: String,
    pub state: AdjacencyState,
    /// Neighbor interface address.
    pub address: Ipv4Addr,
    pub priority: u8,
}

/// A neighbor table captured at a single instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NeighborSnapshot {
    pub neighbors: Vec<NeighborRecord>,
}

impl NeighborSnapshot {
    pub fn new(neighbors: Vec<NeighborRecord>) -> Self {
        Self { neighbors }
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn full_count(&self) -> usize {
        self.neighbors.iter().filter(|n| n.state.is_full()).count()
    }

    /// Neighbors learned over `interface` (long or short interface name).
    pub fn on_interface<'a>(&'a self, interface: &str) -> impl Iterator<Item = &'a NeighborRecord> {
        let wanted = canonical_interface_name(interface);
        self.neighbors
            .iter()
            .filter(move |n| canonical_interface_name(&n.interface) == wanted)
    }

    pub fn find(&self, router_id: Ipv4Addr, interface: &str) -> Option<&NeighborRecord> {
        self.on_interface(interface).find(|n| n.router_id == router_id)
    }

    pub fn is_full_on(&self, router_id: Ipv4Addr, interface: &str) -> bool {
        self.find(router_id, interface)
            .is_some_and(|n| n.state.is_full())
    }

    /// Whether every neighbor FULL in `baseline` is FULL here on the same interface.
    pub fn restores(&self, baseline: &NeighborSnapshot) -> bool {
        baseline
            .neighbors
            .iter()
            .filter(|n| n.state.is_full())
            .all(|n| self.is_full_on(n.router_id, &n.interface))
    }
}

const INTERFACE_ABBREVIATIONS: &[(&str, &str)] = &[
    ("GigabitEthernet", "Gi"),
    ("TenGigabitEthernet", "Te"),
    ("FastEthernet", "Fa"),
    ("Ethernet", "Et"),
    ("Loopback", "Lo"),
    ("Tunnel", "Tu"),
    ("Serial", "Se"),
];

/// Expand IOS short interface names ("Gi0/1" -> "GigabitEthernet0/1").
pub fn canonical_interface_name(name: &str) -> String {
    let name = name.trim();
    let split = name
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(name.len());
    let (prefix, rest) = name.split_at(split);
    for (long, short) in INTERFACE_ABBREVIATIONS {
        if prefix.eq_ignore_ascii_case(long) || prefix.eq_ignore_ascii_case(short) {
            return format!("{long}{rest}");
        }
    }
    name.to_string()
}
