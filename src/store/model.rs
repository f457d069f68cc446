//! Entity types owned by the data store.
//!
//! These mirror the rows the compiler and the oracle read. Field names follow
//! the store's column names so snapshots stay readable by hand.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Protocol layer a listener is bound at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenKind {
    /// TCP/TLS layer, routed by SNI.
    Stream,
    /// HTTP virtual hosting, routed by Host header.
    Http,
}

/// Which access list an enabled address check consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressCheckMode {
    #[default]
    Blacklist,
    Whitelist,
}

/// A bound port plus protocol kind and admission policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub id: u32,
    /// Signed to match the store column; validated when a server block is built.
    pub listen_port: i32,
    pub kind: ListenKind,
    #[serde(default)]
    pub enable_address_check: bool,
    #[serde(default)]
    pub address_check_mode: AddressCheckMode,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: u32,
    pub name: String,
}

/// Where a stream route forwards matched connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    #[default]
    Upstream,
    /// Loop back into another local listener.
    Listen,
    SshLocal,
    SshRemote,
}

/// Direction of an ssh-remote tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SshTunnelDirection {
    #[default]
    None,
    In,
    Out,
}

/// Load-balancing tag carried on a stream route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancingAlgorithm {
    #[default]
    None,
    RoundRobin,
    LeastConn,
    IpHash,
    Random,
}

impl BalancingAlgorithm {
    /// Directive emitted inside an upstream block, if any.
    ///
    /// Round robin is the proxy's implicit default and needs no directive.
    pub fn directive(&self) -> Option<&'static str> {
        match self {
            BalancingAlgorithm::None | BalancingAlgorithm::RoundRobin => None,
            BalancingAlgorithm::LeastConn => Some("least_conn"),
            BalancingAlgorithm::IpHash => Some("ip_hash"),
            BalancingAlgorithm::Random => Some("random"),
        }
    }
}

/// SNI-routed stream destination for a domain on a listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRoute {
    pub id: u32,
    pub domain_id: u32,
    pub listen_id: u32,
    #[serde(default)]
    pub destination_type: DestinationType,
    #[serde(default)]
    pub destination_listen_id: u32,
    #[serde(default)]
    pub destination_address: String,
    #[serde(default)]
    pub destination_port: u16,
    /// Ordering hint within a listener.
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub load_balancing_algorithm: BalancingAlgorithm,
    /// Namespaces the upstream group name; empty means none.
    #[serde(default)]
    pub alias_name: String,
    /// Catch-all for its listener.
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub ssh_tunnel: SshTunnelDirection,
    #[serde(default)]
    pub ssh_port_id: u32,
}

/// Maps a virtual host name to an HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRoute {
    pub id: u32,
    pub domain_id: u32,
    pub listen_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshPort {
    pub id: u32,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: u32,
    pub ip: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub last_update: u64,
    #[serde(default)]
    pub last_block: u64,
    #[serde(default)]
    pub count_block: u64,
    #[serde(default)]
    pub ip_location_id: Option<u32>,
    #[serde(default)]
    pub description: String,
    /// Entry came from an external feed rather than an administrator.
    #[serde(default)]
    pub is_imported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub id: u32,
    pub ip: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub last_access: u64,
    #[serde(default)]
    pub count_access: u64,
    #[serde(default)]
    pub description: String,
}

/// Current time as seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Canonical textual form of an address, used as the access-list key.
///
/// Returns `None` for anything that does not parse as an IPv4/IPv6 address.
pub fn canonical_ip(raw: &str) -> Option<String> {
    raw.trim().parse::<IpAddr>().ok().map(|ip| ip.to_string())
}
