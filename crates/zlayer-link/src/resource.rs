//! Declarative network resources
//!
//! The link controller does not touch kernel state. It publishes a link
//! spec and an address spec that a network configuration engine converges
//! toward, and reads the network status that engine reports.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Namespace holding observed network state
pub const NETWORK_NAMESPACE: &str = "network";

/// Namespace holding requested network configuration
pub const NETWORK_CONFIG_NAMESPACE: &str = "network-config";

/// Well-known id of the network status resource
pub const NETWORK_STATUS_ID: &str = "status";

/// Link kind for WireGuard interfaces
pub const WIREGUARD_KIND: &str = "wireguard";

/// Resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    NetworkStatus,
    LinkSpec,
    AddressSpec,
}

impl ResourceKind {
    /// Stable name used in keys and on disk
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::NetworkStatus => "NetworkStatus",
            ResourceKind::LinkSpec => "LinkSpec",
            ResourceKind::AddressSpec => "AddressSpec",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a resource in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub kind: ResourceKind,
    pub id: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            id: id.into(),
        }
    }

    /// Key of the network status resource
    pub fn network_status() -> Self {
        Self::new(NETWORK_NAMESPACE, ResourceKind::NetworkStatus, NETWORK_STATUS_ID)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.id)
    }
}

/// Configuration layer a spec was produced by
///
/// Specs for the same object from different layers are kept side by side;
/// the network engine merges them in layer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLayer {
    #[default]
    Default,
    Cmdline,
    Platform,
    Operator,
    Configuration,
}

impl ConfigLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigLayer::Default => "default",
            ConfigLayer::Cmdline => "cmdline",
            ConfigLayer::Platform => "platform",
            ConfigLayer::Operator => "operator",
            ConfigLayer::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prefix `id` with the layer that owns it
pub fn layered_id(layer: ConfigLayer, id: &str) -> String {
    format!("{layer}/{id}")
}

/// Id of a link spec
pub fn link_id(link_name: &str) -> String {
    link_name.to_string()
}

/// Id of an address spec
pub fn address_id(link_name: &str, address: &IpNet) -> String {
    format!("{link_name}/{address}")
}

/// Observed network readiness
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatusSpec {
    #[serde(default)]
    pub address_ready: bool,
    #[serde(default)]
    pub connectivity_ready: bool,
    #[serde(default)]
    pub hostname_ready: bool,
    #[serde(default)]
    pub etc_files_ready: bool,
}

/// Link type as the kernel reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// Type left for the kernel to decide (used for logical links)
    #[default]
    None,
    Ether,
    Loopback,
}

/// Requested network link
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub name: String,
    /// Created by software rather than backed by a physical device
    pub logical: bool,
    pub up: bool,
    pub kind: String,
    #[serde(rename = "type")]
    pub link_type: LinkType,
    pub config_layer: ConfigLayer,
    #[serde(default)]
    pub wireguard: WireguardSpec,
}

/// WireGuard settings of a link
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireguardSpec {
    pub private_key: String,
    #[serde(default)]
    pub listen_port: u16,
    #[serde(default)]
    pub firewall_mark: u32,
    #[serde(default)]
    pub peers: Vec<WireguardPeer>,
}

impl WireguardSpec {
    /// Put peers and their allowed IPs in a stable order
    ///
    /// Two specs with the same content compare and serialize equal after
    /// sorting regardless of the order peers were added in.
    pub fn sort(&mut self) {
        self.peers.sort_by(|a, b| a.public_key.cmp(&b.public_key));

        for peer in &mut self.peers {
            peer.allowed_ips.sort();
        }
    }
}

/// WireGuard peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireguardPeer {
    pub public_key: String,
    #[serde(default)]
    pub preshared_key: String,
    pub endpoint: String,
    #[serde(default)]
    pub persistent_keepalive_interval: Duration,
    pub allowed_ips: Vec<IpNet>,
}

impl WireguardPeer {
    /// Render as a `wg` config block
    pub fn to_wg_config(&self) -> String {
        let allowed_ips: Vec<String> = self.allowed_ips.iter().map(ToString::to_string).collect();

        format!(
            "[Peer]\n\
             PublicKey = {}\n\
             Endpoint = {}\n\
             AllowedIPs = {}\n\
             PersistentKeepalive = {}\n",
            self.public_key,
            self.endpoint,
            allowed_ips.join(", "),
            self.persistent_keepalive_interval.as_secs()
        )
    }
}

/// Address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Inet4,
    #[default]
    Inet6,
}

/// Address scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressScope {
    #[default]
    Global,
    Site,
    Link,
    Host,
}

/// Address flags (subset of `IFA_F_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressFlags(u32);

impl AddressFlags {
    pub const NODAD: Self = Self(0x02);
    pub const PERMANENT: Self = Self(0x80);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for AddressFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Requested address assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSpec {
    pub address: IpNet,
    pub link_name: String,
    pub family: AddressFamily,
    pub scope: AddressScope,
    pub flags: AddressFlags,
    pub config_layer: ConfigLayer,
}

/// Typed payload of a stored resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ResourceSpec {
    NetworkStatus(NetworkStatusSpec),
    Link(LinkSpec),
    Address(AddressSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::NetworkStatus(_) => ResourceKind::NetworkStatus,
            ResourceSpec::Link(_) => ResourceKind::LinkSpec,
            ResourceSpec::Address(_) => ResourceKind::AddressSpec,
        }
    }

    pub fn as_network_status(&self) -> Option<&NetworkStatusSpec> {
        match self {
            ResourceSpec::NetworkStatus(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&LinkSpec> {
        match self {
            ResourceSpec::Link(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&AddressSpec> {
        match self {
            ResourceSpec::Address(spec) => Some(spec),
            _ => None,
        }
    }
}

/// A resource as held by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub key: ResourceKey,
    /// Bumped on every change of `spec`; starts at 1
    pub version: u64,
    #[serde(flatten)]
    pub spec: ResourceSpec,
}
