//! Core types for wgtun
//!
//! The entity graph is owned top-down: an interface owns its peers by value
//! and a peer owns its allowed addresses. Peers refer back to their interface
//! by id only.

use crate::{Error, Result};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

pub type InterfaceId = i64;
pub type PeerId = i64;
pub type AddressId = i64;

/// Placeholder shown instead of secret material in debug output
const REDACTED: &str = "<redacted>";

/// IP protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "6")]
    V6,
}

impl IpVersion {
    pub fn of(network: &IpNetwork) -> Self {
        match network {
            IpNetwork::V4(_) => IpVersion::V4,
            IpNetwork::V6(_) => IpVersion::V6,
        }
    }

    /// Flag understood by `ip -4` / `ip -6`
    pub fn ip_flag(&self) -> &'static str {
        match self {
            IpVersion::V4 => "-4",
            IpVersion::V6 => "-6",
        }
    }
}

impl std::fmt::Display for IpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "4"),
            IpVersion::V6 => write!(f, "6"),
        }
    }
}

/// Address families configured on an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpStack {
    #[serde(rename = "IPV4")]
    Ipv4,
    #[serde(rename = "IPV6")]
    Ipv6,
    #[serde(rename = "DUAL")]
    Dual,
}

impl IpStack {
    pub fn from_presence(ipv4: bool, ipv6: bool) -> Option<Self> {
        match (ipv4, ipv6) {
            (true, true) => Some(IpStack::Dual),
            (true, false) => Some(IpStack::Ipv4),
            (false, true) => Some(IpStack::Ipv6),
            (false, false) => None,
        }
    }
}

impl std::fmt::Display for IpStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpStack::Ipv4 => write!(f, "IPV4"),
            IpStack::Ipv6 => write!(f, "IPV6"),
            IpStack::Dual => write!(f, "DUAL"),
        }
    }
}

/// Kernel-level tunnel state as reported by `wg show`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    Active,
    Inactive,
}

impl std::fmt::Display for TunnelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelState::Active => write!(f, "active"),
            TunnelState::Inactive => write!(f, "inactive"),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// WireGuard interface with its owned address stacks and peers
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WgInterface {
    pub id: InterfaceId,
    pub name: String,
    pub private_key: String,
    pub port: Option<u16>,
    pub ipv4: Option<InterfaceIpv4>,
    pub ipv6: Option<InterfaceIpv6>,
    #[serde(default)]
    pub peers: Vec<WgPeer>,
}

impl WgInterface {
    /// Derived stack classification, `None` when no address is configured
    pub fn ip_stack(&self) -> Option<IpStack> {
        IpStack::from_presence(self.ipv4.is_some(), self.ipv6.is_some())
    }

    pub fn peer(&self, id: PeerId) -> Option<&WgPeer> {
        self.peers.iter().find(|p| p.id == id)
    }
}

impl std::fmt::Debug for WgInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgInterface")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("private_key", &REDACTED)
            .field("port", &self.port)
            .field("ipv4", &self.ipv4)
            .field("ipv6", &self.ipv6)
            .field("peers", &self.peers)
            .finish()
    }
}

/// IPv4 address of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceIpv4 {
    pub id: i64,
    pub address: Ipv4Network,
}

/// IPv6 address of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceIpv6 {
    pub id: i64,
    pub address: Ipv6Network,
}

/// WireGuard peer of an interface
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WgPeer {
    pub id: PeerId,
    pub interface_id: InterfaceId,
    pub public_key: String,
    pub psk: Option<String>,
    pub keepalive: u32,
    pub endpoint: String,
    pub port: u16,
    #[serde(default)]
    pub addresses: Vec<PeerAddress>,
}

impl WgPeer {
    /// Addresses of a single IP version, in id order
    pub fn addresses_of(&self, version: IpVersion) -> impl Iterator<Item = &PeerAddress> {
        self.addresses
            .iter()
            .filter(move |a| a.ip_version() == version)
    }

    /// Pre-shared key, treating an empty string as absent
    pub fn preshared_key(&self) -> Option<&str> {
        self.psk.as_deref().filter(|psk| !psk.is_empty())
    }
}

impl std::fmt::Debug for WgPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgPeer")
            .field("id", &self.id)
            .field("interface_id", &self.interface_id)
            .field("public_key", &self.public_key)
            .field("psk", &self.psk.as_ref().map(|_| REDACTED))
            .field("keepalive", &self.keepalive)
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .field("addresses", &self.addresses)
            .finish()
    }
}

/// Allowed address of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub id: AddressId,
    pub network: IpNetwork,
}

impl PeerAddress {
    pub fn ip_version(&self) -> IpVersion {
        IpVersion::of(&self.network)
    }

    pub fn canonical(&self) -> String {
        canonical_form(&self.network)
    }
}

/// Canonical textual form used to compare addresses
pub fn canonical_form(network: &IpNetwork) -> String {
    network.to_string()
}

// ============================================================================
// Requests
// ============================================================================

/// Address and prefix length pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSpec<A> {
    pub address: A,
    pub prefix: u8,
}

pub type Ipv4Spec = AddressSpec<Ipv4Addr>;
pub type Ipv6Spec = AddressSpec<Ipv6Addr>;

impl AddressSpec<Ipv4Addr> {
    pub fn new(address: Ipv4Addr, prefix: u8) -> Self {
        Self { address, prefix }
    }

    pub fn to_network(&self) -> Result<Ipv4Network> {
        Ipv4Network::new(self.address, self.prefix).map_err(|e| {
            Error::InvalidConfig(format!("{}/{}: {}", self.address, self.prefix, e))
        })
    }
}

impl AddressSpec<Ipv6Addr> {
    pub fn new(address: Ipv6Addr, prefix: u8) -> Self {
        Self { address, prefix }
    }

    pub fn to_network(&self) -> Result<Ipv6Network> {
        Ipv6Network::new(self.address, self.prefix).map_err(|e| {
            Error::InvalidConfig(format!("{}/{}: {}", self.address, self.prefix, e))
        })
    }
}

/// Interface payload used by both create and edit
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceRequest {
    pub name: String,
    pub private_key: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub ipv4: Option<Ipv4Spec>,
    #[serde(default)]
    pub ipv6: Option<Ipv6Spec>,
}

pub type CreateInterfaceRequest = InterfaceRequest;
pub type EditInterfaceRequest = InterfaceRequest;

impl std::fmt::Debug for InterfaceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceRequest")
            .field("name", &self.name)
            .field("private_key", &REDACTED)
            .field("port", &self.port)
            .field("ipv4", &self.ipv4)
            .field("ipv6", &self.ipv6)
            .finish()
    }
}

/// Allowed addresses of a peer, split per IP version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedIps {
    #[serde(default)]
    pub ipv4: Vec<Ipv4Spec>,
    #[serde(default)]
    pub ipv6: Vec<Ipv6Spec>,
}

impl AllowedIps {
    /// Desired networks of one IP version
    pub fn networks(&self, version: IpVersion) -> Result<Vec<IpNetwork>> {
        match version {
            IpVersion::V4 => self
                .ipv4
                .iter()
                .map(|spec| spec.to_network().map(IpNetwork::V4))
                .collect(),
            IpVersion::V6 => self
                .ipv6
                .iter()
                .map(|spec| spec.to_network().map(IpNetwork::V6))
                .collect(),
        }
    }
}

/// Payload of peer creation
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePeerRequest {
    pub public_key: String,
    #[serde(default)]
    pub psk: Option<String>,
    pub keepalive: u32,
    pub endpoint: String,
    pub port: u16,
    #[serde(rename = "allowedIPs", default)]
    pub allowed_ips: AllowedIps,
}

impl std::fmt::Debug for CreatePeerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatePeerRequest")
            .field("public_key", &self.public_key)
            .field("psk", &self.psk.as_ref().map(|_| REDACTED))
            .field("keepalive", &self.keepalive)
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .field("allowed_ips", &self.allowed_ips)
            .finish()
    }
}

/// Payload of peer modification
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyPeerRequest {
    #[serde(default)]
    pub id: Option<PeerId>,
    pub public_key: String,
    #[serde(default)]
    pub psk: Option<String>,
    pub keepalive: u32,
    pub endpoint: String,
    pub port: u16,
    #[serde(rename = "allowedIPs", default)]
    pub allowed_ips: AllowedIps,
    #[serde(default)]
    pub tunnel_id: Option<InterfaceId>,
}

impl ModifyPeerRequest {
    /// Modification request mirroring the current state of a peer
    pub fn from_peer(peer: &WgPeer) -> Self {
        let mut allowed_ips = AllowedIps::default();
        for addr in &peer.addresses {
            match addr.network {
                IpNetwork::V4(net) => allowed_ips.ipv4.push(Ipv4Spec::new(net.ip(), net.prefix())),
                IpNetwork::V6(net) => allowed_ips.ipv6.push(Ipv6Spec::new(net.ip(), net.prefix())),
            }
        }
        Self {
            id: Some(peer.id),
            public_key: peer.public_key.clone(),
            psk: peer.psk.clone(),
            keepalive: peer.keepalive,
            endpoint: peer.endpoint.clone(),
            port: peer.port,
            allowed_ips,
            tunnel_id: Some(peer.interface_id),
        }
    }
}

impl std::fmt::Debug for ModifyPeerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModifyPeerRequest")
            .field("id", &self.id)
            .field("public_key", &self.public_key)
            .field("psk", &self.psk.as_ref().map(|_| REDACTED))
            .field("keepalive", &self.keepalive)
            .field("endpoint", &self.endpoint)
            .field("port", &self.port)
            .field("allowed_ips", &self.allowed_ips)
            .field("tunnel_id", &self.tunnel_id)
            .finish()
    }
}

// ============================================================================
// Views
// ============================================================================

/// Interface listing item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceSummary {
    pub id: InterfaceId,
    pub name: String,
    pub active: bool,
    pub enabled: bool,
    pub stack: Option<IpStack>,
}

/// Interface together with the public key derived from its private key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceDetail {
    #[serde(flatten)]
    pub interface: WgInterface,
    pub public_key: String,
}

/// WireGuard key pair, base64 encoded
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &REDACTED)
            .field("public_key", &self.public_key)
            .finish()
    }
}
