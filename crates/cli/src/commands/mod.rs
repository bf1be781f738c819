//! CLI Commands

pub mod interface;
pub mod keys;
pub mod peer;
pub mod tunnel;

use anyhow::Context;
use ipnetwork::IpNetwork;
use wgtun_common::{AllowedIps, Ipv4Spec, Ipv6Spec, WgInterface};
use wgtun_engine::Engine;

/// Parse `address/prefix`
pub fn parse_network(value: &str) -> Result<IpNetwork, String> {
    let (addr, prefix) = value
        .split_once('/')
        .ok_or_else(|| format!("expected ADDRESS/PREFIX, got {}", value))?;
    let addr = addr
        .parse()
        .map_err(|_| format!("invalid IP address {}", addr))?;
    let prefix = prefix
        .parse()
        .map_err(|_| format!("invalid prefix length {}", prefix))?;
    IpNetwork::new(addr, prefix).map_err(|e| e.to_string())
}

pub fn parse_ipv4(value: &str) -> Result<Ipv4Spec, String> {
    match parse_network(value)? {
        IpNetwork::V4(net) => Ok(Ipv4Spec::new(net.ip(), net.prefix())),
        IpNetwork::V6(_) => Err(format!("{} is not an IPv4 network", value)),
    }
}

pub fn parse_ipv6(value: &str) -> Result<Ipv6Spec, String> {
    match parse_network(value)? {
        IpNetwork::V6(net) => Ok(Ipv6Spec::new(net.ip(), net.prefix())),
        IpNetwork::V4(_) => Err(format!("{} is not an IPv6 network", value)),
    }
}

/// Split a mixed list of networks by IP version
pub fn allowed_ips(networks: &[IpNetwork]) -> AllowedIps {
    let mut allowed = AllowedIps::default();
    for network in networks {
        match network {
            IpNetwork::V4(net) => allowed.ipv4.push(Ipv4Spec::new(net.ip(), net.prefix())),
            IpNetwork::V6(net) => allowed.ipv6.push(Ipv6Spec::new(net.ip(), net.prefix())),
        }
    }
    allowed
}

/// Look an interface up by name, falling back to its numeric id
pub fn find_interface(engine: &Engine, reference: &str) -> anyhow::Result<WgInterface> {
    match engine.interfaces.get_interface_by_name(reference) {
        Ok(iface) => Ok(iface),
        Err(e) if e.is_not_found() => match reference.parse::<i64>() {
            Ok(id) => engine
                .interfaces
                .get_interface(id)
                .with_context(|| format!("No interface named or numbered {}", reference)),
            Err(_) => Err(e).with_context(|| format!("No interface named {}", reference)),
        },
        Err(e) => Err(e.into()),
    }
}
