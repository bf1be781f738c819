//! Hostname resolution for peer endpoints

use std::net::{IpAddr, ToSocketAddrs};
use tracing::debug;

/// Resolves hostnames to addresses
pub trait Resolver: Send + Sync {
    /// A and AAAA records of `host`; empty when nothing resolves
    fn resolve(&self, host: &str) -> Vec<IpAddr>;
}

/// Resolver backed by the system's name service
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> Vec<IpAddr> {
        match (host, 0).to_socket_addrs() {
            Ok(addrs) => {
                let mut ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
                ips.dedup();
                ips
            }
            Err(e) => {
                debug!("Lookup of {} failed: {}", host, e);
                Vec::new()
            }
        }
    }
}

/// Literal IP address in `endpoint`, accepting bracketed IPv6
pub fn parse_literal(endpoint: &str) -> Option<IpAddr> {
    let trimmed = endpoint
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(endpoint);
    trimmed.parse().ok()
}
