//! Interface Commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use wgtun_common::{
    InterfaceDetail, InterfaceRequest, InterfaceSummary, Ipv4Spec, Ipv6Spec, WgPeer,
};
use wgtun_engine::Engine;

use super::{find_interface, parse_ipv4, parse_ipv6};
use crate::output::{print_info, print_item, print_list, print_success, yes_no, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum InterfaceCommands {
    /// List all interfaces with their service status
    List,

    /// Show an interface with its peers
    Get {
        /// Interface name or ID
        interface: String,
    },

    /// Create a new interface
    Create {
        /// Interface name (at most 15 characters)
        #[arg(short, long)]
        name: String,

        /// Base64 private key, generated when omitted
        #[arg(long, env = "WGTUN_PRIVATE_KEY", hide_env_values = true)]
        private_key: Option<String>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// IPv4 address with prefix (e.g., 10.0.0.1/24)
        #[arg(long, value_parser = parse_ipv4)]
        ipv4: Option<Ipv4Spec>,

        /// IPv6 address with prefix (e.g., fd00::1/64)
        #[arg(long, value_parser = parse_ipv6)]
        ipv6: Option<Ipv6Spec>,
    },

    /// Edit an interface, keeping whatever is not given
    Edit {
        /// Interface name or ID
        interface: String,

        /// New interface name
        #[arg(long)]
        name: Option<String>,

        /// New base64 private key
        #[arg(long, env = "WGTUN_PRIVATE_KEY", hide_env_values = true)]
        private_key: Option<String>,

        /// New listen port
        #[arg(short, long, conflicts_with = "no_port")]
        port: Option<u16>,

        /// Drop the listen port
        #[arg(long)]
        no_port: bool,

        /// New IPv4 address with prefix
        #[arg(long, value_parser = parse_ipv4, conflicts_with = "no_ipv4")]
        ipv4: Option<Ipv4Spec>,

        /// Remove the IPv4 address
        #[arg(long)]
        no_ipv4: bool,

        /// New IPv6 address with prefix
        #[arg(long, value_parser = parse_ipv6, conflicts_with = "no_ipv6")]
        ipv6: Option<Ipv6Spec>,

        /// Remove the IPv6 address
        #[arg(long)]
        no_ipv6: bool,
    },

    /// Delete an interface together with its peers
    Delete {
        /// Interface name or ID
        interface: String,
    },
}

/// Interface listing row
#[derive(Serialize)]
pub struct InterfaceRow(InterfaceSummary);

impl TableDisplay for InterfaceRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Stack", "Active", "Enabled"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.0.id.to_string(),
            self.0.name.clone(),
            self.0
                .stack
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            yes_no(self.0.active),
            yes_no(self.0.enabled),
        ]
    }
}

/// Interface details
#[derive(Serialize)]
pub struct InterfaceView(InterfaceDetail);

impl TableDisplay for InterfaceView {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Public Key", "Port", "IPv4", "IPv6", "Peers"]
    }

    fn row(&self) -> Vec<String> {
        let iface = &self.0.interface;
        vec![
            iface.id.to_string(),
            iface.name.clone(),
            self.0.public_key.clone(),
            iface.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            iface
                .ipv4
                .map(|a| a.address.to_string())
                .unwrap_or_else(|| "-".to_string()),
            iface
                .ipv6
                .map(|a| a.address.to_string())
                .unwrap_or_else(|| "-".to_string()),
            iface.peers.len().to_string(),
        ]
    }
}

/// Peer row shown under an interface
#[derive(Serialize)]
pub struct PeerRow(pub WgPeer);

impl TableDisplay for PeerRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Public Key", "Endpoint", "Keepalive", "PSK", "Allowed IPs"]
    }

    fn row(&self) -> Vec<String> {
        let peer = &self.0;
        vec![
            peer.id.to_string(),
            peer.public_key.clone(),
            format!("{}:{}", peer.endpoint, peer.port),
            peer.keepalive.to_string(),
            yes_no(peer.preshared_key().is_some()),
            peer.addresses
                .iter()
                .map(|a| a.canonical())
                .collect::<Vec<_>>()
                .join(", "),
        ]
    }
}

pub fn execute(cmd: InterfaceCommands, engine: &Engine, format: OutputFormat) -> Result<()> {
    match cmd {
        InterfaceCommands::List => {
            let rows: Vec<InterfaceRow> = engine
                .interfaces
                .list_interfaces()?
                .into_iter()
                .map(InterfaceRow)
                .collect();
            print_list(&rows, format)?;
        }

        InterfaceCommands::Get { interface } => {
            let iface = find_interface(engine, &interface)?;
            let detail = engine.interfaces.describe_interface(iface.id)?;
            let peers: Vec<PeerRow> = detail.interface.peers.iter().cloned().map(PeerRow).collect();
            print_item(&InterfaceView(detail), format)?;
            if matches!(format, OutputFormat::Table) && !peers.is_empty() {
                print_list(&peers, format)?;
            }
        }

        InterfaceCommands::Create {
            name,
            private_key,
            port,
            ipv4,
            ipv6,
        } => {
            let private_key = match private_key {
                Some(key) => key,
                None => {
                    print_info("Generating a new private key");
                    engine.keys.generate_private_key()?
                }
            };
            let iface = engine.interfaces.create_interface(&InterfaceRequest {
                name,
                private_key,
                port,
                ipv4,
                ipv6,
            })?;
            print_success(&format!("Interface {} created (id {})", iface.name, iface.id));
        }

        InterfaceCommands::Edit {
            interface,
            name,
            private_key,
            port,
            no_port,
            ipv4,
            no_ipv4,
            ipv6,
            no_ipv6,
        } => {
            let current = find_interface(engine, &interface)?;
            let request = InterfaceRequest {
                name: name.unwrap_or_else(|| current.name.clone()),
                private_key: private_key.unwrap_or_else(|| current.private_key.clone()),
                port: if no_port { None } else { port.or(current.port) },
                ipv4: if no_ipv4 {
                    None
                } else {
                    ipv4.or_else(|| {
                        current
                            .ipv4
                            .map(|a| Ipv4Spec::new(a.address.ip(), a.address.prefix()))
                    })
                },
                ipv6: if no_ipv6 {
                    None
                } else {
                    ipv6.or_else(|| {
                        current
                            .ipv6
                            .map(|a| Ipv6Spec::new(a.address.ip(), a.address.prefix()))
                    })
                },
            };
            let iface = engine.interfaces.edit_interface(current.id, &request)?;
            print_success(&format!("Interface {} updated", iface.name));
        }

        InterfaceCommands::Delete { interface } => {
            let iface = find_interface(engine, &interface)?;
            engine.interfaces.remove_interface(iface.id)?;
            print_success(&format!("Interface {} deleted", iface.name));
        }
    }

    Ok(())
}
