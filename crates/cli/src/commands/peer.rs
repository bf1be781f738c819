//! Peer Commands

use anyhow::Result;
use clap::Subcommand;
use ipnetwork::IpNetwork;
use wgtun_common::{CreatePeerRequest, ModifyPeerRequest, PeerId};
use wgtun_engine::Engine;

use super::interface::PeerRow;
use super::{allowed_ips, find_interface, parse_network};
use crate::output::{print_item, print_success, OutputFormat};

#[derive(Subcommand)]
pub enum PeerCommands {
    /// Show a peer
    Get {
        /// Peer ID
        id: PeerId,
    },

    /// Add a peer to an interface
    Create {
        /// Interface name or ID
        #[arg(short, long)]
        interface: String,

        /// Peer public key
        #[arg(long)]
        public_key: String,

        /// Pre-shared key
        #[arg(long, env = "WGTUN_PSK", hide_env_values = true)]
        psk: Option<String>,

        /// Persistent keepalive interval in seconds
        #[arg(short, long, default_value = "25")]
        keepalive: u32,

        /// Peer hostname or IP address
        #[arg(short, long)]
        endpoint: String,

        /// Peer port
        #[arg(short, long, default_value = "51820")]
        port: u16,

        /// Allowed network, repeatable (e.g., 10.0.0.2/32)
        #[arg(short, long = "allowed-ip", value_parser = parse_network)]
        allowed_ip: Vec<IpNetwork>,
    },

    /// Edit a peer, keeping whatever is not given
    Edit {
        /// Peer ID
        id: PeerId,

        /// Move the peer to another interface (name or ID)
        #[arg(short, long)]
        interface: Option<String>,

        /// New public key
        #[arg(long)]
        public_key: Option<String>,

        /// New pre-shared key
        #[arg(long, env = "WGTUN_PSK", hide_env_values = true, conflicts_with = "no_psk")]
        psk: Option<String>,

        /// Drop the pre-shared key
        #[arg(long)]
        no_psk: bool,

        /// New keepalive interval
        #[arg(short, long)]
        keepalive: Option<u32>,

        /// New endpoint
        #[arg(short, long)]
        endpoint: Option<String>,

        /// New peer port
        #[arg(short, long)]
        port: Option<u16>,

        /// Replacement allowed networks, repeatable
        #[arg(short, long = "allowed-ip", value_parser = parse_network, conflicts_with = "no_allowed_ips")]
        allowed_ip: Vec<IpNetwork>,

        /// Remove every allowed network
        #[arg(long)]
        no_allowed_ips: bool,
    },

    /// Delete a peer
    Delete {
        /// Peer ID
        id: PeerId,
    },
}

pub fn execute(cmd: PeerCommands, engine: &Engine, format: OutputFormat) -> Result<()> {
    match cmd {
        PeerCommands::Get { id } => {
            let peer = engine.peers.get_peer(id)?;
            print_item(&PeerRow(peer), format)?;
        }

        PeerCommands::Create {
            interface,
            public_key,
            psk,
            keepalive,
            endpoint,
            port,
            allowed_ip,
        } => {
            let iface = find_interface(engine, &interface)?;
            let peer = engine.peers.create_peer(
                &CreatePeerRequest {
                    public_key,
                    psk,
                    keepalive,
                    endpoint,
                    port,
                    allowed_ips: allowed_ips(&allowed_ip),
                },
                iface.id,
            )?;
            print_success(&format!("Peer {} added to {}", peer.id, iface.name));
        }

        PeerCommands::Edit {
            id,
            interface,
            public_key,
            psk,
            no_psk,
            keepalive,
            endpoint,
            port,
            allowed_ip,
            no_allowed_ips,
        } => {
            let current = engine.peers.get_peer(id)?;
            let mut request = ModifyPeerRequest::from_peer(&current);

            if let Some(reference) = interface {
                request.tunnel_id = Some(find_interface(engine, &reference)?.id);
            }
            if let Some(public_key) = public_key {
                request.public_key = public_key;
            }
            if no_psk {
                request.psk = None;
            } else if psk.is_some() {
                request.psk = psk;
            }
            if let Some(keepalive) = keepalive {
                request.keepalive = keepalive;
            }
            if let Some(endpoint) = endpoint {
                request.endpoint = endpoint;
            }
            if let Some(port) = port {
                request.port = port;
            }
            if no_allowed_ips || !allowed_ip.is_empty() {
                request.allowed_ips = allowed_ips(&allowed_ip);
            }

            let peer = engine.peers.modify_peer(&request)?;
            print_success(&format!("Peer {} updated", peer.id));
        }

        PeerCommands::Delete { id } => {
            engine.peers.remove_peer(id)?;
            print_success(&format!("Peer {} deleted", id));
        }
    }

    Ok(())
}
