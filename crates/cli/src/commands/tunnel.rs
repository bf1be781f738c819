//! Tunnel Commands

use anyhow::{bail, Result};
use clap::Subcommand;
use serde::Serialize;
use wgtun_common::TunnelState;
use wgtun_engine::{Activation, Engine};

use super::find_interface;
use crate::output::{print_info, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum TunnelCommands {
    /// Bring an interface's tunnel up
    Up {
        /// Interface name or ID
        interface: String,
    },

    /// Tear an interface's tunnel down
    Down {
        /// Interface name or ID
        interface: String,
    },

    /// Show kernel tunnel state
    Status {
        /// Interface name or ID, all interfaces when omitted
        interface: Option<String>,
    },
}

#[derive(Serialize)]
struct TunnelStatus {
    name: String,
    state: TunnelState,
}

impl TableDisplay for TunnelStatus {
    fn headers() -> Vec<&'static str> {
        vec!["Interface", "State"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.state.to_string()]
    }
}

pub fn execute(cmd: TunnelCommands, engine: &Engine, format: OutputFormat) -> Result<()> {
    match cmd {
        TunnelCommands::Up { interface } => {
            let iface = find_interface(engine, &interface)?;
            match engine.tunnels.activate(&iface)? {
                Activation::AlreadyActive => {
                    print_info(&format!("WireGuard tunnel {} is already active", iface.name))
                }
                Activation::Activated => {
                    print_success(&format!("WireGuard tunnel {} activated", iface.name))
                }
            }
        }

        TunnelCommands::Down { interface } => {
            let iface = find_interface(engine, &interface)?;
            if !engine.tunnels.delete_tunnel(&iface) {
                bail!("Failed to delete WireGuard tunnel {}", iface.name);
            }
            print_success(&format!("WireGuard tunnel {} deleted", iface.name));
        }

        TunnelCommands::Status { interface } => {
            let interfaces = match interface {
                Some(reference) => vec![find_interface(engine, &reference)?],
                None => engine.interfaces.get_all_interfaces()?,
            };

            let statuses: Vec<TunnelStatus> = interfaces
                .iter()
                .map(|iface| TunnelStatus {
                    name: iface.name.clone(),
                    state: engine.tunnels.tunnel_state(iface),
                })
                .collect();
            print_list(&statuses, format)?;
        }
    }

    Ok(())
}
