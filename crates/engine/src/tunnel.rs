//! Tunnel lifecycle orchestration
//!
//! Bring-up runs as a sequence of stages. Every completed stage registers a
//! compensating command; when a later step fails the compensations run in
//! reverse so the host is left without a half-configured link.
//!
//! Secrets reach `wg` only through files in a per-invocation 0700 staging
//! directory, which is removed right after the configuration is applied and
//! on every failure path.

use crate::config::TunnelConfig;
use ipnetwork::IpNetwork;
use std::collections::HashMap;
use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::{ErrorKind, Write};
use std::net::Ipv6Addr;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};
use wgtun_common::{
    CommandExecutor, CommandOutput, CommandSpec, Error, IpVersion, PeerId, Result, TunnelState,
    TunnelStep, WgInterface,
};

/// Progress of a tunnel bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TunnelStage {
    LinkCreated,
    KeysApplied,
    AddressesAssigned,
    Up,
    RoutesSet,
}

impl std::fmt::Display for TunnelStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelStage::LinkCreated => write!(f, "link-created"),
            TunnelStage::KeysApplied => write!(f, "keys-applied"),
            TunnelStage::AddressesAssigned => write!(f, "addresses-assigned"),
            TunnelStage::Up => write!(f, "up"),
            TunnelStage::RoutesSet => write!(f, "routes-set"),
        }
    }
}

/// Outcome of [`TunnelManager::activate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    AlreadyActive,
    Activated,
}

/// Secret files staged for one `wg set` invocation
struct StagedSecrets {
    dir: TempDir,
    private_key: PathBuf,
    psks: HashMap<PeerId, PathBuf>,
}

impl StagedSecrets {
    fn remove(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|e| Error::orchestration(TunnelStep::RemoveSecrets, e.to_string()))?;
        debug!("Removed secret staging directory {:?}", path);
        Ok(())
    }
}

/// Compensating commands of the stages reached so far
#[derive(Default)]
struct Compensations {
    reached: Option<TunnelStage>,
    undo: Vec<(TunnelStage, CommandSpec)>,
}

impl Compensations {
    fn reach(&mut self, stage: TunnelStage) {
        debug!("Tunnel stage {}", stage);
        self.reached = Some(stage);
    }

    fn push(&mut self, stage: TunnelStage, spec: CommandSpec) {
        self.reach(stage);
        self.undo.push((stage, spec));
    }
}

/// Drives `ip` and `wg` to materialize interfaces as kernel tunnels
pub struct TunnelManager {
    executor: Arc<dyn CommandExecutor>,
    config: TunnelConfig,
}

impl TunnelManager {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: TunnelConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Bring the tunnel up unless it is already running
    pub fn activate(&self, interface: &WgInterface) -> Result<Activation> {
        if self.is_tunnel_active(interface) {
            info!("WireGuard tunnel {} is already active", interface.name);
            return Ok(Activation::AlreadyActive);
        }
        self.initialize_tunnel(interface)?;
        Ok(Activation::Activated)
    }

    /// Create, configure, address and route the kernel link of `interface`
    pub fn initialize_tunnel(&self, interface: &WgInterface) -> Result<()> {
        info!("Bringing up WireGuard tunnel {}", interface.name);

        let mut compensations = Compensations::default();
        match self.bring_up(interface, &mut compensations) {
            Ok(()) => {
                info!("WireGuard tunnel {} is up", interface.name);
                Ok(())
            }
            Err(e) => {
                error!("Bring-up of {} failed: {}", interface.name, e);
                if self.config.rollback_on_failure {
                    self.unwind(&interface.name, compensations);
                } else if let Some(stage) = compensations.reached {
                    warn!(
                        "Leaving tunnel {} partially configured at stage {}",
                        interface.name, stage
                    );
                }
                Err(e)
            }
        }
    }

    fn bring_up(&self, interface: &WgInterface, compensations: &mut Compensations) -> Result<()> {
        let name = interface.name.as_str();

        self.step(
            TunnelStep::CreateLink,
            self.ip().args(["link", "add", name, "type", "wireguard"]),
        )?;
        compensations.push(
            TunnelStage::LinkCreated,
            self.ip().args(["link", "delete", "dev", name]),
        );

        let secrets = self.stage_secrets(interface)?;
        self.step(
            TunnelStep::ApplyConfig,
            self.wg()
                .args(wg_set_args(interface, &secrets.private_key, &secrets.psks)),
        )?;
        secrets.remove()?;
        compensations.reach(TunnelStage::KeysApplied);

        if let Some(ipv4) = &interface.ipv4 {
            let address = ipv4.address.to_string();
            self.step(
                TunnelStep::AssignIpv4,
                self.ip().args(["-4", "address", "add", &address, "dev", name]),
            )?;
            compensations.push(
                TunnelStage::AddressesAssigned,
                self.ip().args(["-4", "address", "del", &address, "dev", name]),
            );
        }
        if let Some(ipv6) = &interface.ipv6 {
            let address = ipv6.address.to_string();
            self.step(
                TunnelStep::AssignIpv6,
                self.ip().args(["-6", "address", "add", &address, "dev", name]),
            )?;
            compensations.push(
                TunnelStage::AddressesAssigned,
                self.ip().args(["-6", "address", "del", &address, "dev", name]),
            );
        }

        let mtu = self.config.mtu.to_string();
        self.step(
            TunnelStep::LinkUp,
            self.ip().args(["link", "set", "mtu", &mtu, "up", "dev", name]),
        )?;
        compensations.push(
            TunnelStage::Up,
            self.ip().args(["link", "set", "down", "dev", name]),
        );

        for peer in &interface.peers {
            for addr in peer.addresses_of(IpVersion::V6) {
                let route = route_prefix(&addr.network);
                self.step(
                    TunnelStep::AddRoute,
                    self.ip().args(["-6", "route", "add", &route, "dev", name]),
                )?;
                compensations.push(
                    TunnelStage::RoutesSet,
                    self.ip().args(["-6", "route", "del", &route, "dev", name]),
                );
            }
        }
        compensations.reach(TunnelStage::RoutesSet);

        Ok(())
    }

    /// Run compensations newest first, logging rather than propagating failures
    fn unwind(&self, name: &str, compensations: Compensations) {
        if compensations.undo.is_empty() {
            return;
        }
        info!("Rolling back tunnel {}", name);

        for (stage, spec) in compensations.undo.into_iter().rev() {
            match self.run(&spec) {
                Ok(output) if output.success() => debug!("Undid {}: {}", stage, spec),
                Ok(output) => warn!("Undo of {} failed ({}): {}", stage, spec, output.stderr.trim()),
                Err(e) => warn!("Undo of {} failed ({}): {}", stage, spec, e),
            }
        }
    }

    /// Whether `wg show` knows the tunnel
    pub fn is_tunnel_active(&self, interface: &WgInterface) -> bool {
        match self.run(&self.wg().args(["show", interface.name.as_str()])) {
            Ok(output) => output.success(),
            Err(e) => {
                warn!("Failed to query tunnel {}: {}", interface.name, e);
                false
            }
        }
    }

    pub fn tunnel_state(&self, interface: &WgInterface) -> TunnelState {
        if self.is_tunnel_active(interface) {
            TunnelState::Active
        } else {
            TunnelState::Inactive
        }
    }

    /// Delete the kernel link. Returns whether the deletion succeeded.
    pub fn delete_tunnel(&self, interface: &WgInterface) -> bool {
        let spec = self
            .ip()
            .args(["link", "delete", "dev", interface.name.as_str()]);
        match self.run(&spec) {
            Ok(output) if output.success() => {
                info!("Deleted WireGuard tunnel {}", interface.name);
                true
            }
            Ok(output) => {
                warn!(
                    "Failed to delete tunnel {}: {}",
                    interface.name,
                    output.stderr.trim()
                );
                false
            }
            Err(e) => {
                warn!("Failed to delete tunnel {}: {}", interface.name, e);
                false
            }
        }
    }

    fn stage_secrets(&self, interface: &WgInterface) -> Result<StagedSecrets> {
        let stage_err = |e: std::io::Error| Error::orchestration(TunnelStep::StageSecrets, e.to_string());

        let runtime_dir = &self.config.runtime_dir;
        match fs::metadata(runtime_dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::orchestration(
                    TunnelStep::StageSecrets,
                    format!("{} is not a directory", runtime_dir.display()),
                ))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(runtime_dir)
                    .map_err(stage_err)?;
                // The umask may have narrowed the mode requested above
                fs::set_permissions(runtime_dir, Permissions::from_mode(0o700)).map_err(stage_err)?;
                debug!("Created runtime directory {:?}", runtime_dir);
            }
            Err(e) => return Err(stage_err(e)),
        }

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", interface.name))
            .tempdir_in(runtime_dir)
            .map_err(stage_err)?;
        fs::set_permissions(dir.path(), Permissions::from_mode(0o700)).map_err(stage_err)?;
        debug!("Staging secrets in {:?}", dir.path());

        let private_key = dir.path().join(format!("{}.privatekey", interface.name));
        write_secret(&private_key, &interface.private_key).map_err(stage_err)?;

        let mut psks = HashMap::new();
        for peer in &interface.peers {
            if let Some(psk) = peer.preshared_key() {
                let path = dir.path().join(format!("peer-{}.psk", peer.id));
                write_secret(&path, psk).map_err(stage_err)?;
                psks.insert(peer.id, path);
            }
        }

        Ok(StagedSecrets {
            dir,
            private_key,
            psks,
        })
    }

    fn step(&self, step: TunnelStep, spec: CommandSpec) -> Result<CommandOutput> {
        let output = self
            .run(&spec)
            .map_err(|e| Error::orchestration(step, e.to_string()))?;
        if !output.success() {
            return Err(Error::orchestration(step, output.stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let spec = spec.clone().timeout(self.config.command_timeout());
        debug!("Executing {}", spec);
        self.executor.run(&spec)
    }

    fn ip(&self) -> CommandSpec {
        CommandSpec::new(&self.config.ip_binary)
    }

    fn wg(&self) -> CommandSpec {
        CommandSpec::new(&self.config.wg_binary)
    }
}

fn write_secret(path: &Path, secret: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(secret.trim().as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()
}

/// Arguments of the single `wg set` call configuring `interface`
pub fn wg_set_args(
    interface: &WgInterface,
    private_key: &Path,
    psks: &HashMap<PeerId, PathBuf>,
) -> Vec<String> {
    let mut args = vec![
        "set".to_string(),
        interface.name.clone(),
        "private-key".to_string(),
        private_key.display().to_string(),
    ];
    if let Some(port) = interface.port {
        args.extend(["listen-port".to_string(), port.to_string()]);
    }

    for peer in &interface.peers {
        args.extend(["peer".to_string(), peer.public_key.clone()]);
        if let Some(path) = psks.get(&peer.id) {
            args.extend(["preshared-key".to_string(), path.display().to_string()]);
        }
        args.extend([
            "endpoint".to_string(),
            format_endpoint(&peer.endpoint, peer.port),
            "persistent-keepalive".to_string(),
            peer.keepalive.to_string(),
        ]);
        if !peer.addresses.is_empty() {
            let allowed: Vec<String> = peer.addresses.iter().map(|a| a.canonical()).collect();
            args.extend(["allowed-ips".to_string(), allowed.join(",")]);
        }
    }
    args
}

/// Route destination for an allowed network, with host bits cleared
pub fn route_prefix(network: &IpNetwork) -> String {
    format!("{}/{}", network.network(), network.prefix())
}

/// `host:port`, bracketing bare IPv6 literals
pub fn format_endpoint(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
