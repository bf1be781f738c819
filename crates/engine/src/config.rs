//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Persistence configuration
    pub store: StoreConfig,

    /// Tunnel bring-up configuration
    pub tunnel: TunnelConfig,

    /// Key generation configuration
    pub keys: KeysConfig,

    /// Service status configuration
    pub service: ServiceConfig,
}

/// Persistence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: wgtun_common::default_db_path(),
        }
    }
}

/// Tunnel bring-up configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Directory holding per-invocation secret staging directories
    pub runtime_dir: PathBuf,

    /// Link MTU set when bringing the tunnel up
    pub mtu: u32,

    /// Undo completed steps when a later step fails
    pub rollback_on_failure: bool,

    /// iproute2 binary
    pub ip_binary: String,

    /// WireGuard tools binary
    pub wg_binary: String,

    /// Per-command timeout, zero disables it
    pub command_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            runtime_dir: wgtun_common::default_runtime_dir(),
            mtu: 1420,
            rollback_on_failure: true,
            ip_binary: "ip".to_string(),
            wg_binary: "wg".to_string(),
            command_timeout_secs: 30,
        }
    }
}

impl TunnelConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }
}

/// Key generation backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyBackend {
    /// `wg genkey` / `wg pubkey`
    #[default]
    Wg,
    /// In-process X25519
    Native,
}

/// Key generation configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub backend: KeyBackend,
}

/// Service status configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Template unit prefix, instantiated per interface name
    pub unit_prefix: String,

    /// systemctl binary
    pub systemctl_binary: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            unit_prefix: "iqrf-gateway-webapp-wg".to_string(),
            systemctl_binary: "systemctl".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Unit name of the tunnel service for an interface
    pub fn unit_name(&self, interface: &str) -> String {
        format!("{}@{}.service", self.unit_prefix, interface)
    }
}

impl EngineConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> &Path {
        &self.store.db_path
    }

    /// Get the secret runtime directory
    pub fn runtime_dir(&self) -> &Path {
        &self.tunnel.runtime_dir
    }
}
