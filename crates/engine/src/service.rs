//! Tunnel service status reporting

use crate::config::ServiceConfig;
use std::sync::Arc;
use tracing::warn;
use wgtun_common::{CommandExecutor, CommandSpec};

/// Reports the state of the tunnel service unit of an interface
pub trait ServiceStatus: Send + Sync {
    fn is_active(&self, interface: &str) -> bool;
    fn is_enabled(&self, interface: &str) -> bool;
}

/// systemd-backed status reporter
pub struct SystemdServiceStatus {
    executor: Arc<dyn CommandExecutor>,
    config: ServiceConfig,
}

impl SystemdServiceStatus {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: ServiceConfig) -> Self {
        Self { executor, config }
    }

    fn query(&self, verb: &str, interface: &str) -> bool {
        let unit = self.config.unit_name(interface);
        let spec = CommandSpec::new(&self.config.systemctl_binary).args([verb, "--quiet", unit.as_str()]);
        match self.executor.run(&spec) {
            Ok(output) => output.success(),
            Err(e) => {
                warn!("Failed to query {} of {}: {}", verb, unit, e);
                false
            }
        }
    }
}

impl ServiceStatus for SystemdServiceStatus {
    fn is_active(&self, interface: &str) -> bool {
        self.query("is-active", interface)
    }

    fn is_enabled(&self, interface: &str) -> bool {
        self.query("is-enabled", interface)
    }
}
