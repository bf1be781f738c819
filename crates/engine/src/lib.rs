//! wgtun engine
//!
//! Turns stored interface and peer declarations into running WireGuard
//! tunnels: key management, validated CRUD, peer address reconciliation and
//! the kernel-level bring-up sequence.

pub mod config;
pub mod interfaces;
pub mod keys;
pub mod peers;
pub mod reconciler;
pub mod resolver;
pub mod service;
pub mod tunnel;

pub use config::{EngineConfig, KeyBackend};
pub use interfaces::InterfaceManager;
pub use keys::{KeyGenerator, NativeKeyGenerator, WgKeyGenerator};
pub use peers::PeerManager;
pub use reconciler::{reconcile, AddressPlan};
pub use resolver::{Resolver, SystemResolver};
pub use service::{ServiceStatus, SystemdServiceStatus};
pub use tunnel::{Activation, TunnelManager, TunnelStage};

use std::sync::Arc;
use tracing::debug;
use wgtun_common::{CommandExecutor, Database, Result, SystemCommandExecutor};

/// All managers wired to one database and one command executor
pub struct Engine {
    pub interfaces: InterfaceManager,
    pub peers: PeerManager,
    pub tunnels: TunnelManager,
    pub keys: Arc<dyn KeyGenerator>,
}

impl Engine {
    /// Open the configured database and wire up the system collaborators
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let db = Database::open(config.db_path())?;
        Ok(Self::with_collaborators(
            config,
            db,
            Arc::new(SystemCommandExecutor),
            Arc::new(SystemResolver),
        ))
    }

    pub fn with_collaborators(
        config: &EngineConfig,
        db: Database,
        executor: Arc<dyn CommandExecutor>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        debug!("Key backend: {:?}", config.keys.backend);
        let keys = keys::key_generator(config, executor.clone());
        let service = Arc::new(SystemdServiceStatus::new(
            executor.clone(),
            config.service.clone(),
        ));

        Self {
            interfaces: InterfaceManager::new(db.clone(), keys.clone(), service),
            peers: PeerManager::new(db, resolver),
            tunnels: TunnelManager::new(executor, config.tunnel.clone()),
            keys,
        }
    }
}
