//! wgtun Common Library
//!
//! Entity model, persistence and subprocess plumbing shared by the
//! WireGuard tunnel engine and its command-line front end.

pub mod command;
pub mod db;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use command::{CommandExecutor, CommandOutput, CommandSpec, SystemCommandExecutor};
pub use db::{Database, UnitOfWork};
pub use error::{Error, Result, TunnelStep};
pub use types::*;

/// wgtun version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default state directory
pub fn default_store_path() -> std::path::PathBuf {
    std::path::PathBuf::from("/var/lib/wgtun")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("state.db")
}

/// Default runtime directory used to stage secrets during tunnel bring-up
pub fn default_runtime_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/run/wgtun")
}

/// Default configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    std::path::PathBuf::from("/etc/wgtun/config.toml")
}
