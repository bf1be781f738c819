//! Error types for wgtun

use thiserror::Error;

/// Result type alias using wgtun Error
pub type Result<T> = std::result::Result<T, Error>;

/// Tunnel bring-up step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStep {
    CreateLink,
    StageSecrets,
    ApplyConfig,
    RemoveSecrets,
    AssignIpv4,
    AssignIpv6,
    LinkUp,
    AddRoute,
}

impl std::fmt::Display for TunnelStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelStep::CreateLink => write!(f, "create-link"),
            TunnelStep::StageSecrets => write!(f, "stage-secrets"),
            TunnelStep::ApplyConfig => write!(f, "apply-config"),
            TunnelStep::RemoveSecrets => write!(f, "remove-secrets"),
            TunnelStep::AssignIpv4 => write!(f, "assign-ipv4"),
            TunnelStep::AssignIpv6 => write!(f, "assign-ipv6"),
            TunnelStep::LinkUp => write!(f, "link-up"),
            TunnelStep::AddRoute => write!(f, "add-route"),
        }
    }
}

/// wgtun error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Interface {name} already exists")]
    DuplicateInterface { name: String },

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Resource not found: {kind} ID not specified")]
    MissingId { kind: String },

    #[error("Endpoint {endpoint} could not be resolved")]
    EndpointResolution { endpoint: String },

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Tunnel {step} failed: {stderr}")]
    Orchestration { step: TunnelStep, stderr: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: &str, id: impl ToString) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    pub fn orchestration(step: TunnelStep, stderr: impl Into<String>) -> Self {
        Error::Orchestration {
            step,
            stderr: stderr.into(),
        }
    }

    /// Lookup misses and missing ids both belong to the not-found class
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::MissingId { .. })
    }

    /// The interface-creation failure of a tunnel bring-up
    pub fn is_interface_creation(&self) -> bool {
        matches!(
            self,
            Error::Orchestration {
                step: TunnelStep::CreateLink,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(Error::not_found("interface", 7).is_not_found());
        assert!(Error::MissingId { kind: "peer".to_string() }.is_not_found());
        assert!(!Error::InvalidConfig("x".to_string()).is_not_found());
    }

    #[test]
    fn test_messages() {
        let err = Error::MissingId { kind: "peer".to_string() };
        assert_eq!(err.to_string(), "Resource not found: peer ID not specified");

        let err = Error::orchestration(TunnelStep::CreateLink, "RTNETLINK answers: File exists");
        assert!(err.is_interface_creation());
        assert_eq!(
            err.to_string(),
            "Tunnel create-link failed: RTNETLINK answers: File exists"
        );
    }
}
