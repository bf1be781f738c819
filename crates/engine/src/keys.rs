//! WireGuard key generation
//!
//! Two backends implement [`KeyGenerator`]: [`WgKeyGenerator`] shells out to
//! `wg genkey` / `wg pubkey`, [`NativeKeyGenerator`] derives X25519 keys in
//! process. Private keys only ever travel through stdin, never argv.

use crate::config::{EngineConfig, KeyBackend};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use wgtun_common::{CommandExecutor, CommandSpec, Error, KeyPair, Result};

/// Length of a raw WireGuard key
pub const KEY_LEN: usize = 32;

/// Produces WireGuard key material
pub trait KeyGenerator: Send + Sync {
    /// Generate a new base64 private key
    fn generate_private_key(&self) -> Result<String>;

    /// Derive the base64 public key of a private key
    fn generate_public_key(&self, private_key: &str) -> Result<String>;

    /// Generate a fresh key pair
    fn generate_keys(&self) -> Result<KeyPair> {
        let private_key = self.generate_private_key()?;
        let public_key = self.generate_public_key(&private_key)?;
        Ok(KeyPair {
            private_key,
            public_key,
        })
    }

    /// Whether `public_key` belongs to `private_key`. A failed derivation
    /// counts as a mismatch.
    fn verify_keypair(&self, private_key: &str, public_key: &str) -> bool {
        match self.generate_public_key(private_key) {
            Ok(derived) => derived == public_key.trim(),
            Err(e) => {
                debug!("Public key derivation failed during verification: {}", e);
                false
            }
        }
    }
}

/// Key generator driving the `wg` tool
pub struct WgKeyGenerator {
    executor: Arc<dyn CommandExecutor>,
    wg_binary: String,
    timeout: Option<Duration>,
}

impl WgKeyGenerator {
    pub fn new(executor: Arc<dyn CommandExecutor>, wg_binary: impl Into<String>) -> Self {
        Self {
            executor,
            wg_binary: wg_binary.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, spec: CommandSpec) -> Result<String> {
        let output = self.executor.run(&spec.timeout(self.timeout))?;
        if !output.success() {
            return Err(Error::KeyGeneration(output.stderr.trim().to_string()));
        }
        Ok(output.stdout.trim().to_string())
    }
}

impl KeyGenerator for WgKeyGenerator {
    fn generate_private_key(&self) -> Result<String> {
        self.run(CommandSpec::new(&self.wg_binary).arg("genkey").umask(0o077))
    }

    fn generate_public_key(&self, private_key: &str) -> Result<String> {
        self.run(
            CommandSpec::new(&self.wg_binary)
                .arg("pubkey")
                .stdin(private_key.trim()),
        )
    }
}

/// In-process X25519 key generator
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeKeyGenerator;

impl KeyGenerator for NativeKeyGenerator {
    fn generate_private_key(&self) -> Result<String> {
        use rand::RngCore;

        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);

        // Curve25519 clamping, matching `wg genkey` output
        bytes[0] &= 248;
        bytes[31] &= 127;
        bytes[31] |= 64;

        Ok(STANDARD.encode(bytes))
    }

    fn generate_public_key(&self, private_key: &str) -> Result<String> {
        use x25519_dalek::{PublicKey, StaticSecret};

        let bytes = decode_key(private_key)
            .ok_or_else(|| Error::KeyGeneration("Key is not the correct length or format".to_string()))?;
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Ok(STANDARD.encode(public.as_bytes()))
    }
}

/// Key generator selected by configuration
pub fn key_generator(
    config: &EngineConfig,
    executor: Arc<dyn CommandExecutor>,
) -> Arc<dyn KeyGenerator> {
    match config.keys.backend {
        KeyBackend::Wg => Arc::new(
            WgKeyGenerator::new(executor, config.tunnel.wg_binary.clone())
                .with_timeout(config.tunnel.command_timeout()),
        ),
        KeyBackend::Native => Arc::new(NativeKeyGenerator),
    }
}

fn decode_key(key: &str) -> Option<[u8; KEY_LEN]> {
    let decoded = STANDARD.decode(key.trim()).ok()?;
    decoded.try_into().ok()
}

/// Whether `key` is base64 of exactly 32 bytes
pub fn is_valid_key(key: &str) -> bool {
    decode_key(key).is_some()
}

/// Reject a malformed key, naming what it was meant to be
pub fn validate_key(what: &str, key: &str) -> Result<()> {
    if is_valid_key(key) {
        Ok(())
    } else {
        warn!("Rejected malformed {}", what);
        Err(Error::InvalidConfig(format!(
            "{} is not a valid WireGuard key",
            what
        )))
    }
}
