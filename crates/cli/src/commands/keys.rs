//! Key Commands

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::io::Read;
use wgtun_common::KeyPair;
use wgtun_engine::Engine;

use crate::output::{print_item, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum KeysCommands {
    /// Generate a new key pair
    Generate,

    /// Derive the public key of a private key read from stdin
    Public,

    /// Check that a public key belongs to the private key read from stdin
    Verify {
        /// Public key to check
        public_key: String,
    },
}

#[derive(Serialize)]
struct KeyPairView(KeyPair);

impl TableDisplay for KeyPairView {
    fn headers() -> Vec<&'static str> {
        vec!["Private Key", "Public Key"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.0.private_key.clone(), self.0.public_key.clone()]
    }
}

fn read_private_key() -> Result<String> {
    let mut key = String::new();
    std::io::stdin()
        .read_to_string(&mut key)
        .context("Failed to read private key from stdin")?;
    Ok(key.trim().to_string())
}

pub fn execute(cmd: KeysCommands, engine: &Engine, format: OutputFormat) -> Result<()> {
    match cmd {
        KeysCommands::Generate => {
            let pair = engine.keys.generate_keys()?;
            print_item(&KeyPairView(pair), format)?;
        }

        KeysCommands::Public => {
            let private_key = read_private_key()?;
            println!("{}", engine.keys.generate_public_key(&private_key)?);
        }

        KeysCommands::Verify { public_key } => {
            let private_key = read_private_key()?;
            if !engine.keys.verify_keypair(&private_key, &public_key) {
                bail!("Public key does not match the private key");
            }
            print_success("Key pair matches");
        }
    }

    Ok(())
}
