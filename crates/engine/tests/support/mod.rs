//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use wgtun_common::{
    CommandExecutor, CommandOutput, CommandSpec, Database, InterfaceRequest, Ipv4Spec, Ipv6Spec,
    Result,
};
use wgtun_engine::{Engine, EngineConfig, KeyBackend, Resolver};

pub const PRIVATE_KEY: &str = "uImD+hh1Dp6uWvWJ+eaYdc2oRloC3TYUpPUUCwfBi0I=";
pub const PUBLIC_KEY: &str = "k68DnQOF5JRn7/+zgYuN4/IEXBGopXmApK4uATjC82A=";
pub const PEER_KEY: &str = "M0cY2Pma3Yk0qRDUeJF6Kg5lkYWG1YE2KFHZOe9PDGM=";
pub const PSK: &str = "7hQ6XnJ0uPjQ9m4K2kTn0yX3W8f3b3Qm5nq0V1r2s3Q=";

/// Secret file as seen by `wg set` at the moment it ran
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    pub mode: u32,
    pub dir_mode: u32,
    pub contents: String,
}

/// Records every command and answers with canned results
#[derive(Default)]
pub struct FakeExecutor {
    calls: Mutex<Vec<CommandSpec>>,
    failures: Mutex<Vec<(String, String)>>,
    staged: Mutex<Vec<StagedFile>>,
    active: Mutex<bool>,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every command whose rendered argv starts with `prefix`
    pub fn fail_on(&self, prefix: &str, stderr: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((prefix.to_string(), stderr.to_string()));
    }

    /// Make `wg show` report the tunnel as running
    pub fn set_active(&self, active: bool) {
        *self.active.lock().unwrap() = active;
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.specs().iter().map(|s| s.to_string()).collect()
    }

    pub fn calls_of(&self, program: &str) -> Vec<String> {
        self.specs()
            .iter()
            .filter(|s| s.program == program)
            .map(|s| s.to_string())
            .collect()
    }

    pub fn staged(&self) -> Vec<StagedFile> {
        self.staged.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
        self.staged.lock().unwrap().clear();
    }

    fn capture_secrets(&self, spec: &CommandSpec) {
        let mut staged = self.staged.lock().unwrap();
        for pair in spec.args.windows(2) {
            if pair[0] == "private-key" || pair[0] == "preshared-key" {
                let path = PathBuf::from(&pair[1]);
                let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
                let dir_mode = std::fs::metadata(path.parent().unwrap())
                    .unwrap()
                    .permissions()
                    .mode()
                    & 0o777;
                let contents = std::fs::read_to_string(&path).unwrap();
                staged.push(StagedFile {
                    path,
                    mode,
                    dir_mode,
                    contents,
                });
            }
        }
    }
}

impl CommandExecutor for FakeExecutor {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let line = spec.to_string();

        if spec.program == "wg" && spec.args.first().map(String::as_str) == Some("set") {
            self.capture_secrets(spec);
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, stderr)| stderr.clone());
        if let Some(stderr) = failure {
            return Ok(CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr,
            });
        }

        if spec.program == "wg" && spec.args.first().map(String::as_str) == Some("show") {
            let active = *self.active.lock().unwrap();
            return Ok(CommandOutput {
                exit_code: if active { 0 } else { 1 },
                stdout: String::new(),
                stderr: if active {
                    String::new()
                } else {
                    "Unable to access interface: No such device".to_string()
                },
            });
        }

        Ok(CommandOutput::default())
    }
}

/// Resolver answering from a fixed table and recording lookups
#[derive(Default)]
pub struct StaticResolver {
    records: HashMap<String, Vec<IpAddr>>,
    lookups: Mutex<Vec<String>>,
}

impl StaticResolver {
    pub fn with(mut self, host: &str, addrs: &[&str]) -> Self {
        self.records.insert(
            host.to_string(),
            addrs.iter().map(|a| a.parse().unwrap()).collect(),
        );
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, host: &str) -> Vec<IpAddr> {
        self.lookups.lock().unwrap().push(host.to_string());
        self.records.get(host).cloned().unwrap_or_default()
    }
}

/// Engine wired to fakes, an in-memory database and a scratch runtime dir
pub struct Harness {
    pub engine: Engine,
    pub exec: Arc<FakeExecutor>,
    pub resolver: Arc<StaticResolver>,
    pub config: EngineConfig,
    pub scratch: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut EngineConfig)) -> Self {
        let scratch = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.tunnel.runtime_dir = scratch.path().join("run");
        config.keys.backend = KeyBackend::Native;
        adjust(&mut config);

        let exec = FakeExecutor::new();
        let resolver = Arc::new(
            StaticResolver::default()
                .with("vpn.example.org", &["192.0.2.10", "2001:db8::10"]),
        );
        let engine = Engine::with_collaborators(
            &config,
            Database::open_memory().unwrap(),
            exec.clone(),
            resolver.clone(),
        );

        Self {
            engine,
            exec,
            resolver,
            config,
            scratch,
        }
    }

    /// Entries left in the runtime directory
    pub fn runtime_entries(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.config.tunnel.runtime_dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub fn interface_request(name: &str, ipv4: Option<&str>, ipv6: Option<&str>) -> InterfaceRequest {
    InterfaceRequest {
        name: name.to_string(),
        private_key: PRIVATE_KEY.to_string(),
        port: Some(51820),
        ipv4: ipv4.map(|s| {
            let (addr, prefix) = s.split_once('/').unwrap();
            Ipv4Spec::new(addr.parse().unwrap(), prefix.parse().unwrap())
        }),
        ipv6: ipv6.map(|s| {
            let (addr, prefix) = s.split_once('/').unwrap();
            Ipv6Spec::new(addr.parse().unwrap(), prefix.parse().unwrap())
        }),
    }
}

pub fn v4(list: &[&str]) -> Vec<Ipv4Spec> {
    list.iter()
        .map(|s| {
            let (addr, prefix) = s.split_once('/').unwrap();
            Ipv4Spec::new(addr.parse().unwrap(), prefix.parse().unwrap())
        })
        .collect()
}

pub fn v6(list: &[&str]) -> Vec<Ipv6Spec> {
    list.iter()
        .map(|s| {
            let (addr, prefix) = s.split_once('/').unwrap();
            Ipv6Spec::new(addr.parse().unwrap(), prefix.parse().unwrap())
        })
        .collect()
}
