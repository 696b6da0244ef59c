// src/config.rs

//! Agent configuration: loading, env layering, resolution of
//! runtime-detected defaults, and validation.

use crate::core::errors::ClusterError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::System;
use tracing::warn;

/// Environment variable that overrides `cluster.auth_key`.
pub const AUTH_KEY_ENV: &str = "CLUSTEROS_CLUSTER_AUTH_KEY";

/// How leaders are elected and state is replicated.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ElectionMode {
    /// Stateless, gossip-derived leadership.
    #[default]
    Serf,
    /// Persistent consensus with an on-disk log.
    Raft,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

/// Where the node's identity keypair lives.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_path")]
    pub path: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            path: default_identity_path(),
        }
    }
}

fn default_identity_path() -> PathBuf {
    PathBuf::from("/var/lib/clusteros/identity.json")
}

/// Gossip membership settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_membership_port")]
    pub bind_port: u16,
    /// The address peers should use to reach this node. Defaults to
    /// `bind_addr` when that is routable.
    #[serde(default)]
    pub advertise_addr: Option<String>,
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    /// Operator-friendly node name; defaults to the hostname.
    #[serde(default)]
    pub node_name: String,
    /// Base64 symmetric key for the gossip wire (16, 24 or 32 bytes).
    #[serde(default)]
    pub encrypt_key: Option<String>,
    /// Interval between gossip probe rounds.
    #[serde(with = "humantime_serde", default = "default_probe_interval")]
    pub probe_interval: Duration,
    /// How long a silent peer stays alive before being suspected.
    #[serde(with = "humantime_serde", default = "default_suspicion_timeout")]
    pub suspicion_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bind_port: default_membership_port(),
            advertise_addr: None,
            bootstrap_peers: Vec::new(),
            node_name: String::new(),
            encrypt_key: None,
            probe_interval: default_probe_interval(),
            suspicion_timeout: default_suspicion_timeout(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_membership_port() -> u16 {
    7946
}
fn default_probe_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_suspicion_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Overlay and consensus wiring.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NetworkingConfig {
    #[serde(default = "default_subnet")]
    pub subnet: String,
    /// Consensus (raft) TCP port.
    #[serde(default = "default_consensus_port")]
    pub listen_port: u16,
}

impl Default for NetworkingConfig {
    fn default() -> Self {
        Self {
            subnet: default_subnet(),
            listen_port: default_consensus_port(),
        }
    }
}

fn default_subnet() -> String {
    "10.42.0.0/16".to_string()
}
fn default_consensus_port() -> u16 {
    7373
}

/// Hardware capabilities this node advertises. Zero or empty values are
/// replaced by runtime-detected ones.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CapabilitiesConfig {
    #[serde(default)]
    pub cpu: u32,
    #[serde(default)]
    pub ram: String,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub arch: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RolesConfig {
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    /// Role file locations; mostly overridden in tests.
    #[serde(default)]
    pub munge_key_path: Option<PathBuf>,
    #[serde(default)]
    pub slurm_conf_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            output: default_log_output(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_output() -> String {
    "stderr".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_name")]
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub election_mode: ElectionMode,
    /// Base64 shared cluster secret, at least 32 bytes decoded.
    #[serde(default)]
    pub auth_key: Option<String>,
    /// Consensus log directory (persistent mode only).
    #[serde(default = "default_raft_dir")]
    pub raft_dir: PathBuf,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            region: String::new(),
            datacenter: String::new(),
            election_mode: ElectionMode::default(),
            auth_key: None,
            raft_dir: default_raft_dir(),
        }
    }
}

fn default_cluster_name() -> String {
    "clusteros".to_string()
}
fn default_raft_dir() -> PathBuf {
    PathBuf::from("/var/lib/clusteros/raft")
}

/// The full, resolved agent configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub networking: NetworkingConfig,
    #[serde(default)]
    pub roles: RolesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

impl Config {
    /// Loads the configuration by layering the TOML file (when present)
    /// under `CLUSTEROS_`-prefixed environment variables, then resolves
    /// and validates it.
    pub fn load(path: Option<&str>) -> Result<Self, ClusterError> {
        let mut builder = config::Config::builder();
        let file = path.unwrap_or("clusteros.toml");
        builder = builder.add_source(config::File::with_name(file).required(path.is_some()));
        builder = builder.add_source(
            config::Environment::with_prefix("CLUSTEROS")
                .separator("__")
                .list_separator(",")
                .try_parsing(true),
        );

        let mut cfg: Config = builder
            .build()
            .map_err(|e| ClusterError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ClusterError::Config(e.to_string()))?;

        // The documented single-underscore secret variable wins over both
        // layers.
        if let Ok(key) = std::env::var(AUTH_KEY_ENV) {
            cfg.cluster.auth_key = Some(key);
        }

        cfg.resolve();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fills in runtime-detected defaults for empty fields.
    pub fn resolve(&mut self) {
        if self.discovery.node_name.is_empty() {
            self.discovery.node_name =
                System::host_name().unwrap_or_else(|| "clusteros-node".to_string());
        }
        if self.roles.capabilities.cpu == 0 {
            self.roles.capabilities.cpu = std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1);
        }
        if self.roles.capabilities.arch.is_empty() {
            self.roles.capabilities.arch = std::env::consts::ARCH.to_string();
        }
        if self.roles.capabilities.ram.is_empty() {
            let mut sys = System::new();
            sys.refresh_memory();
            let gib = sys.total_memory() / (1024 * 1024 * 1024);
            self.roles.capabilities.ram = format!("{}G", gib.max(1));
        }
    }

    /// Rejects configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.discovery.bind_port == 0 {
            return Err(ClusterError::Config(
                "discovery.bind_port must not be 0".into(),
            ));
        }
        if self.networking.listen_port == 0 {
            return Err(ClusterError::Config(
                "networking.listen_port must not be 0".into(),
            ));
        }
        if self.discovery.bind_port == self.networking.listen_port {
            return Err(ClusterError::Config(
                "discovery.bind_port and networking.listen_port must differ".into(),
            ));
        }

        match self.logging.level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ClusterError::Config(format!(
                    "unknown logging.level '{other}' (expected debug, info, warn or error)"
                )));
            }
        }

        if self.cluster.auth_key.is_none() {
            return Err(ClusterError::Config(format!(
                "cluster.auth_key is required (or set {AUTH_KEY_ENV})"
            )));
        }

        self.membership_bind_addr()?;
        self.consensus_bind_addr()?;
        for peer in &self.discovery.bootstrap_peers {
            peer.parse::<SocketAddr>().map_err(|e| {
                ClusterError::Config(format!("invalid bootstrap peer '{peer}': {e}"))
            })?;
        }
        Ok(())
    }

    pub fn membership_bind_addr(&self) -> Result<SocketAddr, ClusterError> {
        format!("{}:{}", self.discovery.bind_addr, self.discovery.bind_port)
            .parse()
            .map_err(|e| ClusterError::Config(format!("invalid discovery bind address: {e}")))
    }

    /// The membership address peers are told to use. A wildcard bind
    /// without an explicit advertise address falls back to loopback.
    pub fn membership_advertise_addr(&self) -> Result<SocketAddr, ClusterError> {
        let host = self.advertise_host();
        format!("{host}:{}", self.discovery.bind_port)
            .parse()
            .map_err(|e| ClusterError::Config(format!("invalid advertise address: {e}")))
    }

    pub fn consensus_bind_addr(&self) -> Result<SocketAddr, ClusterError> {
        format!("{}:{}", self.discovery.bind_addr, self.networking.listen_port)
            .parse()
            .map_err(|e| ClusterError::Config(format!("invalid consensus bind address: {e}")))
    }

    pub fn consensus_advertise_addr(&self) -> Result<SocketAddr, ClusterError> {
        let host = self.advertise_host();
        format!("{host}:{}", self.networking.listen_port)
            .parse()
            .map_err(|e| ClusterError::Config(format!("invalid advertise address: {e}")))
    }

    fn advertise_host(&self) -> String {
        if let Some(addr) = &self.discovery.advertise_addr {
            return addr.clone();
        }
        if self.discovery.bind_addr == "0.0.0.0" || self.discovery.bind_addr == "::" {
            warn!("Wildcard bind with no advertise_addr; advertising loopback");
            return "127.0.0.1".to_string();
        }
        self.discovery.bind_addr.clone()
    }

    pub fn bootstrap_peer_addrs(&self) -> Vec<SocketAddr> {
        self.discovery
            .bootstrap_peers
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect()
    }

    /// The tracing env-filter line derived from the configured level.
    pub fn log_filter(&self) -> String {
        self.logging.level.clone()
    }
}
