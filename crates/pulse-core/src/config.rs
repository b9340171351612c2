//! Configuration system for Pulse.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PULSE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/pulse/config.toml
//!   3. ~/.config/pulse/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{ANNOUNCE_INTERVAL_MS, DEFAULT_PEER_PORT, MULTICAST_ADDR};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub discovery: DiscoveryConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Instance identity token. Empty = random UUID per process.
    pub id: String,
    /// Local IP address. Empty = outbound-facing address.
    pub ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port of the inbound handshake listener.
    pub listen_port: u16,
    /// How long an inbound connection may take to send its identity line.
    pub inbound_read_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// IPv4 multicast group and port, e.g. "239.0.0.0:9999".
    pub multicast_addr: String,
    /// Local IPv4 address of the interface to join the group on. Empty = any.
    pub interface: String,
    /// TCP port assumed for discovered peers that do not advertise one.
    pub peer_port: u16,
    pub announce_interval_ms: u64,
    /// Multicast TTL. 1 keeps beacons on the local link.
    pub multicast_ttl: u32,
    /// Send our listen port in the beacon and accept beacons that carry one.
    pub advertise_port: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub period_ms: u64,
    /// Applied separately to connect, write, and read.
    pub timeout_ms: u64,
    /// Upper bound on peer checks in flight during one tick.
    pub max_concurrent_checks: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_PEER_PORT,
            inbound_read_timeout_ms: 5_000,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_addr: MULTICAST_ADDR.to_string(),
            interface: String::new(),
            peer_port: DEFAULT_PEER_PORT,
            announce_interval_ms: ANNOUNCE_INTERVAL_MS,
            multicast_ttl: 1,
            advertise_port: false,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period_ms: 3_000,
            timeout_ms: 1_000,
            max_concurrent_checks: 64,
        }
    }
}

// ── Accessors ─────────────────────────────────────────────────────────────────

impl NetworkConfig {
    pub fn inbound_read_timeout(&self) -> Duration {
        Duration::from_millis(self.inbound_read_timeout_ms)
    }
}

impl DiscoveryConfig {
    /// Parsed multicast group. Checked by [`PulseConfig::validate`].
    pub fn group(&self) -> Result<SocketAddrV4, ConfigError> {
        let addr: SocketAddrV4 = self
            .multicast_addr
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("multicast_addr {:?}", self.multicast_addr)))?;
        if !addr.ip().is_multicast() {
            return Err(ConfigError::Invalid(format!(
                "multicast_addr {} is not a multicast group",
                addr
            )));
        }
        Ok(addr)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }
}

impl HeartbeatConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("pulse")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PulseConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit file path, then apply env overrides.
    /// A missing file yields defaults.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            PulseConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PULSE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&PulseConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.discovery.group()?;
        if self.discovery.announce_interval_ms == 0 {
            return Err(ConfigError::Invalid("announce_interval_ms must be > 0".into()));
        }
        if self.heartbeat.period_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat period_ms must be > 0".into()));
        }
        if self.heartbeat.timeout_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat timeout_ms must be > 0".into()));
        }
        if self.heartbeat.max_concurrent_checks == 0 {
            return Err(ConfigError::Invalid("max_concurrent_checks must be > 0".into()));
        }
        Ok(())
    }

    /// Apply PULSE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("PULSE_IDENTITY__ID") {
            self.identity.id = v;
        }
        if let Some(v) = get("PULSE_IDENTITY__IP") {
            self.identity.ip = v;
        }
        if let Some(p) = get("PULSE_NETWORK__LISTEN_PORT").and_then(|v| v.parse().ok()) {
            self.network.listen_port = p;
        }
        if let Some(ms) = get("PULSE_NETWORK__INBOUND_READ_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.network.inbound_read_timeout_ms = ms;
        }
        if let Some(v) = get("PULSE_DISCOVERY__MULTICAST_ADDR") {
            self.discovery.multicast_addr = v;
        }
        if let Some(v) = get("PULSE_DISCOVERY__INTERFACE") {
            self.discovery.interface = v;
        }
        if let Some(p) = get("PULSE_DISCOVERY__PEER_PORT").and_then(|v| v.parse().ok()) {
            self.discovery.peer_port = p;
        }
        if let Some(ms) = get("PULSE_DISCOVERY__ANNOUNCE_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.discovery.announce_interval_ms = ms;
        }
        if let Some(ttl) = get("PULSE_DISCOVERY__MULTICAST_TTL").and_then(|v| v.parse().ok()) {
            self.discovery.multicast_ttl = ttl;
        }
        if let Some(v) = get("PULSE_DISCOVERY__ADVERTISE_PORT") {
            self.discovery.advertise_port = v == "true" || v == "1";
        }
        if let Some(ms) = get("PULSE_HEARTBEAT__PERIOD_MS").and_then(|v| v.parse().ok()) {
            self.heartbeat.period_ms = ms;
        }
        if let Some(ms) = get("PULSE_HEARTBEAT__TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.heartbeat.timeout_ms = ms;
        }
        if let Some(n) = get("PULSE_HEARTBEAT__MAX_CONCURRENT_CHECKS").and_then(|v| v.parse().ok()) {
            self.heartbeat.max_concurrent_checks = n;
        }
    }
}
