//! Node configuration
//!
//! Gathered by the embedding application (CLI flags, a JSON file, or code)
//! and validated once before a [`Node`](crate::Node) is built.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::announcement::DiscoveryMode;
use crate::discovery::DiscoveryConfig;
use crate::error::{ChatError, ChatResult};
use crate::identity::validate_username;

/// Default discovery port (matches the reference deployment)
pub const DEFAULT_PORT: u16 = 55555;

/// Default seconds between announcements
pub const DEFAULT_ANNOUNCE_INTERVAL_SECS: u64 = 5;

/// Default seconds a presence record stays live without a fresh announcement
pub const DEFAULT_PRESENCE_TTL_SECS: u64 = 300;

/// UDP transport parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Local interface to bind
    pub bind: IpAddr,
    /// Discovery port, used both for binding and as the broadcast target port
    pub port: u16,
    /// Broadcast destination
    pub broadcast_addr: IpAddr,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
        }
    }
}

impl UdpConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_addr, self.port)
    }
}

/// Everything a node needs at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Username to announce (required, non-empty)
    pub username: String,

    /// Shared discovery passphrase; absent means cleartext announcements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_passphrase: Option<String>,

    /// Seconds a peer stays listed after its last announcement
    #[serde(default = "default_presence_ttl")]
    pub presence_ttl_secs: u64,

    /// Seconds between our own announcements
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,

    /// Seconds between expiry sweeps; defaults to the announce interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_interval_secs: Option<u64>,

    #[serde(default)]
    pub udp: UdpConfig,
}

fn default_presence_ttl() -> u64 {
    DEFAULT_PRESENCE_TTL_SECS
}

fn default_announce_interval() -> u64 {
    DEFAULT_ANNOUNCE_INTERVAL_SECS
}

impl NodeConfig {
    /// Config with defaults for everything but the username.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            discovery_passphrase: None,
            presence_ttl_secs: DEFAULT_PRESENCE_TTL_SECS,
            announce_interval_secs: DEFAULT_ANNOUNCE_INTERVAL_SECS,
            eviction_interval_secs: None,
            udp: UdpConfig::default(),
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.discovery_passphrase = Some(passphrase.into());
        self
    }

    pub fn with_presence_ttl(mut self, ttl: Duration) -> Self {
        self.presence_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval_secs = interval.as_secs();
        self
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            ChatError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "Loaded node config");
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> ChatResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ChatError::Serialization(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Reject configs the node cannot run with.
    pub fn validate(&self) -> ChatResult<()> {
        validate_username(self.username.trim())?;
        if self.announce_interval_secs == 0 {
            return Err(ChatError::Config(
                "announce interval must be at least 1 second".to_string(),
            ));
        }
        if self.eviction_interval_secs == Some(0) {
            return Err(ChatError::Config(
                "eviction interval must be at least 1 second".to_string(),
            ));
        }
        if self.presence_ttl_secs < self.announce_interval_secs {
            return Err(ChatError::Config(format!(
                "presence TTL ({}s) is shorter than the announce interval ({}s)",
                self.presence_ttl_secs, self.announce_interval_secs
            )));
        }
        Ok(())
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(
            self.eviction_interval_secs
                .unwrap_or(self.announce_interval_secs),
        )
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            announce_interval: self.announce_interval(),
            eviction_interval: self.eviction_interval(),
        }
    }

    pub fn discovery_mode(&self) -> DiscoveryMode {
        DiscoveryMode::from_passphrase(self.discovery_passphrase.as_deref())
    }
}
