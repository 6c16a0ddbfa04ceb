//! Configuration for the device agent.

use std::path::Path;

use serde::{Deserialize, Serialize};

use classlink_core::{DiscoveryConfig, HeartbeatConfig, PairingConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub server: ServerSection,
    pub pairing: PairingSection,
    pub heartbeat: HeartbeatSection,
    pub discovery: DiscoverySection,
    pub logging: LoggingConfig,
}

/// Identity of this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Device id sent in `PAIRING_REQUEST` and status updates.
    pub id: String,
}

/// Where the teacher server lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Server address. Empty means "find it via UDP discovery".
    pub host: String,
    /// Control-channel TCP port.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingSection {
    /// Wait for `PAIRING_ACK`, in milliseconds (1000..=60000).
    pub timeout_ms: u64,
    /// Retries after the first attempt. Negative values count as 0.
    pub retry_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSection {
    pub enabled: bool,
    /// Milliseconds between status updates (1000..=60000).
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// UDP port the server announces itself on.
    pub port: u16,
    pub timeout_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive, e.g. "info" or
    /// "classlink_core=debug".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            id: "classroom-device".into(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5912,
        }
    }
}

impl Default for PairingSection {
    fn default() -> Self {
        Self {
            timeout_ms: PairingConfig::DEFAULT_TIMEOUT_MS,
            retry_count: i64::from(PairingConfig::DEFAULT_RETRY_COUNT),
        }
    }
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: HeartbeatConfig::DEFAULT_INTERVAL_MS,
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            port: DiscoveryConfig::DEFAULT_PORT,
            timeout_ms: DiscoveryConfig::DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl DeviceConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn to_pairing_config(&self) -> PairingConfig {
        let retries = self.pairing.retry_count.clamp(0, i64::from(u32::MAX)) as u32;
        PairingConfig::new(self.pairing.timeout_ms, retries)
    }

    pub fn to_heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig::new(self.heartbeat.interval_ms, self.heartbeat.enabled)
    }

    pub fn to_discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            port: self.discovery.port,
            timeout: std::time::Duration::from_millis(self.discovery.timeout_ms.max(1)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
