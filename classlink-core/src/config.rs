//! Runtime configuration for the connection, pairing, heartbeat and
//! discovery components.
//!
//! Out-of-range values are clamped into range rather than rejected.

use std::time::Duration;

use crate::codec::READ_BUFFER_SIZE;

// ── ConnectionConfig ─────────────────────────────────────────────

/// Configuration for [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the reconnect delay.
    pub max_backoff: Duration,
    /// Largest single read handed to the decoder as one frame.
    pub read_buffer_size: usize,
    /// Deadline for one socket-establish attempt.
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
    pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(8000);
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Self::DEFAULT_INITIAL_BACKOFF,
            max_backoff: Self::DEFAULT_MAX_BACKOFF,
            read_buffer_size: READ_BUFFER_SIZE,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

// ── PairingConfig ────────────────────────────────────────────────

/// Configuration for [`PairingCoordinator`](crate::PairingCoordinator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingConfig {
    timeout: Duration,
    retry_count: u32,
}

impl PairingConfig {
    pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
    pub const MIN_TIMEOUT_MS: u64 = 1_000;
    pub const MAX_TIMEOUT_MS: u64 = 60_000;
    pub const DEFAULT_RETRY_COUNT: u32 = 3;

    /// `timeout_ms` is clamped to `[1000, 60000]`.
    pub fn new(timeout_ms: u64, retry_count: u32) -> Self {
        Self {
            timeout: Duration::from_millis(
                timeout_ms.clamp(Self::MIN_TIMEOUT_MS, Self::MAX_TIMEOUT_MS),
            ),
            retry_count,
        }
    }

    /// How long to wait for `PAIRING_ACK` after sending the request.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Retries after the first attempt; `k` retries allow `k + 1`
    /// attempts in total.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn with_timeout(self, timeout_ms: u64) -> Self {
        Self::new(timeout_ms, self.retry_count)
    }

    pub fn with_retry_count(self, retry_count: u32) -> Self {
        Self::new(self.timeout.as_millis() as u64, retry_count)
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT_MS, Self::DEFAULT_RETRY_COUNT)
    }
}

// ── HeartbeatConfig ──────────────────────────────────────────────

/// Configuration for [`HeartbeatScheduler`](crate::HeartbeatScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    interval: Duration,
    enabled: bool,
}

impl HeartbeatConfig {
    pub const DEFAULT_INTERVAL_MS: u64 = 5_000;
    pub const MIN_INTERVAL_MS: u64 = 1_000;
    pub const MAX_INTERVAL_MS: u64 = 60_000;

    /// `interval_ms` is clamped to `[1000, 60000]`.
    pub fn new(interval_ms: u64, enabled: bool) -> Self {
        Self {
            interval: Duration::from_millis(
                interval_ms.clamp(Self::MIN_INTERVAL_MS, Self::MAX_INTERVAL_MS),
            ),
            enabled,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn with_interval(self, interval_ms: u64) -> Self {
        Self::new(interval_ms, self.enabled)
    }

    pub fn enabled(self) -> Self {
        Self {
            enabled: true,
            ..self
        }
    }

    pub fn disabled(self) -> Self {
        Self {
            enabled: false,
            ..self
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL_MS, true)
    }
}

// ── DiscoveryConfig ──────────────────────────────────────────────

/// Configuration for [`ServerDiscovery`](crate::ServerDiscovery).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// UDP port the server broadcasts its announcement to.
    pub port: u16,
    /// How long to listen before giving up.
    pub timeout: Duration,
}

impl DiscoveryConfig {
    pub const DEFAULT_PORT: u16 = 5913;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(15_000);
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: Self::DEFAULT_PORT,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_defaults() {
        let cfg = PairingConfig::default();
        assert_eq!(cfg.timeout(), Duration::from_millis(10_000));
        assert_eq!(cfg.retry_count(), 3);
    }

    #[test]
    fn pairing_timeout_clamps() {
        assert_eq!(
            PairingConfig::new(10, 1).timeout(),
            Duration::from_millis(1_000)
        );
        assert_eq!(
            PairingConfig::new(600_000, 1).timeout(),
            Duration::from_millis(60_000)
        );
    }

    #[test]
    fn pairing_builders() {
        let cfg = PairingConfig::default().with_timeout(2_500).with_retry_count(0);
        assert_eq!(cfg.timeout(), Duration::from_millis(2_500));
        assert_eq!(cfg.retry_count(), 0);
    }

    #[test]
    fn heartbeat_defaults() {
        let cfg = HeartbeatConfig::default();
        assert_eq!(cfg.interval(), Duration::from_millis(5_000));
        assert!(cfg.is_enabled());
    }

    #[test]
    fn heartbeat_interval_clamps() {
        assert_eq!(
            HeartbeatConfig::new(0, true).interval(),
            Duration::from_millis(1_000)
        );
        assert_eq!(
            HeartbeatConfig::new(u64::MAX, true).interval(),
            Duration::from_millis(60_000)
        );
    }

    #[test]
    fn heartbeat_toggles_keep_interval() {
        let cfg = HeartbeatConfig::new(2_000, true).disabled();
        assert!(!cfg.is_enabled());
        assert_eq!(cfg.interval(), Duration::from_millis(2_000));
        assert!(cfg.enabled().is_enabled());
        assert_eq!(
            cfg.with_interval(3_000).interval(),
            Duration::from_millis(3_000)
        );
    }

    #[test]
    fn connection_defaults() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.initial_backoff, Duration::from_millis(1000));
        assert_eq!(cfg.max_backoff, Duration::from_millis(8000));
        assert_eq!(cfg.read_buffer_size, 4096);
    }

    #[test]
    fn discovery_defaults() {
        let cfg = DiscoveryConfig::default();
        assert_eq!(cfg.port, 5913);
        assert_eq!(cfg.timeout, Duration::from_secs(15));
    }
}
