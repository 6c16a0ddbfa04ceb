//! Device agent core logic.
//!
//! Wires one `Connection` to a `PairingCoordinator` and a
//! `HeartbeatScheduler`, pairs with the configured (or discovered)
//! server and keeps the channel alive until stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{info, warn};

use classlink_core::{
    Connection, ConnectionConfig, ConnectionState, DeviceActivity, DeviceStatus, Endpoint,
    HeartbeatScheduler, LinkError, LinkListener, Message, Opcode, PairingCoordinator,
    PairingOutcome, ServerDiscovery,
};

use crate::config::DeviceConfig;

// ── DeviceAgent ──────────────────────────────────────────────────

/// The top-level device agent.
pub struct DeviceAgent {
    config: DeviceConfig,
    running: Arc<AtomicBool>,
    status: Arc<RwLock<DeviceStatus>>,
}

impl DeviceAgent {
    pub fn new(config: DeviceConfig) -> Self {
        let status = DeviceStatus::new(config.device.id.clone());
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(status)),
        }
    }

    /// Obtain a handle that can be used to stop the agent from another
    /// task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared status snapshot reported on every heartbeat.
    pub fn status_handle(&self) -> Arc<RwLock<DeviceStatus>> {
        Arc::clone(&self.status)
    }

    /// The configured server, or the first one that announces itself.
    pub async fn resolve_server(&self) -> Result<Endpoint, LinkError> {
        let server = &self.config.server;
        if !server.host.is_empty() {
            return Ok(Endpoint::new(server.host.clone(), server.port));
        }
        let discovery = ServerDiscovery::new(self.config.to_discovery_config());
        let announcement = discovery.discover().await?;
        Ok(announcement.tcp_endpoint())
    }

    /// Run the agent until stopped.
    ///
    /// 1. Resolves the server endpoint (config or UDP discovery).
    /// 2. Starts pairing; the heartbeat follows the connection state.
    /// 3. Tears everything down when `running` becomes `false`.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.running.store(true, Ordering::SeqCst);

        let endpoint = self.resolve_server().await?;
        info!(%endpoint, device_id = %self.config.device.id, "using server");

        let connection = Connection::new(ConnectionConfig::default());
        connection.add_listener(Arc::new(StatusTracker {
            status: Arc::clone(&self.status),
        }));

        let heartbeat = HeartbeatScheduler::new(connection.clone(), self.config.to_heartbeat_config());
        let status = Arc::clone(&self.status);
        heartbeat.set_status_provider(move || {
            let mut snapshot = status
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            snapshot.last_updated = SystemTime::now();
            Some(snapshot)
        });
        heartbeat.set_on_material_available(|| info!("new material available on server"));
        heartbeat.set_on_feedback_available(|| info!("feedback available on server"));

        let pairing = PairingCoordinator::new(connection.clone(), self.config.to_pairing_config());
        pairing.set_callback(|outcome| match outcome {
            PairingOutcome::Paired => info!("paired with server"),
            PairingOutcome::Failed(reason) => warn!(%reason, "pairing failed"),
            PairingOutcome::TimedOut => warn!("pairing timed out"),
        });
        pairing
            .start_pairing(&self.config.device.id, endpoint.host(), endpoint.port())
            .await?;

        wait_for_stop(&self.running).await;

        pairing.destroy().await;
        heartbeat.destroy();
        connection.disconnect();
        info!("device agent stopped");
        Ok(())
    }
}

/// Resolves when `running` becomes false.
async fn wait_for_stop(running: &Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

// ── StatusTracker ────────────────────────────────────────────────

/// Keeps the activity field of the status snapshot in step with the
/// lock and connection signals.
struct StatusTracker {
    status: Arc<RwLock<DeviceStatus>>,
}

impl StatusTracker {
    fn set(&self, activity: DeviceActivity) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        status.status = activity;
        status.last_updated = SystemTime::now();
    }
}

#[async_trait]
impl LinkListener for StatusTracker {
    async fn on_message(&self, message: &Message) {
        match message.opcode() {
            Opcode::LockScreen => self.set(DeviceActivity::Locked),
            Opcode::UnlockScreen => self.set(DeviceActivity::OnTask),
            Opcode::Unpair => warn!("server requested unpair"),
            _ => {}
        }
    }

    async fn on_connection_state_changed(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => self.set(DeviceActivity::Idle),
            ConnectionState::Reconnecting | ConnectionState::Disconnected => {
                self.set(DeviceActivity::Disconnected)
            }
            ConnectionState::Connecting => {}
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
