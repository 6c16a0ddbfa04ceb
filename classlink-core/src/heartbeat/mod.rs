//! Periodic `STATUS_UPDATE` and out-of-band content triggers.
//!
//! The scheduler listens on a [`Connection`]: `Connected` starts the
//! periodic job (when enabled), `Disconnected` stops it. Each beat pulls
//! a [`DeviceStatus`] from the installed provider and sends it as JSON.
//! `DISTRIBUTE_MATERIAL` and `RETURN_FEEDBACK` from the server are
//! forwarded to the material and feedback callbacks; fetching the
//! content itself happens elsewhere.

pub mod status;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::HeartbeatConfig;
use crate::error::LinkError;
use crate::message::Message;
use crate::network::{Connection, LinkListener};
use crate::opcode::Opcode;
use crate::state::ConnectionState;

pub use status::{DeviceActivity, DeviceStatus, StatusPayload};

/// Pull callback asked for a snapshot on every beat.
pub type StatusProvider = Arc<dyn Fn() -> Option<DeviceStatus> + Send + Sync>;

/// Zero-argument notification.
pub type Trigger = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct HeartbeatScheduler {
    inner: Arc<HeartbeatInner>,
}

struct HeartbeatInner {
    me: Weak<HeartbeatInner>,
    listener: Arc<dyn LinkListener>,
    connection: Connection,
    runtime: Handle,
    job: Mutex<Job>,
    hooks: RwLock<Hooks>,
}

/// All mutable heartbeat state, so readers never see a count from one
/// beat next to the timestamp of another.
struct Job {
    config: HeartbeatConfig,
    /// Cancels the periodic task; `Some` while running.
    running: Option<CancellationToken>,
    beats: u64,
    last_beat: Option<SystemTime>,
}

#[derive(Default)]
struct Hooks {
    status: Option<StatusProvider>,
    material: Option<Trigger>,
    feedback: Option<Trigger>,
}

impl HeartbeatScheduler {
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(connection: Connection, config: HeartbeatConfig) -> Self {
        let inner = Arc::new_cyclic(|me: &Weak<HeartbeatInner>| HeartbeatInner {
            me: me.clone(),
            listener: Arc::new(HeartbeatListener { inner: me.clone() }),
            connection,
            runtime: Handle::current(),
            job: Mutex::new(Job {
                config,
                running: None,
                beats: 0,
                last_beat: None,
            }),
            hooks: RwLock::new(Hooks::default()),
        });
        inner.connection.add_listener(inner.listener.clone());
        Self { inner }
    }

    /// Start beating. No-op when disabled or already running.
    pub fn start(&self) {
        let mut job = self.inner.job();
        self.inner.start_locked(&mut job);
    }

    pub fn stop(&self) {
        let mut job = self.inner.job();
        if let Some(token) = job.running.take() {
            token.cancel();
            info!("heartbeat stopped");
        }
    }

    /// Replace the configuration, restarting a running job with it.
    pub fn set_config(&self, config: HeartbeatConfig) {
        let mut job = self.inner.job();
        job.config = config;
        if let Some(token) = job.running.take() {
            token.cancel();
            self.inner.start_locked(&mut job);
        }
    }

    pub fn config(&self) -> HeartbeatConfig {
        self.inner.job().config
    }

    /// Send one beat now. Returns `true` when a status update went out.
    pub async fn beat(&self) -> bool {
        self.inner.beat().await
    }

    pub fn set_status_provider(&self, provider: impl Fn() -> Option<DeviceStatus> + Send + Sync + 'static) {
        self.inner.hooks_mut().status = Some(Arc::new(provider));
    }

    pub fn set_on_material_available(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.hooks_mut().material = Some(Arc::new(callback));
    }

    pub fn set_on_feedback_available(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.hooks_mut().feedback = Some(Arc::new(callback));
    }

    pub fn is_running(&self) -> bool {
        self.inner.job().running.is_some()
    }

    pub fn beat_count(&self) -> u64 {
        self.inner.job().beats
    }

    pub fn last_beat(&self) -> Option<SystemTime> {
        self.inner.job().last_beat
    }

    /// Stop the job and detach from the connection.
    pub fn destroy(&self) {
        self.stop();
        self.inner
            .connection
            .remove_listener(&self.inner.listener);
    }
}

impl HeartbeatInner {
    fn job(&self) -> MutexGuard<'_, Job> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hooks_mut(&self) -> std::sync::RwLockWriteGuard<'_, Hooks> {
        self.hooks.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_locked(&self, job: &mut Job) {
        if !job.config.is_enabled() {
            debug!("heartbeat disabled");
            return;
        }
        if job.running.is_some() {
            return;
        }

        let token = CancellationToken::new();
        job.running = Some(token.clone());
        let period = job.config.interval();
        info!(?period, "heartbeat started");

        let me = self.me.clone();
        self.runtime.spawn(async move {
            // First tick completes immediately.
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = me.upgrade() else { break };
                inner.beat().await;
            }
        });
    }

    async fn beat(&self) -> bool {
        if !self.connection.is_connected() {
            trace!("not connected, skipping heartbeat");
            return false;
        }

        let message = match self.status_message() {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "could not build status update");
                return false;
            }
        };

        match self.connection.send(message).await {
            Ok(()) => {
                let mut job = self.job();
                job.beats += 1;
                job.last_beat = Some(SystemTime::now());
                debug!(beats = job.beats, "heartbeat sent");
                true
            }
            Err(err) => {
                warn!(error = %err, "heartbeat send failed");
                false
            }
        }
    }

    fn status_message(&self) -> Result<Message, LinkError> {
        let provider = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
            .clone();
        let payload = provider
            .and_then(|provider| provider())
            .map(|status| StatusPayload::from(&status))
            .unwrap_or_else(StatusPayload::unavailable);
        Ok(Message::status_update(payload.to_json()?)?)
    }

    fn trigger(&self, pick: impl FnOnce(&Hooks) -> Option<Trigger>) {
        let hook = pick(&self.hooks.read().unwrap_or_else(PoisonError::into_inner));
        if let Some(hook) = hook {
            hook();
        }
    }
}

struct HeartbeatListener {
    inner: Weak<HeartbeatInner>,
}

#[async_trait]
impl LinkListener for HeartbeatListener {
    async fn on_message(&self, message: &Message) {
        let Some(inner) = self.inner.upgrade() else { return };
        match message.opcode() {
            Opcode::DistributeMaterial => {
                debug!("material available");
                inner.trigger(|hooks| hooks.material.clone());
            }
            Opcode::ReturnFeedback => {
                debug!("feedback available");
                inner.trigger(|hooks| hooks.feedback.clone());
            }
            _ => {}
        }
    }

    async fn on_connection_state_changed(&self, state: ConnectionState) {
        let Some(inner) = self.inner.upgrade() else { return };
        match state {
            ConnectionState::Connected => {
                let mut job = inner.job();
                inner.start_locked(&mut job);
            }
            ConnectionState::Disconnected => {
                if let Some(token) = inner.job().running.take() {
                    token.cancel();
                    info!("heartbeat stopped, connection closed");
                }
            }
            _ => {}
        }
    }
}
