//! Pairing handshake.
//!
//! One *attempt set* runs per `start_pairing` call:
//!
//! 1. connect to the server (or reuse a live socket to it)
//! 2. on `Connected`, send `PAIRING_REQUEST <device id>` and arm a timer
//! 3. `PAIRING_ACK` before the timer fires ends the set as `Paired`
//!
//! A lost connection, a failed send or an unreachable server costs one
//! attempt, as does a timer expiry. `retry_count` retries are allowed
//! after the first attempt, then the set ends as `Failed` or `Timeout`.
//!
//! All attempt state lives behind one async mutex; the timer, the
//! connection listener and the public methods each decide under it, so a
//! late ack and an expiring timer can never both win.
//!
//! Each attempt remembers the connection session its `connect()` call
//! returned. State events from any other session are ignored, which
//! keeps queued events of a replaced session from counting as attempts.

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::PairingConfig;
use crate::error::LinkError;
use crate::message::Message;
use crate::network::{Connection, Endpoint, LinkListener};
use crate::opcode::Opcode;
use crate::state::{ConnectionState, PairingState};

/// How an attempt set ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Paired,
    /// Retries exhausted after connection or send failures.
    Failed(String),
    /// Retries exhausted waiting for `PAIRING_ACK`.
    TimedOut,
}

pub type OutcomeCallback = Arc<dyn Fn(PairingOutcome) + Send + Sync>;

/// Drives the pairing handshake over a shared [`Connection`].
///
/// Registers itself as a listener on construction; call
/// [`destroy`](Self::destroy) to detach it.
#[derive(Clone)]
pub struct PairingCoordinator {
    inner: Arc<PairingInner>,
}

struct PairingInner {
    me: Weak<PairingInner>,
    listener: Arc<dyn LinkListener>,
    connection: Connection,
    runtime: Handle,
    config: Mutex<PairingConfig>,
    attempt: tokio::sync::Mutex<AttemptSet>,
    state_tx: watch::Sender<PairingState>,
    callback: RwLock<Option<OutcomeCallback>>,
}

#[derive(Default)]
struct AttemptSet {
    state: PairingState,
    config: PairingConfig,
    target: Option<Target>,
    /// Attempts that have failed so far in this set.
    failures: u32,
    phase: Phase,
    /// Connection session of the current attempt.
    session: u64,
    timer: Option<CancellationToken>,
    timer_seq: u64,
}

struct Target {
    endpoint: Endpoint,
    request: Message,
}

/// Where the current attempt stands relative to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Connecting,
    AwaitingAck,
}

impl PairingCoordinator {
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(connection: Connection, config: PairingConfig) -> Self {
        let (state_tx, _) = watch::channel(PairingState::NotPaired);
        let inner = Arc::new_cyclic(|me: &Weak<PairingInner>| PairingInner {
            me: me.clone(),
            listener: Arc::new(PairingListener { inner: me.clone() }),
            connection,
            runtime: Handle::current(),
            config: Mutex::new(config),
            attempt: tokio::sync::Mutex::new(AttemptSet::default()),
            state_tx,
            callback: RwLock::new(None),
        });
        inner.connection.add_listener(inner.listener.clone());
        Self { inner }
    }

    /// Begin an attempt set against `host:port`.
    ///
    /// Ignored while a set is already in progress. An empty `device_id`
    /// is rejected.
    pub async fn start_pairing(&self, device_id: &str, host: &str, port: u16) -> Result<(), LinkError> {
        let request = Message::pairing_request(device_id)?;
        let endpoint = Endpoint::new(host, port);
        let inner = &self.inner;

        let mut set = inner.attempt.lock().await;
        if set.state.is_in_progress() {
            warn!(device_id, "pairing already in progress");
            return Ok(());
        }

        set.config = *inner.config.lock().unwrap_or_else(PoisonError::into_inner);
        info!(
            device_id,
            %endpoint,
            retries = set.config.retry_count(),
            "starting pairing"
        );
        set.target = Some(Target { endpoint, request });
        set.failures = 0;
        inner.set_state(&mut set, PairingState::InProgress);
        let outcome = inner.dial(&mut set).await;
        drop(set);

        inner.deliver(outcome);
        Ok(())
    }

    /// Abandon the current attempt set and disconnect. No outcome is
    /// reported.
    pub async fn cancel_pairing(&self) {
        let inner = &self.inner;
        let mut set = inner.attempt.lock().await;
        if !set.state.is_in_progress() {
            return;
        }
        info!("pairing cancelled");
        inner.finish(&mut set, PairingState::NotPaired);
        inner.connection.disconnect();
    }

    /// Cancel any attempt and detach from the connection.
    pub async fn destroy(&self) {
        self.cancel_pairing().await;
        self.inner
            .connection
            .remove_listener(&self.inner.listener);
    }

    pub fn set_callback(&self, callback: impl Fn(PairingOutcome) + Send + Sync + 'static) {
        *self
            .inner
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Applies from the next `start_pairing` call.
    pub fn set_config(&self, config: PairingConfig) {
        *self
            .inner
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn config(&self) -> PairingConfig {
        *self
            .inner
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> PairingState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PairingState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_pairing_in_progress(&self) -> bool {
        self.state().is_in_progress()
    }

    /// One-based number of the attempt currently running (or the last
    /// one run).
    pub async fn current_attempt(&self) -> u32 {
        let set = self.inner.attempt.lock().await;
        (set.failures + 1).min(set.config.retry_count().saturating_add(1))
    }
}

impl PairingInner {
    fn set_state(&self, set: &mut AttemptSet, state: PairingState) {
        set.state = state;
        self.state_tx.send_replace(state);
    }

    fn finish(&self, set: &mut AttemptSet, state: PairingState) {
        self.disarm(set);
        set.phase = Phase::Idle;
        self.set_state(set, state);
    }

    fn deliver(&self, outcome: Option<PairingOutcome>) {
        let Some(outcome) = outcome else { return };
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(outcome);
        }
    }

    /// Connect for the next attempt and send at once when the socket is
    /// already up.
    async fn dial(&self, set: &mut AttemptSet) -> Option<PairingOutcome> {
        loop {
            let endpoint = set.target.as_ref()?.endpoint.clone();
            debug!(attempt = set.failures + 1, %endpoint, "pairing attempt");
            set.phase = Phase::Connecting;
            set.session = self.connection.connect(endpoint.host(), endpoint.port());

            let live = self.connection.is_connected()
                && self.connection.endpoint().as_ref() == Some(&endpoint);
            if !live {
                return None;
            }
            match self.send_request(set).await {
                Ok(()) => return None,
                Err(reason) => {
                    if let Some(outcome) = self.record_failure(set, reason) {
                        return Some(outcome);
                    }
                }
            }
        }
    }

    async fn send_request(&self, set: &mut AttemptSet) -> Result<(), String> {
        let Some(target) = set.target.as_ref() else {
            return Err("no pairing target".into());
        };
        match self.connection.send(target.request.clone()).await {
            Ok(()) => {
                set.phase = Phase::AwaitingAck;
                self.arm_timer(set);
                Ok(())
            }
            Err(err) => {
                self.connection.disconnect();
                Err(format!("failed to send pairing request: {err}"))
            }
        }
    }

    /// Count a failed attempt. Returns the terminal outcome once no
    /// retries remain.
    fn record_failure(&self, set: &mut AttemptSet, reason: String) -> Option<PairingOutcome> {
        self.disarm(set);
        set.failures += 1;
        if set.failures <= set.config.retry_count() {
            info!(
                %reason,
                attempt = set.failures + 1,
                of = set.config.retry_count() + 1,
                "retrying pairing"
            );
            return None;
        }
        warn!(%reason, attempts = set.failures, "pairing failed");
        self.finish(set, PairingState::Failed);
        self.connection.disconnect();
        Some(PairingOutcome::Failed(reason))
    }

    async fn retry_or_fail(&self, set: &mut AttemptSet, reason: &str) -> Option<PairingOutcome> {
        match self.record_failure(set, reason.to_owned()) {
            Some(outcome) => Some(outcome),
            None => self.dial(set).await,
        }
    }

    // ── Timer ────────────────────────────────────────────────────

    fn arm_timer(&self, set: &mut AttemptSet) {
        self.disarm(set);
        set.timer_seq += 1;
        let seq = set.timer_seq;
        let token = CancellationToken::new();
        set.timer = Some(token.clone());

        let timeout = set.config.timeout();
        let me = self.me.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(timeout) => {}
            }
            if let Some(inner) = me.upgrade() {
                inner.on_timeout(seq).await;
            }
        });
    }

    fn disarm(&self, set: &mut AttemptSet) {
        if let Some(timer) = set.timer.take() {
            timer.cancel();
        }
    }

    async fn on_timeout(&self, seq: u64) {
        let mut set = self.attempt.lock().await;
        if set.timer_seq != seq || !set.state.is_in_progress() || set.phase != Phase::AwaitingAck {
            return;
        }
        set.timer = None;
        set.failures += 1;

        let outcome = if set.failures <= set.config.retry_count() {
            info!(attempt = set.failures + 1, "no pairing ack, retrying");
            self.connection.disconnect();
            self.dial(&mut set).await
        } else {
            warn!(attempts = set.failures, "pairing timed out");
            self.finish(&mut set, PairingState::Timeout);
            self.connection.disconnect();
            Some(PairingOutcome::TimedOut)
        };
        drop(set);
        self.deliver(outcome);
    }

    // ── Connection events ────────────────────────────────────────

    async fn on_state(&self, session: u64, state: ConnectionState) {
        let mut set = self.attempt.lock().await;
        if !set.state.is_in_progress() {
            return;
        }
        if session != set.session {
            trace!(session, current = set.session, %state, "ignoring state of another session");
            return;
        }

        let outcome = match (set.phase, state) {
            (Phase::Connecting, ConnectionState::Connected) => {
                match self.send_request(&mut set).await {
                    Ok(()) => None,
                    Err(reason) => self.retry_or_fail(&mut set, &reason).await,
                }
            }
            (Phase::Connecting, ConnectionState::Reconnecting | ConnectionState::Disconnected) => {
                self.retry_or_fail(&mut set, "could not reach server").await
            }
            (Phase::AwaitingAck, ConnectionState::Reconnecting | ConnectionState::Disconnected) => {
                self.retry_or_fail(&mut set, "connection lost during pairing")
                    .await
            }
            _ => None,
        };
        drop(set);
        self.deliver(outcome);
    }

    async fn on_ack(&self) {
        let mut set = self.attempt.lock().await;
        if !set.state.is_in_progress() {
            debug!("ignoring pairing ack outside an attempt");
            return;
        }
        info!(attempt = set.failures + 1, "paired");
        self.finish(&mut set, PairingState::Paired);
        drop(set);
        self.deliver(Some(PairingOutcome::Paired));
    }
}

/// Forwards connection events without keeping the coordinator alive.
struct PairingListener {
    inner: Weak<PairingInner>,
}

#[async_trait]
impl LinkListener for PairingListener {
    async fn on_message(&self, message: &Message) {
        if message.opcode() != Opcode::PairingAck {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.on_ack().await;
        }
    }

    async fn on_session_state_changed(&self, session: u64, state: ConnectionState) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_state(session, state).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::config::ConnectionConfig;
    use crate::network::Connector;
    use crate::test_support::{DuplexConnector, Recorder, wait_until};

    struct Harness {
        connector: Arc<DuplexConnector>,
        connection: Connection,
        pairing: PairingCoordinator,
        outcomes: Arc<Mutex<Vec<PairingOutcome>>>,
    }

    fn harness(connector: DuplexConnector, config: PairingConfig) -> Harness {
        let connector = Arc::new(connector);
        let connection = Connection::with_connector(
            connector.clone() as Arc<dyn Connector>,
            ConnectionConfig::default(),
        );
        let pairing = PairingCoordinator::new(connection.clone(), config);
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        pairing.set_callback(move |outcome| sink.lock().unwrap().push(outcome));
        Harness {
            connector,
            connection,
            pairing,
            outcomes,
        }
    }

    impl Harness {
        fn outcomes(&self) -> Vec<PairingOutcome> {
            self.outcomes.lock().unwrap().clone()
        }
    }

    /// Server that answers every pairing request with an ack and counts
    /// the requests it saw.
    fn acking_server(requests: Arc<AtomicUsize>) -> DuplexConnector {
        DuplexConnector::serving(move |mut peer| {
            let requests = requests.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                while let Ok(n) = peer.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    if buf[0] == Opcode::PairingRequest.value() {
                        requests.fetch_add(1, Ordering::SeqCst);
                        let _ = peer.write_all(&[Opcode::PairingAck.value()]).await;
                    }
                }
            });
        })
    }

    /// Server that reads the request and hangs up.
    fn hanging_up_server() -> DuplexConnector {
        DuplexConnector::serving(|mut peer| {
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                let _ = peer.read(&mut buf).await;
            });
        })
    }

    #[tokio::test]
    async fn empty_device_id_rejected() {
        let h = harness(DuplexConnector::new(), PairingConfig::default());
        let err = h.pairing.start_pairing("", "server", 5912).await.unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
        assert_eq!(h.pairing.state(), PairingState::NotPaired);
        assert_eq!(h.connector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_pairs_with_single_connect_and_no_late_timeout() {
        let requests = Arc::new(AtomicUsize::new(0));
        let h = harness(acking_server(requests.clone()), PairingConfig::default());
        h.pairing.start_pairing("dev-42", "server", 5912).await.unwrap();

        wait_until(|| h.pairing.state() == PairingState::Paired).await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(h.pairing.state(), PairingState::Paired);
        assert_eq!(h.outcomes(), vec![PairingOutcome::Paired]);
        assert_eq!(h.connector.attempts(), 1);
        assert_eq!(requests.load(Ordering::SeqCst), 1);
        assert!(h.connection.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_server_uses_exactly_retry_plus_one_connects() {
        for retries in [0u32, 1, 3] {
            let h = harness(
                DuplexConnector::refusing(),
                PairingConfig::default().with_retry_count(retries),
            );
            h.pairing.start_pairing("dev-1", "server", 5912).await.unwrap();

            wait_until(|| h.pairing.state() == PairingState::Failed).await;
            tokio::time::sleep(Duration::from_secs(60)).await;

            assert_eq!(h.connector.attempts(), retries as usize + 1);
            assert_eq!(h.connection.state(), ConnectionState::Disconnected);
            let outcomes = h.outcomes();
            assert_eq!(outcomes.len(), 1);
            assert!(matches!(outcomes[0], PairingOutcome::Failed(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_while_connection_is_dialing_counts_only_its_own_attempts() {
        let h = harness(
            DuplexConnector::refusing().with_delay(Duration::from_millis(500)),
            PairingConfig::default().with_retry_count(0),
        );
        let recorder = Arc::new(Recorder::default());
        h.connection.add_listener(recorder.clone());

        h.connection.connect("server", 5912);
        wait_until(|| recorder.states() == [ConnectionState::Connecting]).await;
        let before = h.connector.attempts();

        h.pairing.start_pairing("dev-3", "server", 5912).await.unwrap();
        wait_until(|| h.pairing.state() == PairingState::Failed).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.connector.attempts() - before, 1);
        assert_eq!(
            h.outcomes(),
            vec![PairingOutcome::Failed("could not reach server".into())]
        );
        assert_eq!(h.connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_connected_of_replaced_session_is_ignored() {
        let h = harness(
            DuplexConnector::refusing().with_delay(Duration::from_millis(500)),
            PairingConfig::default().with_retry_count(0),
        );
        h.pairing.start_pairing("dev-4", "server", 5912).await.unwrap();

        // The state event of a session that no longer exists.
        let stale = h.pairing.inner.attempt.lock().await.session - 1;
        h.pairing
            .inner
            .listener
            .on_session_state_changed(stale, ConnectionState::Connected)
            .await;
        assert_eq!(h.pairing.state(), PairingState::InProgress);

        wait_until(|| h.pairing.state() == PairingState::Failed).await;
        assert_eq!(h.connector.attempts(), 1);
        assert_eq!(
            h.outcomes(),
            vec![PairingOutcome::Failed("could not reach server".into())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_times_out_after_retries() {
        let h = harness(
            DuplexConnector::new(),
            PairingConfig::new(2_000, 1),
        );
        h.pairing.start_pairing("dev-7", "server", 5912).await.unwrap();

        wait_until(|| h.pairing.state() == PairingState::Timeout).await;

        assert_eq!(h.connector.attempts(), 2);
        assert_eq!(h.outcomes(), vec![PairingOutcome::TimedOut]);
        assert_eq!(h.connection.state(), ConnectionState::Disconnected);
        assert_eq!(h.pairing.current_attempt().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_while_waiting_fails() {
        let h = harness(hanging_up_server(), PairingConfig::default().with_retry_count(0));
        h.pairing.start_pairing("dev-9", "server", 5912).await.unwrap();

        wait_until(|| h.pairing.state() == PairingState::Failed).await;

        assert_eq!(
            h.outcomes(),
            vec![PairingOutcome::Failed("connection lost during pairing".into())]
        );
        assert_eq!(h.connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_while_in_progress_is_ignored() {
        let h = harness(DuplexConnector::new(), PairingConfig::default());
        h.pairing.start_pairing("dev-1", "server", 5912).await.unwrap();
        wait_until(|| h.connection.is_connected()).await;

        h.pairing.start_pairing("dev-2", "other", 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.pairing.is_pairing_in_progress());
        assert_eq!(h.connector.attempts(), 1);
        assert_eq!(h.connection.endpoint(), Some(Endpoint::new("server", 5912)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_attempt_silently() {
        let h = harness(DuplexConnector::new(), PairingConfig::default());
        h.pairing.start_pairing("dev-1", "server", 5912).await.unwrap();
        wait_until(|| h.connection.is_connected()).await;

        h.pairing.cancel_pairing().await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(h.pairing.state(), PairingState::NotPaired);
        assert!(h.outcomes().is_empty());
        assert_eq!(h.connection.state(), ConnectionState::Disconnected);
        assert_eq!(h.connector.attempts(), 1);
    }

    #[tokio::test]
    async fn stale_ack_is_ignored() {
        let h = harness(DuplexConnector::new(), PairingConfig::default());
        h.connection.connect("server", 5912);
        wait_until(|| h.connection.is_connected()).await;

        let mut peer = h.connector.take_peer().expect("peer");
        peer.write_all(&[Opcode::PairingAck.value()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.pairing.state(), PairingState::NotPaired);
        assert!(h.outcomes().is_empty());
    }

    #[tokio::test]
    async fn destroy_detaches_listener() {
        let h = harness(DuplexConnector::new(), PairingConfig::default());
        assert_eq!(h.connection.listener_count(), 1);
        h.pairing.destroy().await;
        assert_eq!(h.connection.listener_count(), 0);
    }
}
