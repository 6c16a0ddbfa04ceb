//! Resilient control-channel connection.
//!
//! A [`Connection`] owns at most one live socket to one endpoint. Failed
//! establish attempts and dropped sockets move it to
//! [`ConnectionState::Reconnecting`] and a retry is scheduled with
//! exponential backoff until [`Connection::disconnect`] is called.
//!
//! Internally every socket and every scheduled retry belongs to an
//! *epoch*. `connect()`, `disconnect()` and each failure bump the epoch,
//! and workers check it under the state lock before touching anything,
//! so a stale reader or timer can never resurrect a torn-down session.
//!
//! The epoch is internal. Listeners see the coarser *session*: one per
//! `connect()` or `disconnect()` call, spanning all the retries in
//! between. State events carry it so an observer can tell its own
//! session from one it replaced.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{SinkExt, StreamExt};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::WireCodec;
use crate::config::ConnectionConfig;
use crate::error::LinkError;
use crate::message::Message;
use crate::network::backoff::Backoff;
use crate::network::listener::{EventSender, LinkEvent, LinkListener, ListenerRegistry, dispatch};
use crate::network::transport::{BoxedTransport, Connector, Endpoint, TcpConnector};
use crate::state::ConnectionState;

type FrameWriter = FramedWrite<WriteHalf<BoxedTransport>, WireCodec>;
type FrameReader = FramedRead<ReadHalf<BoxedTransport>, WireCodec>;
type SharedWriter = Arc<tokio::sync::Mutex<FrameWriter>>;

/// Handle to a control-channel connection. Cheap to clone; all clones
/// drive the same socket.
///
/// Background tasks keep the connection alive until
/// [`disconnect`](Self::disconnect) is called.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    runtime: Handle,
    link: Mutex<LinkState>,
    events: EventSender,
    state_tx: watch::Sender<ConnectionState>,
    listeners: Arc<ListenerRegistry>,
}

/// Everything guarded by the connection lock.
struct LinkState {
    phase: ConnectionState,
    endpoint: Option<Endpoint>,
    should_reconnect: bool,
    backoff: Backoff,
    epoch: u64,
    /// Bumped by `connect()` and `disconnect()`; tags state events.
    session_id: u64,
    session: CancellationToken,
    writer: Option<SharedWriter>,
}

impl Connection {
    /// Connection over plain TCP.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connector(Arc::new(TcpConnector), config)
    }

    /// Connection whose sockets come from `connector`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_connector(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Self {
        let runtime = Handle::current();
        let (events, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let listeners = Arc::new(ListenerRegistry::new());
        runtime.spawn(dispatch(listeners.clone(), rx));

        let link = LinkState {
            phase: ConnectionState::Disconnected,
            endpoint: None,
            should_reconnect: false,
            backoff: Backoff::new(config.initial_backoff, config.max_backoff),
            epoch: 0,
            session_id: 0,
            session: CancellationToken::new(),
            writer: None,
        };

        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                runtime,
                link: Mutex::new(link),
                events,
                state_tx,
                listeners,
            }),
        }
    }

    // ── Listeners ────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Arc<dyn LinkListener>) {
        self.inner.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn LinkListener>) {
        self.inner.listeners.remove(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start connecting to `host:port` in the background.
    ///
    /// Returns immediately with the session the attempt belongs to. A
    /// no-op when already connected to the same endpoint, in which case
    /// the live session is returned; otherwise any existing socket or
    /// pending retry is dropped and a new session starts with the initial
    /// backoff.
    ///
    /// A new session always announces `Connecting`, even when the
    /// replaced one was already connecting.
    pub fn connect(&self, host: impl Into<String>, port: u16) -> u64 {
        let endpoint = Endpoint::new(host, port);
        let inner = &self.inner;

        let mut link = inner.lock();
        if link.phase.is_connected() && link.endpoint.as_ref() == Some(&endpoint) {
            debug!(%endpoint, "already connected");
            return link.session_id;
        }

        info!(%endpoint, "connecting");
        link.endpoint = Some(endpoint.clone());
        link.should_reconnect = true;
        link.backoff.reset();
        let epoch = inner.begin_session(&mut link);
        link.session_id += 1;
        let session = link.session_id;
        let cancel = link.session.clone();
        inner.announce(&mut link, ConnectionState::Connecting);
        drop(link);

        let task = Arc::clone(inner);
        inner
            .runtime
            .spawn(async move { task.run_attempt(epoch, endpoint, cancel).await });
        session
    }

    /// Close the socket, cancel any pending retry and stay disconnected.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let mut link = inner.lock();
        link.should_reconnect = false;
        inner.begin_session(&mut link);
        link.session_id += 1;
        if !link.phase.is_disconnected() {
            info!(endpoint = ?link.endpoint, "disconnecting");
        }
        inner.transition(&mut link, ConnectionState::Disconnected);
    }

    /// Encode and write one message, flushing before returning.
    ///
    /// Fails with [`LinkError::NotConnected`] when no socket is up; does
    /// not trigger a reconnect.
    pub async fn send(&self, message: Message) -> Result<(), LinkError> {
        let writer = {
            let link = self.inner.lock();
            match (&link.phase, &link.writer) {
                (ConnectionState::Connected, Some(writer)) => writer.clone(),
                _ => return Err(LinkError::NotConnected),
            }
        };

        let mut writer = writer.lock().await;
        debug!(%message, "sending");
        writer.send(message).await
    }

    // ── Observers ────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().phase
    }

    /// Stream of state changes. The receiver starts at the current state.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The endpoint of the last `connect()` call.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.inner.lock().endpoint.clone()
    }

    /// The delay the next failure will be scheduled with.
    pub fn current_backoff(&self) -> std::time::Duration {
        self.inner.lock().backoff.current()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = self.inner.lock();
        f.debug_struct("Connection")
            .field("state", &link.phase)
            .field("endpoint", &link.endpoint)
            .field("epoch", &link.epoch)
            .finish()
    }
}

// ── Workers ──────────────────────────────────────────────────────

impl Inner {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invalidate every worker of the current session.
    fn begin_session(&self, link: &mut LinkState) -> u64 {
        link.epoch += 1;
        link.session.cancel();
        link.session = CancellationToken::new();
        link.writer = None;
        link.epoch
    }

    /// Must be called with the lock held so events leave in transition
    /// order.
    fn transition(&self, link: &mut LinkState, next: ConnectionState) {
        if link.phase == next {
            return;
        }
        self.announce(link, next);
    }

    /// Like `transition`, but emits even when the state is unchanged.
    fn announce(&self, link: &mut LinkState, next: ConnectionState) {
        debug!(from = %link.phase, to = %next, session = link.session_id, "connection state");
        link.phase = next;
        self.state_tx.send_replace(next);
        self.emit(LinkEvent::State {
            session: link.session_id,
            state: next,
        });
    }

    fn emit(&self, event: LinkEvent) {
        // Only fails once the dispatcher is gone, i.e. at runtime shutdown.
        let _ = self.events.send(event);
    }

    fn emit_if_current(&self, epoch: u64, event: LinkEvent) -> bool {
        let link = self.lock();
        if link.epoch != epoch {
            return false;
        }
        self.emit(event);
        true
    }

    async fn run_attempt(
        self: Arc<Self>,
        epoch: u64,
        endpoint: Endpoint,
        cancel: CancellationToken,
    ) {
        let timeout = self.config.connect_timeout;
        let attempt = tokio::time::timeout(timeout, self.connector.connect(&endpoint));
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = attempt => result,
        };

        match result {
            Ok(Ok(transport)) => self.on_connected(epoch, &endpoint, transport, cancel),
            Ok(Err(source)) => self.on_failure(
                epoch,
                LinkError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                },
            ),
            Err(_) => self.on_failure(epoch, LinkError::Timeout(timeout)),
        }
    }

    fn on_connected(
        self: &Arc<Self>,
        epoch: u64,
        endpoint: &Endpoint,
        transport: BoxedTransport,
        cancel: CancellationToken,
    ) {
        let buffer = self.config.read_buffer_size;
        let (read, write) = tokio::io::split(transport);

        let mut link = self.lock();
        if link.epoch != epoch {
            debug!(%endpoint, "discarding socket from a superseded attempt");
            return;
        }
        let writer = FramedWrite::new(write, WireCodec::new(buffer));
        link.writer = Some(Arc::new(tokio::sync::Mutex::new(writer)));
        link.backoff.reset();
        self.transition(&mut link, ConnectionState::Connected);
        drop(link);

        info!(%endpoint, "connected");
        let reader = FramedRead::with_capacity(read, WireCodec::new(buffer), buffer);
        let task = Arc::clone(self);
        self.runtime
            .spawn(async move { task.read_loop(epoch, reader, cancel).await });
    }

    async fn read_loop(self: Arc<Self>, epoch: u64, mut reader: FrameReader, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                next = reader.next() => next,
            };

            match next {
                Some(Ok(Ok(message))) => {
                    trace!(%message, "received");
                    if !self.emit_if_current(epoch, LinkEvent::Message(message)) {
                        return;
                    }
                }
                Some(Ok(Err(err))) => {
                    warn!(error = %err, "discarding malformed frame");
                    if !self.emit_if_current(epoch, LinkEvent::Error(err.into())) {
                        return;
                    }
                }
                Some(Err(err)) => {
                    self.on_failure(epoch, err);
                    return;
                }
                None => {
                    let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "closed by peer");
                    self.on_failure(epoch, LinkError::Io(eof));
                    return;
                }
            }
        }
    }

    /// Tear down the socket of `epoch` and schedule the next attempt.
    fn on_failure(self: &Arc<Self>, epoch: u64, err: LinkError) {
        let mut link = self.lock();
        if link.epoch != epoch {
            return;
        }
        warn!(error = %err, "connection failure");
        self.emit(LinkEvent::Error(err));
        link.writer = None;

        let endpoint = match link.endpoint.clone() {
            Some(endpoint) if link.should_reconnect => endpoint,
            _ => {
                self.transition(&mut link, ConnectionState::Disconnected);
                return;
            }
        };

        let delay = link.backoff.next_delay();
        link.epoch += 1;
        let epoch = link.epoch;
        let cancel = link.session.clone();
        self.transition(&mut link, ConnectionState::Reconnecting);
        drop(link);

        info!(%endpoint, ?delay, "reconnect scheduled");
        let task = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            {
                let mut link = task.lock();
                if link.epoch != epoch || !link.should_reconnect {
                    return;
                }
                task.transition(&mut link, ConnectionState::Connecting);
            }
            task.run_attempt(epoch, endpoint, cancel).await;
        });
    }
}
