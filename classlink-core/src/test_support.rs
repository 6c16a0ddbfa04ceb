//! In-memory transports and listeners shared by the unit tests.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::time::Instant;

use crate::error::LinkError;
use crate::message::Message;
use crate::network::listener::LinkListener;
use crate::network::transport::{BoxedTransport, Connector, Endpoint};
use crate::state::ConnectionState;

/// Poll `cond` until it holds. Panics after two minutes of (possibly
/// virtual) time.
pub(crate) async fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(120);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

type Responder = Arc<dyn Fn(DuplexStream) + Send + Sync>;

/// Connector handing out `tokio::io::duplex` pipes. The server side of
/// each pipe is either kept for the test or passed to a responder.
#[derive(Default)]
pub(crate) struct DuplexConnector {
    refuse: AtomicBool,
    delay: Duration,
    attempts: AtomicUsize,
    attempt_times: Mutex<Vec<Instant>>,
    peers: Mutex<Vec<DuplexStream>>,
    responder: Option<Responder>,
}

impl DuplexConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn refusing() -> Self {
        let connector = Self::default();
        connector.refuse.store(true, Ordering::SeqCst);
        connector
    }

    /// Every accepted pipe goes to `responder`, which is expected to
    /// spawn whatever plays the server.
    pub(crate) fn serving(responder: impl Fn(DuplexStream) + Send + Sync + 'static) -> Self {
        Self {
            responder: Some(Arc::new(responder)),
            ..Self::default()
        }
    }

    /// Each attempt takes `delay` before it resolves.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.attempt_times.lock().unwrap().clone()
    }

    /// Server side of the most recent pipe.
    pub(crate) fn take_peer(&self) -> Option<DuplexStream> {
        self.peers.lock().unwrap().pop()
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self, _endpoint: &Endpoint) -> io::Result<BoxedTransport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempt_times.lock().unwrap().push(Instant::now());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        let (client, server) = tokio::io::duplex(64 * 1024);
        match &self.responder {
            Some(responder) => responder(server),
            None => self.peers.lock().unwrap().push(server),
        }
        Ok(Box::new(client))
    }
}

/// Records each `poll_write` call as one chunk; reads never complete.
#[derive(Default)]
pub(crate) struct RecordingConnector {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingConnector {
    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn connect(&self, _endpoint: &Endpoint) -> io::Result<BoxedTransport> {
        Ok(Box::new(RecordingTransport {
            writes: self.writes.clone(),
        }))
    }
}

struct RecordingTransport {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl AsyncRead for RecordingTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for RecordingTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.writes.lock().unwrap().push(buf.to_vec());
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Listener that remembers everything it was told.
#[derive(Default)]
pub(crate) struct Recorder {
    states: Mutex<Vec<ConnectionState>>,
    messages: Mutex<Vec<Message>>,
    errors: Mutex<Vec<String>>,
}

impl Recorder {
    pub(crate) fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().unwrap().clone()
    }

    pub(crate) fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl LinkListener for Recorder {
    async fn on_message(&self, message: &Message) {
        self.messages.lock().unwrap().push(message.clone());
    }

    async fn on_connection_state_changed(&self, state: ConnectionState) {
        self.states.lock().unwrap().push(state);
    }

    async fn on_error(&self, error: &LinkError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}
