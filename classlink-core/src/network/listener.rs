//! Listener registry and the event dispatcher.
//!
//! Every [`Connection`](crate::Connection) owns one dispatcher task. The
//! connection pushes [`LinkEvent`]s into an unbounded channel in the
//! order they happen; the dispatcher drains it and invokes each
//! listener in turn. Listeners therefore never see two events at once,
//! and state changes stay ordered relative to messages.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::error;

use crate::error::LinkError;
use crate::message::Message;
use crate::state::ConnectionState;

/// Subscriber to a connection's events. All methods default to no-ops.
#[async_trait]
pub trait LinkListener: Send + Sync {
    async fn on_message(&self, _message: &Message) {}

    async fn on_connection_state_changed(&self, _state: ConnectionState) {}

    /// State change tagged with the session it belongs to, as returned by
    /// [`Connection::connect`](crate::Connection::connect). Forwards to
    /// [`on_connection_state_changed`](Self::on_connection_state_changed)
    /// unless overridden.
    async fn on_session_state_changed(&self, _session: u64, state: ConnectionState) {
        self.on_connection_state_changed(state).await
    }

    async fn on_error(&self, _error: &LinkError) {}
}

/// One thing that happened on a connection.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    State { session: u64, state: ConnectionState },
    Message(Message),
    Error(LinkError),
}

pub(crate) type EventSender = mpsc::UnboundedSender<LinkEvent>;
pub(crate) type EventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

// ── ListenerRegistry ─────────────────────────────────────────────

/// Unordered set of listeners, safe to modify from inside a callback.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<Arc<dyn LinkListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn LinkListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `listener` unless the same instance is already registered.
    pub fn add(&self, listener: Arc<dyn LinkListener>) {
        let mut listeners = self.lock();
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove(&self, listener: &Arc<dyn LinkListener>) {
        self.lock().retain(|l| !same_listener(l, listener));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current set; callbacks run against this copy.
    pub fn snapshot(&self) -> Vec<Arc<dyn LinkListener>> {
        self.lock().clone()
    }
}

/// Identity by data pointer; vtable pointers of the same type may differ
/// across codegen units.
fn same_listener(a: &Arc<dyn LinkListener>, b: &Arc<dyn LinkListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// ── Dispatcher ───────────────────────────────────────────────────

/// Drain `events` until every sender is gone.
pub(crate) async fn dispatch(registry: Arc<ListenerRegistry>, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        for listener in registry.snapshot() {
            let delivery = async {
                match &event {
                    LinkEvent::State { session, state } => {
                        listener.on_session_state_changed(*session, *state).await
                    }
                    LinkEvent::Message(message) => listener.on_message(message).await,
                    LinkEvent::Error(err) => listener.on_error(err).await,
                }
            };
            if AssertUnwindSafe(delivery).catch_unwind().await.is_err() {
                error!(event = ?event, "listener panicked while handling event");
            }
        }
    }
}
