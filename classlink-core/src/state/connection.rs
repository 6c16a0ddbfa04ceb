//! Connection state published by [`Connection`](crate::Connection).
//!
//! ```text
//!  Disconnected ──► Connecting ──► Connected
//!       ▲              ▲  │            │
//!       │              │  ▼            ▼
//!       │          Reconnecting ◄──────┘
//!       │              │
//!       └── disconnect() from any state
//! ```
//!
//! The state cycles for the lifetime of the connection; there is no
//! terminal value.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No socket and no reconnect pending. Initial state, and the state
    /// after an explicit `disconnect()`.
    #[default]
    Disconnected,

    /// A socket-establish attempt is in flight.
    Connecting,

    /// The socket is up; messages flow both ways.
    Connected,

    /// The last attempt failed or the socket dropped; a retry is
    /// scheduled after the current backoff delay.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

impl ConnectionState {
    /// Returns `true` when the socket is established and ready for
    /// protocol traffic.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` when nothing is in flight and nothing is scheduled.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Returns `true` while the connection is trying to (re)establish
    /// the socket.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    /// Returns `true` when the socket is gone, whether or not a retry is
    /// scheduled.
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Reconnecting)
    }
}
