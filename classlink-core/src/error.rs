//! Domain-specific error types for the control channel.
//!
//! Framing problems are [`ProtocolError`]s: they describe a single bad
//! frame and never bring the connection down. Everything else is a
//! [`LinkError`]. No panics on invalid input; every error is typed and
//! recoverable.

use std::time::Duration;
use thiserror::Error;

use crate::opcode::Opcode;

// ── ProtocolError ────────────────────────────────────────────────

/// A frame could not be turned into a [`Message`](crate::Message).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame contained no bytes at all.
    #[error("cannot decode empty frame")]
    EmptyData,

    /// The first byte does not name any known opcode.
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// The operand does not match the shape the opcode declares.
    #[error("malformed {opcode} frame: {reason}")]
    MalformedData {
        opcode: Opcode,
        reason: &'static str,
    },
}

impl ProtocolError {
    /// The offending byte for [`ProtocolError::UnknownOpcode`].
    pub fn invalid_opcode(&self) -> Option<u8> {
        match self {
            Self::UnknownOpcode(byte) => Some(*byte),
            _ => None,
        }
    }
}

// ── LinkError ────────────────────────────────────────────────────

/// The canonical error type for connection, pairing, heartbeat and
/// discovery operations.
#[derive(Debug, Error)]
pub enum LinkError {
    // ── Protocol ─────────────────────────────────────────────────
    /// A frame was rejected by the wire codec.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // ── Connection ───────────────────────────────────────────────
    /// The socket to `endpoint` could not be established.
    #[error("connection to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// A read or write on an established socket failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// `send` was called while no socket is connected.
    #[error("not connected")]
    NotConnected,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Serialization ────────────────────────────────────────────
    /// Building a JSON payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Discovery ────────────────────────────────────────────────
    /// A UDP datagram was not a valid server announcement.
    #[error("invalid server announcement: {0}")]
    InvalidAnnouncement(String),
}

impl LinkError {
    /// Returns `true` for failures that the reconnect loop recovers from
    /// on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Io(_) | Self::Timeout(_) | Self::Protocol(_)
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        LinkError::Encoding(e.to_string())
    }
}
