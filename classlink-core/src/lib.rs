//! # classlink-core
//!
//! Control-channel client library for classroom devices.
//!
//! This crate contains:
//! - **Protocol types**: `Opcode`, `Message`, operand shapes and directions
//! - **Codec**: `WireCodec` for `[opcode][operand]` frames via `tokio_util`
//! - **Network**: `Connection` with automatic reconnect and backoff, the
//!   `Connector` transport seam and the `LinkListener` fan-out
//! - **Pairing**: `PairingCoordinator` for the request/ack handshake
//! - **Heartbeat**: `HeartbeatScheduler` for periodic status updates and
//!   content triggers
//! - **Discovery**: `ServerDiscovery` for the server's UDP announcement
//! - **State**: connection and pairing state machines
//! - **Error**: `ProtocolError` and `LinkError`, `thiserror`-based

pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod network;
pub mod opcode;
pub mod pairing;
pub mod state;

#[cfg(test)]
mod test_support;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{READ_BUFFER_SIZE, WireCodec, decode, encode};
pub use config::{ConnectionConfig, DiscoveryConfig, HeartbeatConfig, PairingConfig};
pub use discovery::{DiscoveryState, ServerAnnouncement, ServerDiscovery};
pub use error::{LinkError, ProtocolError};
pub use heartbeat::{DeviceActivity, DeviceStatus, HeartbeatScheduler, StatusPayload};
pub use message::Message;
pub use network::{BoxedTransport, Connection, Connector, Endpoint, LinkListener, TcpConnector};
pub use opcode::{Direction, Opcode, OperandShape};
pub use pairing::{PairingCoordinator, PairingOutcome};
pub use state::{ConnectionState, PairingState};
