//! Opcode table for the control channel.
//!
//! Uses a proper enum with `TryFrom`; no panics on unknown values.

use std::fmt;

use crate::error::ProtocolError;

// ── Direction ────────────────────────────────────────────────────

/// Which peer originates a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Teacher server → classroom device.
    ServerToClient,
    /// Classroom device → teacher server.
    ClientToServer,
}

// ── OperandShape ─────────────────────────────────────────────────

/// What, if anything, follows the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandShape {
    /// Nothing is expected. Trailing bytes are carried but ignored.
    None,
    /// A UTF-8 device identifier.
    DeviceId,
    /// A UTF-8 JSON document.
    Json,
}

impl OperandShape {
    /// Returns `true` if a frame of this shape must carry a non-empty
    /// UTF-8 operand.
    pub fn is_text(&self) -> bool {
        !matches!(self, OperandShape::None)
    }
}

// ── Opcode ───────────────────────────────────────────────────────

/// All opcodes understood by the control channel.
///
/// Organized by range:
/// - `0x01..0x0F`: server commands and signals
/// - `0x10..0x1F`: device status and acknowledgements
/// - `0x20..0x2F`: pairing handshake
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ── Server → device (0x0x) ───────────────────────────────────
    /// Lock the device screen.
    LockScreen = 0x01,
    /// Unlock the device screen.
    UnlockScreen = 0x02,
    /// Re-fetch device configuration.
    RefreshConfig = 0x03,
    /// Forget the pairing with this server.
    Unpair = 0x04,
    /// New material is ready to be fetched.
    DistributeMaterial = 0x05,
    /// The teacher acknowledged a raised hand.
    HandAck = 0x06,
    /// Feedback is ready to be fetched.
    ReturnFeedback = 0x07,

    // ── Device → server (0x1x) ───────────────────────────────────
    /// Periodic status beacon.
    StatusUpdate = 0x10,
    /// The student raised a hand.
    HandRaised = 0x11,
    /// Material was received.
    DistributeAck = 0x12,
    /// Feedback was received.
    FeedbackAck = 0x13,

    // ── Pairing (0x2x) ───────────────────────────────────────────
    /// Device asks to be paired.
    PairingRequest = 0x20,
    /// Server accepted the pairing.
    PairingAck = 0x21,
}

impl Opcode {
    /// Every opcode, in table order.
    pub const ALL: [Opcode; 13] = [
        Opcode::LockScreen,
        Opcode::UnlockScreen,
        Opcode::RefreshConfig,
        Opcode::Unpair,
        Opcode::DistributeMaterial,
        Opcode::HandAck,
        Opcode::ReturnFeedback,
        Opcode::StatusUpdate,
        Opcode::HandRaised,
        Opcode::DistributeAck,
        Opcode::FeedbackAck,
        Opcode::PairingRequest,
        Opcode::PairingAck,
    ];

    /// The byte written on the wire.
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn direction(self) -> Direction {
        match self {
            Opcode::StatusUpdate
            | Opcode::HandRaised
            | Opcode::DistributeAck
            | Opcode::FeedbackAck
            | Opcode::PairingRequest => Direction::ClientToServer,
            _ => Direction::ServerToClient,
        }
    }

    pub fn operand_shape(self) -> OperandShape {
        match self {
            Opcode::StatusUpdate => OperandShape::Json,
            Opcode::HandAck
            | Opcode::HandRaised
            | Opcode::DistributeAck
            | Opcode::FeedbackAck
            | Opcode::PairingRequest => OperandShape::DeviceId,
            _ => OperandShape::None,
        }
    }

    pub fn is_server_to_client(self) -> bool {
        self.direction() == Direction::ServerToClient
    }

    pub fn is_client_to_server(self) -> bool {
        self.direction() == Direction::ClientToServer
    }

    /// Upper-case protocol name, e.g. `PAIRING_REQUEST`.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::LockScreen => "LOCK_SCREEN",
            Opcode::UnlockScreen => "UNLOCK_SCREEN",
            Opcode::RefreshConfig => "REFRESH_CONFIG",
            Opcode::Unpair => "UNPAIR",
            Opcode::DistributeMaterial => "DISTRIBUTE_MATERIAL",
            Opcode::HandAck => "HAND_ACK",
            Opcode::ReturnFeedback => "RETURN_FEEDBACK",
            Opcode::StatusUpdate => "STATUS_UPDATE",
            Opcode::HandRaised => "HAND_RAISED",
            Opcode::DistributeAck => "DISTRIBUTE_ACK",
            Opcode::FeedbackAck => "FEEDBACK_ACK",
            Opcode::PairingRequest => "PAIRING_REQUEST",
            Opcode::PairingAck => "PAIRING_ACK",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Opcode::LockScreen),
            0x02 => Ok(Opcode::UnlockScreen),
            0x03 => Ok(Opcode::RefreshConfig),
            0x04 => Ok(Opcode::Unpair),
            0x05 => Ok(Opcode::DistributeMaterial),
            0x06 => Ok(Opcode::HandAck),
            0x07 => Ok(Opcode::ReturnFeedback),

            0x10 => Ok(Opcode::StatusUpdate),
            0x11 => Ok(Opcode::HandRaised),
            0x12 => Ok(Opcode::DistributeAck),
            0x13 => Ok(Opcode::FeedbackAck),

            0x20 => Ok(Opcode::PairingRequest),
            0x21 => Ok(Opcode::PairingAck),

            _ => Err(ProtocolError::UnknownOpcode(value)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        opcode.value()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#04x})", self.name(), self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        for opcode in Opcode::ALL {
            assert_eq!(Opcode::try_from(opcode.value()).unwrap(), opcode);
        }
    }

    #[test]
    fn opcode_values_match_table() {
        assert_eq!(Opcode::LockScreen.value(), 0x01);
        assert_eq!(Opcode::ReturnFeedback.value(), 0x07);
        assert_eq!(Opcode::StatusUpdate.value(), 0x10);
        assert_eq!(Opcode::FeedbackAck.value(), 0x13);
        assert_eq!(Opcode::PairingRequest.value(), 0x20);
        assert_eq!(Opcode::PairingAck.value(), 0x21);
    }

    #[test]
    fn opcode_invalid() {
        for byte in [0x00, 0x08, 0x0F, 0x14, 0x22, 0xFF] {
            assert_eq!(
                Opcode::try_from(byte),
                Err(ProtocolError::UnknownOpcode(byte))
            );
        }
    }

    #[test]
    fn directions_partition_the_table() {
        let server: Vec<_> = Opcode::ALL
            .iter()
            .filter(|op| op.is_server_to_client())
            .collect();
        let client: Vec<_> = Opcode::ALL
            .iter()
            .filter(|op| op.is_client_to_server())
            .collect();
        assert_eq!(server.len(), 8);
        assert_eq!(client.len(), 5);
        assert!(Opcode::PairingAck.is_server_to_client());
        assert!(Opcode::PairingRequest.is_client_to_server());
    }

    #[test]
    fn operand_shapes() {
        assert_eq!(Opcode::StatusUpdate.operand_shape(), OperandShape::Json);
        assert_eq!(Opcode::HandAck.operand_shape(), OperandShape::DeviceId);
        assert_eq!(Opcode::FeedbackAck.operand_shape(), OperandShape::DeviceId);
        assert_eq!(Opcode::ReturnFeedback.operand_shape(), OperandShape::None);
        assert_eq!(Opcode::PairingAck.operand_shape(), OperandShape::None);
    }

    #[test]
    fn display_format() {
        assert_eq!(Opcode::LockScreen.to_string(), "LOCK_SCREEN(0x01)");
        assert_eq!(Opcode::PairingAck.to_string(), "PAIRING_ACK(0x21)");
    }
}
