//! Control-channel messages.
//!
//! A [`Message`] is an [`Opcode`] plus its operand bytes. The operand is
//! validated against the opcode's [`OperandShape`] when the message is
//! built, so every value of this type can be encoded as-is.

use std::fmt;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::opcode::{Opcode, OperandShape};

/// One frame's worth of protocol data.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Message {
    opcode: Opcode,
    operand: Bytes,
}

impl Message {
    /// Build a message, checking the operand against the opcode's shape.
    ///
    /// Text-shaped opcodes (device id, JSON) require a non-empty UTF-8
    /// operand. Opcodes that take no operand accept any trailing bytes
    /// and carry them unchanged.
    pub fn new(opcode: Opcode, operand: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let operand = operand.into();
        let shape = opcode.operand_shape();
        if shape.is_text() {
            if operand.is_empty() {
                return Err(ProtocolError::MalformedData {
                    opcode,
                    reason: match shape {
                        OperandShape::Json => "JSON payload required",
                        _ => "device id required",
                    },
                });
            }
            if std::str::from_utf8(&operand).is_err() {
                return Err(ProtocolError::MalformedData {
                    opcode,
                    reason: "operand is not valid UTF-8",
                });
            }
        }
        Ok(Self { opcode, operand })
    }

    /// A message with an empty operand. Only valid for opcodes that take
    /// no operand; text-shaped opcodes are rejected.
    pub fn signal(opcode: Opcode) -> Result<Self, ProtocolError> {
        Self::new(opcode, Bytes::new())
    }

    fn bare(opcode: Opcode) -> Self {
        Self {
            opcode,
            operand: Bytes::new(),
        }
    }

    // ── Server → device ──────────────────────────────────────────

    pub fn lock_screen() -> Self {
        Self::bare(Opcode::LockScreen)
    }

    pub fn unlock_screen() -> Self {
        Self::bare(Opcode::UnlockScreen)
    }

    pub fn refresh_config() -> Self {
        Self::bare(Opcode::RefreshConfig)
    }

    pub fn unpair() -> Self {
        Self::bare(Opcode::Unpair)
    }

    pub fn distribute_material() -> Self {
        Self::bare(Opcode::DistributeMaterial)
    }

    pub fn hand_ack(device_id: &str) -> Result<Self, ProtocolError> {
        Self::new(Opcode::HandAck, device_id.to_owned())
    }

    pub fn return_feedback() -> Self {
        Self::bare(Opcode::ReturnFeedback)
    }

    pub fn pairing_ack() -> Self {
        Self::bare(Opcode::PairingAck)
    }

    // ── Device → server ──────────────────────────────────────────

    /// A status beacon carrying a JSON document.
    pub fn status_update(json: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::new(Opcode::StatusUpdate, json.into())
    }

    pub fn hand_raised(device_id: &str) -> Result<Self, ProtocolError> {
        Self::new(Opcode::HandRaised, device_id.to_owned())
    }

    pub fn distribute_ack(device_id: &str) -> Result<Self, ProtocolError> {
        Self::new(Opcode::DistributeAck, device_id.to_owned())
    }

    pub fn feedback_ack(device_id: &str) -> Result<Self, ProtocolError> {
        Self::new(Opcode::FeedbackAck, device_id.to_owned())
    }

    pub fn pairing_request(device_id: &str) -> Result<Self, ProtocolError> {
        Self::new(Opcode::PairingRequest, device_id.to_owned())
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Raw operand bytes (possibly empty).
    pub fn operand(&self) -> &[u8] {
        &self.operand
    }

    pub fn has_operand(&self) -> bool {
        !self.operand.is_empty()
    }

    /// Number of bytes this message occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        1 + self.operand.len()
    }

    /// The operand as text, for opcodes whose operand is text.
    pub fn text(&self) -> Option<&str> {
        if !self.opcode.operand_shape().is_text() {
            return None;
        }
        std::str::from_utf8(&self.operand).ok()
    }

    /// The device id carried by `HAND_ACK`, `HAND_RAISED`,
    /// `DISTRIBUTE_ACK`, `FEEDBACK_ACK` and `PAIRING_REQUEST`.
    pub fn device_id(&self) -> Option<&str> {
        match self.opcode.operand_shape() {
            OperandShape::DeviceId => self.text(),
            _ => None,
        }
    }

    /// The JSON document carried by `STATUS_UPDATE`.
    pub fn json_payload(&self) -> Option<&str> {
        match self.opcode.operand_shape() {
            OperandShape::Json => self.text(),
            _ => None,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Message");
        s.field("opcode", &self.opcode);
        match self.text() {
            Some(text) if text.len() > 50 => {
                let cut = text
                    .char_indices()
                    .map(|(i, _)| i)
                    .take_while(|i| *i <= 50)
                    .last()
                    .unwrap_or(0);
                s.field("operand", &format_args!("{:?}...", &text[..cut]))
            }
            Some(text) => s.field("operand", &text),
            None => s.field("operand_len", &self.operand.len()),
        };
        s.finish()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device_id() {
            Some(id) => write!(f, "{} device={id}", self.opcode),
            None => write!(f, "{} ({} byte operand)", self.opcode, self.operand.len()),
        }
    }
}
