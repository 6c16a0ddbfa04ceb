//! Wire codec.
//!
//! Frame layout: `[1 byte opcode][0..N bytes operand]`. There is no length
//! prefix, checksum or version byte, so a frame is whatever the transport
//! delivered in one read. [`encode`] and [`decode`] are pure functions;
//! [`WireCodec`] adapts them to `tokio_util`'s framing traits.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{LinkError, ProtocolError};
use crate::message::Message;
use crate::opcode::Opcode;

/// Largest chunk handed to [`decode`] as a single frame.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Serialize a message to its wire bytes.
pub fn encode(message: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(message.encoded_len());
    encode_into(message, &mut buf);
    buf.freeze()
}

fn encode_into(message: &Message, dst: &mut BytesMut) {
    dst.reserve(message.encoded_len());
    dst.put_u8(message.opcode().value());
    dst.extend_from_slice(message.operand());
}

/// Parse exactly one already-delimited frame.
pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
    let (&first, operand) = frame.split_first().ok_or(ProtocolError::EmptyData)?;
    let opcode = Opcode::try_from(first)?;
    Message::new(opcode, Bytes::copy_from_slice(operand))
}

// ── WireCodec ────────────────────────────────────────────────────

/// `tokio_util` codec for the control channel.
///
/// The decoder yields `Result<Message, ProtocolError>` items so a bad
/// frame reaches the caller as a value; a codec-level error would end
/// the `FramedRead` stream.
#[derive(Debug, Clone)]
pub struct WireCodec {
    max_frame_len: usize,
}

impl WireCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.max(1),
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(READ_BUFFER_SIZE)
    }
}

impl Decoder for WireCodec {
    type Item = Result<Message, ProtocolError>;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let len = src.len().min(self.max_frame_len);
        let frame = src.split_to(len);
        Ok(Some(decode(&frame)))
    }
}

impl Encoder<Message> for WireCodec {
    type Error = LinkError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(&item, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    #[test]
    fn pairing_request_wire_bytes() {
        let msg = Message::pairing_request("dev-42").unwrap();
        let bytes = encode(&msg);
        assert_eq!(&bytes[..], &[0x20, b'd', b'e', b'v', b'-', b'4', b'2']);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.opcode(), Opcode::PairingRequest);
        assert_eq!(decoded.device_id(), Some("dev-42"));
    }

    #[test]
    fn signal_encodes_to_one_byte() {
        for msg in [
            Message::lock_screen(),
            Message::unlock_screen(),
            Message::refresh_config(),
            Message::unpair(),
            Message::distribute_material(),
            Message::return_feedback(),
            Message::pairing_ack(),
        ] {
            let bytes = encode(&msg);
            assert_eq!(bytes.len(), 1);
            assert_eq!(bytes[0], msg.opcode().value());
        }
    }

    #[test]
    fn roundtrip_every_opcode() {
        let operands: [&[u8]; 4] = [
            b"",
            b"tablet-07",
            "élève-ß-学生".as_bytes(),
            br#"{"DeviceId":"t1","Status":"IDLE"}"#,
        ];
        for opcode in Opcode::ALL {
            for operand in operands {
                let Ok(msg) = Message::new(opcode, Bytes::copy_from_slice(operand)) else {
                    // text shapes reject the empty operand
                    assert!(operand.is_empty() && opcode.operand_shape().is_text());
                    continue;
                };
                assert_eq!(decode(&encode(&msg)).unwrap(), msg);
            }
        }
    }

    #[test]
    fn roundtrip_large_payload() {
        let json = format!("{{\"blob\":\"{}\"}}", "x".repeat(256 * 1024));
        let msg = Message::status_update(json).unwrap();
        let bytes = encode(&msg);
        assert_eq!(bytes.len(), msg.encoded_len());
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn decode_empty() {
        assert_eq!(decode(&[]), Err(ProtocolError::EmptyData));
    }

    #[test]
    fn decode_unknown_opcode() {
        assert_eq!(decode(&[0x00]), Err(ProtocolError::UnknownOpcode(0x00)));
        assert_eq!(decode(&[0xFF]), Err(ProtocolError::UnknownOpcode(0xFF)));
        assert_eq!(
            decode(&[0x42, b'x']),
            Err(ProtocolError::UnknownOpcode(0x42))
        );
    }

    #[test]
    fn decode_missing_operand() {
        for byte in [0x06, 0x10, 0x11, 0x12, 0x13, 0x20] {
            let err = decode(&[byte]).unwrap_err();
            match err {
                ProtocolError::MalformedData { opcode, .. } => assert_eq!(opcode.value(), byte),
                other => panic!("expected MalformedData, got {other:?}"),
            }
        }
    }

    #[test]
    fn decode_signal_with_trailing_bytes() {
        let msg = decode(&[0x05, 0x01, 0x02]).unwrap();
        assert_eq!(msg.opcode(), Opcode::DistributeMaterial);
        assert_eq!(msg.operand(), &[0x01, 0x02]);
    }

    #[test]
    fn codec_takes_whole_buffer_as_one_frame() {
        let mut codec = WireCodec::default();
        let mut buf = BytesMut::from(&b"\x11tab-1"[..]);
        let item = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(item.device_id(), Some("tab-1"));
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn codec_caps_frame_length() {
        let mut codec = WireCodec::new(4);
        let mut buf = BytesMut::from(&b"\x11abcdef"[..]);
        let first = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(first.device_id(), Some("abc"));
        assert_eq!(&buf[..], b"def");
    }

    #[test]
    fn codec_encoder_appends() {
        let mut codec = WireCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Message::pairing_ack(), &mut buf).unwrap();
        codec
            .encode(Message::hand_raised("t").unwrap(), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], &[0x21, 0x11, b't']);
    }

    #[tokio::test]
    async fn framed_read_survives_bad_frames() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0x05])
            .read(&[0x00])
            .read(&[0x10])
            .read(&[0x21])
            .build();
        let mut frames = FramedRead::new(mock, WireCodec::default());

        let first = frames.next().await.unwrap().unwrap();
        assert_eq!(first.unwrap().opcode(), Opcode::DistributeMaterial);

        let second = frames.next().await.unwrap().unwrap();
        assert_eq!(second, Err(ProtocolError::UnknownOpcode(0x00)));

        let third = frames.next().await.unwrap().unwrap();
        assert!(matches!(third, Err(ProtocolError::MalformedData { .. })));

        let fourth = frames.next().await.unwrap().unwrap();
        assert_eq!(fourth.unwrap(), Message::pairing_ack());

        assert!(frames.next().await.is_none());
    }
}
