// ============================================
// File: crates/umbra-core/src/protocol/codec.rs
// ============================================
//! # Command Codec
//!
//! ## Creation Reason
//! Provides binary serialization and deserialization for command frames
//! and for the channel-prefixed packets that carry them on a connection.
//!
//! ## Main Functionality
//! - `CommandCodec`: command frames and packets
//! - `check_complete`: stream reassembly helper for connections
//!
//! ## Wire Format
//! All multi-byte integers are big-endian (network order).
//! ```text
//! packet  = [channel u16][command frame]
//! command = [length u16][opcode u8][state u8][identifier u16][payload]
//! ```
//!
//! ## Parsing Strategy
//! 1. Check the header is present
//! 2. Validate the declared length against the buffer
//! 3. Reject trailing bytes
//! 4. Hand the payload to the registry untouched
//!
//! ## ⚠️ Important Note for Next Developer
//! - Oversized payloads on the send path are a local bug; they are
//!   truncated and logged, never silently accepted
//! - A declared length below `HEADER_SIZE` desynchronizes the stream; the
//!   connection must be closed
//!
//! ## Last Modified
//! v0.1.0 - Initial codec implementation

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::error;

use umbra_common::ChannelId;

use crate::error::{CoreError, Result};
use crate::protocol::command::{
    Command, CommandState, Opcode, HEADER_SIZE, MAX_COMMAND_DATA, PACKET_HEADER_SIZE,
};

// ============================================
// Encoded / Packet
// ============================================

/// Result of encoding a command.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// The encoded bytes
    pub frame: BytesMut,
    /// Whether the payload had to be cut to `MAX_COMMAND_DATA`
    pub truncated: bool,
}

/// A command together with the channel it travels on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Target channel
    pub channel: ChannelId,
    /// The command
    pub command: Command,
}

// ============================================
// CommandCodec
// ============================================

/// Codec for command frames and packets.
#[derive(Debug, Default, Clone)]
pub struct CommandCodec;

impl CommandCodec {
    /// Encodes a command frame.
    #[must_use]
    pub fn encode_command(command: &Command) -> Encoded {
        let mut frame =
            BytesMut::with_capacity(HEADER_SIZE + command.payload.len().min(MAX_COMMAND_DATA));
        let truncated = write_command(command, &mut frame);
        Encoded { frame, truncated }
    }

    /// Decodes a single command frame.
    ///
    /// # Errors
    /// Returns a framing error when the byte count is inconsistent with
    /// the declared length.
    pub fn decode_command(frame: &[u8]) -> Result<Command> {
        read_command(&mut Bytes::copy_from_slice(frame))
    }

    /// Encodes a command addressed to `channel`.
    #[must_use]
    pub fn encode_packet(channel: ChannelId, command: &Command) -> Encoded {
        let mut frame = BytesMut::with_capacity(
            PACKET_HEADER_SIZE + HEADER_SIZE + command.payload.len().min(MAX_COMMAND_DATA),
        );
        frame.put_u16(channel.as_u16());
        let truncated = write_command(command, &mut frame);
        Encoded { frame, truncated }
    }

    /// Decodes one complete packet.
    ///
    /// # Errors
    /// Returns a framing error for inconsistent lengths or trailing data.
    pub fn decode_packet(mut buf: Bytes) -> Result<Packet> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(CoreError::too_short(PACKET_HEADER_SIZE, buf.len()));
        }
        let channel = ChannelId::new(buf.get_u16());
        let command = read_command(&mut buf)?;
        Ok(Packet { channel, command })
    }

    /// Checks if the buffer starts with a complete packet.
    ///
    /// # Returns
    /// - `Ok(Some(len))` - Complete packet of `len` bytes
    /// - `Ok(None)` - Incomplete packet, need more data
    /// - `Err(_)` - Declared length is invalid; the stream is unusable
    pub fn check_complete(buf: &[u8]) -> Result<Option<usize>> {
        if buf.len() < PACKET_HEADER_SIZE + 2 {
            return Ok(None);
        }

        let declared = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
        if declared < HEADER_SIZE {
            return Err(CoreError::InvalidDeclaredLength { declared });
        }

        let required = PACKET_HEADER_SIZE + declared;
        if buf.len() >= required {
            Ok(Some(required))
        } else {
            Ok(None)
        }
    }
}

// ============================================
// Frame Helpers
// ============================================

/// Writes `command` into `buf`, returning `true` if the payload was cut.
fn write_command(command: &Command, buf: &mut BytesMut) -> bool {
    let mut payload: &[u8] = &command.payload;
    let truncated = payload.len() > MAX_COMMAND_DATA;
    if truncated {
        error!(
            opcode = %command.opcode,
            size = payload.len(),
            max = MAX_COMMAND_DATA,
            "BUG: command payload exceeds maximum size, truncating"
        );
        payload = &payload[..MAX_COMMAND_DATA];
    }

    // HEADER_SIZE + MAX_COMMAND_DATA == u16::MAX
    let length = u16::try_from(HEADER_SIZE + payload.len()).unwrap_or(u16::MAX);

    buf.reserve(HEADER_SIZE + payload.len());
    buf.put_u16(length);
    buf.put_u8(command.opcode.as_byte());
    buf.put_u8(command.state.to_byte());
    buf.put_u16(command.identifier);
    buf.put_slice(payload);
    truncated
}

/// Reads exactly one command frame; `buf` must hold nothing else.
fn read_command(buf: &mut Bytes) -> Result<Command> {
    let available = buf.len();
    if available < HEADER_SIZE {
        return Err(CoreError::too_short(HEADER_SIZE, available));
    }

    let length = usize::from(buf.get_u16());
    if length < HEADER_SIZE {
        return Err(CoreError::InvalidDeclaredLength { declared: length });
    }
    if available < length {
        return Err(CoreError::too_short(length, available));
    }
    if available > length {
        return Err(CoreError::trailing(length, available));
    }

    let opcode = Opcode::new(buf.get_u8());
    let state = CommandState::from_byte(buf.get_u8())?;
    let identifier = buf.get_u16();

    if matches!(state, CommandState::Request { wants_reply: true }) && identifier == 0 {
        return Err(CoreError::malformed("reply requested without identifier"));
    }

    let payload = buf.split_to(length - HEADER_SIZE);

    Ok(Command {
        opcode,
        state,
        identifier,
        payload,
    })
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::ReplyStatus;
    use proptest::prelude::*;

    fn encode(opcode: Opcode, payload: &[u8]) -> Encoded {
        CommandCodec::encode_command(&Command::request(opcode, Bytes::copy_from_slice(payload)))
    }

    fn decode(frame: &[u8]) -> Result<(Opcode, Bytes)> {
        let command = CommandCodec::decode_command(frame)?;
        Ok((command.opcode, command.payload))
    }

    #[test]
    fn test_header_layout() {
        let cmd = Command::request(Opcode::CHAT_MESSAGE, vec![0xAA, 0xBB]).with_reply(0x0102);
        let encoded = CommandCodec::encode_command(&cmd);
        assert!(!encoded.truncated);
        assert_eq!(
            &encoded.frame[..],
            &[0x00, 0x08, 0x10, 0x01, 0x01, 0x02, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_reply_roundtrip() {
        let status = ReplyStatus::new(0x41).unwrap();
        let reply = Command::reply(Opcode::CONTACT_REQUEST, 9, status, Bytes::new());
        let encoded = CommandCodec::encode_command(&reply);
        assert_eq!(encoded.frame[3], 0xC1);

        let decoded = CommandCodec::decode_command(&encoded.frame).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_decode_too_short() {
        let result = CommandCodec::decode_command(&[0x00, 0x06, 0x01]);
        assert!(matches!(result, Err(CoreError::FrameTooShort { .. })));

        // Declares 10 bytes, carries 8
        let result = CommandCodec::decode_command(&[0, 10, 1, 0, 0, 0, 1, 2]);
        assert!(matches!(result, Err(CoreError::FrameTooShort { expected: 10, .. })));
    }

    #[test]
    fn test_decode_trailing_data() {
        let mut frame = CommandCodec::encode_command(&Command::request(Opcode::CLOSE_CHANNEL, vec![0, 3]))
            .frame
            .to_vec();
        frame.push(0xFF);
        let result = CommandCodec::decode_command(&frame);
        assert!(matches!(result, Err(CoreError::TrailingData { .. })));
    }

    #[test]
    fn test_decode_invalid_declared_length() {
        let result = CommandCodec::decode_command(&[0, 3, 1, 0, 0, 0]);
        let err = result.unwrap_err();
        assert!(err.is_unrecoverable());
    }

    #[test]
    fn test_decode_reply_wanted_without_identifier() {
        let result = CommandCodec::decode_command(&[0, 6, 1, 1, 0, 0]);
        assert!(matches!(result, Err(CoreError::MalformedFrame { .. })));
    }

    #[test]
    fn test_packet_roundtrip() {
        let cmd = Command::request(Opcode::OPEN_CHANNEL, vec![1, 0, 3]).with_reply(1);
        let encoded = CommandCodec::encode_packet(ChannelId::CONTROL, &cmd);
        assert_eq!(&encoded.frame[..2], &[0, 0]);

        let packet = CommandCodec::decode_packet(encoded.frame.freeze()).unwrap();
        assert_eq!(packet.channel, ChannelId::CONTROL);
        assert_eq!(packet.command, cmd);
    }

    #[test]
    fn test_check_complete() {
        assert_eq!(CommandCodec::check_complete(&[]).unwrap(), None);
        assert_eq!(CommandCodec::check_complete(&[0, 1, 0]).unwrap(), None);

        let packet = CommandCodec::encode_packet(
            ChannelId::new(3),
            &Command::request(Opcode::CHAT_MESSAGE, vec![7; 10]),
        )
        .frame;
        let total = packet.len();
        assert_eq!(CommandCodec::check_complete(&packet[..total - 1]).unwrap(), None);
        assert_eq!(CommandCodec::check_complete(&packet).unwrap(), Some(total));

        let mut two = packet.to_vec();
        two.extend_from_slice(&packet);
        assert_eq!(CommandCodec::check_complete(&two).unwrap(), Some(total));

        assert!(CommandCodec::check_complete(&[0, 1, 0, 2]).is_err());
    }

    #[test]
    fn test_payload_at_limit_is_not_truncated() {
        let payload = vec![0x5A; MAX_COMMAND_DATA];
        let encoded = encode(Opcode::CHAT_MESSAGE, &payload);
        assert!(!encoded.truncated);
        assert_eq!(encoded.frame.len(), u16::MAX as usize);

        let (opcode, decoded) = decode(&encoded.frame).unwrap();
        assert_eq!(opcode, Opcode::CHAT_MESSAGE);
        assert_eq!(decoded.len(), MAX_COMMAND_DATA);
    }

    proptest! {
        #[test]
        fn payloads_within_limit_survive_encoding(
            opcode in any::<u8>(),
            payload in prop::collection::vec(any::<u8>(), 0..4096),
        ) {
            let encoded = encode(Opcode::new(opcode), &payload);
            prop_assert!(!encoded.truncated);
            let (decoded_opcode, decoded) = decode(&encoded.frame).unwrap();
            prop_assert_eq!(decoded_opcode, Opcode::new(opcode));
            prop_assert_eq!(&decoded[..], &payload[..]);
        }

        #[test]
        fn oversized_payloads_are_cut_to_limit(extra in 1usize..512) {
            let payload = vec![0x33; MAX_COMMAND_DATA + extra];
            let encoded = encode(Opcode::CHAT_MESSAGE, &payload);
            prop_assert!(encoded.truncated);
            let (_, decoded) = decode(&encoded.frame).unwrap();
            prop_assert_eq!(decoded.len(), MAX_COMMAND_DATA);
        }
    }
}
