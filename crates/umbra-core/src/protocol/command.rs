// ============================================
// File: crates/umbra-core/src/protocol/command.rs
// ============================================
//! # Command Definitions
//!
//! ## Creation Reason
//! Defines the unit of exchange on a channel: a typed command carrying an
//! opcode, a request/reply state, a correlation identifier and a bounded
//! payload.
//!
//! ## Main Functionality
//! - `Opcode`: 8-bit command type
//! - `ReplyStatus`: 7-bit reply status with final/intermediate/error classes
//! - `CommandState`: request (optionally wanting a reply) or reply
//! - `Command`: opcode + state + identifier + payload
//!
//! ## Wire Format
//! ```text
//! ┌────────────┬────────┬───────┬────────────┬─────────────────────┐
//! │ length u16 │ opcode │ state │ ident u16  │ payload (length-6)  │
//! └────────────┴────────┴───────┴────────────┴─────────────────────┘
//!   state: 1sssssss = reply with status s
//!          0000000r = request, r = reply wanted
//! ```
//!
//! ## Reply Status Classes
//! | Range | Meaning |
//! |-------|---------|
//! | 0x00 | Final success |
//! | 0x01-0x3F | Intermediate success, more replies follow |
//! | 0x40-0x7F | Error, final |
//!
//! ## Last Modified
//! v0.1.0 - Initial command definitions

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Size of the command header in bytes.
pub const HEADER_SIZE: usize = 6;

/// Maximum size of an encoded command, header included.
pub const MAX_COMMAND_SIZE: usize = u16::MAX as usize;

/// Maximum payload size of a single command.
pub const MAX_COMMAND_DATA: usize = MAX_COMMAND_SIZE - HEADER_SIZE;

/// Size of the channel prefix in front of each command frame.
pub const PACKET_HEADER_SIZE: usize = 2;

const REPLY_FLAG: u8 = 0x80;
const WANTS_REPLY_FLAG: u8 = 0x01;
const STATUS_MASK: u8 = 0x7F;

// ============================================
// Opcode
// ============================================

/// Command type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Opcode(u8);

impl Opcode {
    /// Opens a channel (control channel only).
    pub const OPEN_CHANNEL: Self = Self(0x01);
    /// Closes a channel (control channel only).
    pub const CLOSE_CHANNEL: Self = Self(0x02);
    /// Chat text message.
    pub const CHAT_MESSAGE: Self = Self(0x10);
    /// Inbound trust request.
    pub const CONTACT_REQUEST: Self = Self(0x20);

    /// Wraps a raw opcode byte.
    #[must_use]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Returns the opcode byte.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

// ============================================
// ReplyStatus
// ============================================

/// Status carried by a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplyStatus(u8);

impl ReplyStatus {
    /// Generic final success.
    pub const SUCCESS: Self = Self(0x00);
    /// Generic failure, used when a request could not be processed.
    pub const FAILED: Self = Self(0x40);

    /// Creates a status, or `None` if `raw` does not fit in 7 bits.
    #[must_use]
    pub const fn new(raw: u8) -> Option<Self> {
        if raw & !STATUS_MASK == 0 {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Returns the raw status value.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        self.0
    }

    /// Returns `true` if no more replies follow this one.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.0 == 0 || self.0 >= 0x40
    }

    /// Returns `true` for intermediate (non-final) success.
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        !self.is_final()
    }

    /// Returns `true` for error statuses.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.0 >= 0x40
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

// ============================================
// CommandState
// ============================================

/// Whether a command is a request or a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// A request; the peer answers only if `wants_reply` is set.
    Request {
        /// Reply requested
        wants_reply: bool,
    },
    /// A reply to an earlier request.
    Reply(ReplyStatus),
}

impl CommandState {
    /// Encodes the state byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Request { wants_reply: true } => WANTS_REPLY_FLAG,
            Self::Request { wants_reply: false } => 0,
            Self::Reply(status) => REPLY_FLAG | status.0,
        }
    }

    /// Decodes the state byte.
    ///
    /// # Errors
    /// Returns `MalformedFrame` if reserved request bits are set.
    pub fn from_byte(byte: u8) -> Result<Self> {
        if byte & REPLY_FLAG != 0 {
            return Ok(Self::Reply(ReplyStatus(byte & STATUS_MASK)));
        }
        if byte & !WANTS_REPLY_FLAG != 0 {
            return Err(CoreError::malformed(format!(
                "reserved request state bits set: 0x{byte:02x}"
            )));
        }
        Ok(Self::Request {
            wants_reply: byte & WANTS_REPLY_FLAG != 0,
        })
    }
}

// ============================================
// Command
// ============================================

/// A single command as carried on a channel.
///
/// Commands decoded from the wire are inbound; commands built locally are
/// outbound. Replies are correlated to requests by `identifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command type
    pub opcode: Opcode,
    /// Request or reply
    pub state: CommandState,
    /// Correlation identifier (0 when no reply is expected)
    pub identifier: u16,
    /// Command-specific payload
    pub payload: Bytes,
}

impl Command {
    /// Creates a request that does not want a reply.
    #[must_use]
    pub fn request(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            state: CommandState::Request { wants_reply: false },
            identifier: 0,
            payload: payload.into(),
        }
    }

    /// Marks the request as wanting a reply under `identifier`.
    #[must_use]
    pub fn with_reply(mut self, identifier: u16) -> Self {
        self.state = CommandState::Request { wants_reply: true };
        self.identifier = identifier;
        self
    }

    /// Creates a reply to the request identified by `identifier`.
    #[must_use]
    pub fn reply(opcode: Opcode, identifier: u16, status: ReplyStatus, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            state: CommandState::Reply(status),
            identifier,
            payload: payload.into(),
        }
    }

    /// Returns `true` if this command is a reply.
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        matches!(self.state, CommandState::Reply(_))
    }

    /// Returns `true` if this is a request that wants a reply.
    #[must_use]
    pub const fn wants_reply(&self) -> bool {
        matches!(self.state, CommandState::Request { wants_reply: true })
    }

    /// Returns the reply status, if this is a reply.
    #[must_use]
    pub const fn reply_status(&self) -> Option<ReplyStatus> {
        match self.state {
            CommandState::Reply(status) => Some(status),
            CommandState::Request { .. } => None,
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits() {
        assert_eq!(MAX_COMMAND_SIZE, 65535);
        assert_eq!(MAX_COMMAND_DATA, 65529);
    }

    #[test]
    fn test_reply_status_classes() {
        assert!(ReplyStatus::SUCCESS.is_final());
        assert!(!ReplyStatus::SUCCESS.is_error());

        let pending = ReplyStatus::new(0x01).unwrap();
        assert!(pending.is_intermediate());
        assert!(!pending.is_final());

        let rejected = ReplyStatus::new(0x40).unwrap();
        assert!(rejected.is_final());
        assert!(rejected.is_error());

        assert!(ReplyStatus::new(0x80).is_none());
    }

    #[test]
    fn test_state_byte_roundtrip() {
        let states = [
            CommandState::Request { wants_reply: false },
            CommandState::Request { wants_reply: true },
            CommandState::Reply(ReplyStatus::SUCCESS),
            CommandState::Reply(ReplyStatus::new(0x41).unwrap()),
        ];
        for state in states {
            assert_eq!(CommandState::from_byte(state.to_byte()).unwrap(), state);
        }
    }

    #[test]
    fn test_state_reserved_bits() {
        assert!(CommandState::from_byte(0x02).is_err());
        assert!(CommandState::from_byte(0x7E).is_err());
    }

    #[test]
    fn test_command_builders() {
        let cmd = Command::request(Opcode::CHAT_MESSAGE, vec![1, 2, 3]);
        assert!(!cmd.wants_reply());
        assert!(!cmd.is_reply());

        let cmd = cmd.with_reply(7);
        assert!(cmd.wants_reply());
        assert_eq!(cmd.identifier, 7);

        let reply = Command::reply(Opcode::CHAT_MESSAGE, 7, ReplyStatus::SUCCESS, Bytes::new());
        assert!(reply.is_reply());
        assert_eq!(reply.reply_status(), Some(ReplyStatus::SUCCESS));
    }
}
