// ============================================
// File: crates/umbra-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the wire protocol spoken on a connection: command frames,
//! channel-prefixed packets, the built-in command bodies and the registry
//! that maps opcodes to parsers.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`command`]: `Command`, `Opcode`, `ReplyStatus`, size limits
//! - [`codec`]: Binary serialization/deserialization
//! - [`messages`]: Typed command bodies and channel types
//! - [`registry`]: Opcode registration and inbound parsing
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Control channel (0)                                        │
//! │                                                             │
//! │  Peer A ──── OpenChannel(ContactRequest, 1) ────────► Peer B│
//! │  Peer A ◄─── reply SUCCESS ──────────────────────── Peer B  │
//! │                                                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Contact request channel (1)                                │
//! │                                                             │
//! │  Peer A ──── ContactRequest(nick, message) ─────────► Peer B│
//! │  Peer A ◄─── reply Pending ──────────────────────── Peer B  │
//! │  Peer A ◄─── reply Accepted / Rejected ──────────── Peer B  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format Principles
//! - Big-endian byte order for multi-byte integers
//! - Length-prefixed frames, at most 65535 bytes each
//! - Times travel as relative ages, never absolute clocks
//!
//! ## ⚠️ Important Note for Next Developer
//! - New commands need a `CommandPayload` impl and a registry entry
//! - Opcodes are a shared namespace; check the registry before picking one
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod codec;
pub mod command;
pub mod messages;
pub mod registry;

// Re-export primary types
pub use codec::{CommandCodec, Encoded, Packet};
pub use command::{
    Command, CommandState, Opcode, ReplyStatus, HEADER_SIZE, MAX_COMMAND_DATA, MAX_COMMAND_SIZE,
};
pub use messages::{
    ChannelType, ChatMessage, CloseChannel, CommandBody, CommandPayload, ContactRequest,
    ContactRequestStatus, OpenChannel,
};
pub use registry::{CommandRegistry, CommandSpec};
