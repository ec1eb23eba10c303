// ============================================
// File: crates/umbra-core/src/lib.rs
// ============================================
//! # Umbra Core - Command Protocol Library
//!
//! ## Creation Reason
//! Provides the protocol definitions shared by every peer: how commands
//! are framed, how they are addressed to channels, what the built-in
//! command bodies look like and how inbound commands are parsed.
//!
//! ## Main Functionality
//!
//! ### Protocol Module ([`protocol`])
//! - Command frames with request/reply correlation
//! - Channel-prefixed packets and stream reassembly
//! - Built-in bodies: open/close channel, contact request, chat message
//! - Opcode registry with log-and-discard parsing
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 umbra-node                          │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │    umbra-core  ◄──     umbra-transport             │
//! │    You are here               │                    │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │              umbra-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Nothing in this crate performs I/O; it only turns bytes into
//!   commands and back
//! - Peer input must never panic here; every read is length-checked
//! - Wire changes break every deployed peer
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod protocol;

// Re-export commonly used items
pub use error::{CoreError, Result};
pub use protocol::{
    ChannelType, Command, CommandBody, CommandCodec, CommandRegistry, ContactRequestStatus,
    Opcode, ReplyStatus,
};
