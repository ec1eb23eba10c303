// ============================================
// File: crates/umbra-node/src/connection/events.rs
// ============================================
//! # Connection Events
//!
//! ## Creation Reason
//! Connections never call into higher layers. Everything a subscriber
//! may react to is queued as a `ConnectionEvent` and delivered by the
//! dispatch loop once the mutation that produced it has finished.
//!
//! ## Last Modified
//! v0.1.0 - Initial event definitions

use bytes::Bytes;

use umbra_common::{ChannelId, ConnectionId, Timestamp};
use umbra_core::protocol::{ChannelType, Opcode, ReplyStatus};

/// Notification raised by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A channel became usable.
    ChannelOpened {
        /// Connection the channel belongs to
        connection: ConnectionId,
        /// Channel id
        channel: ChannelId,
        /// Channel type
        channel_type: ChannelType,
        /// `true` if we opened it
        locally: bool,
    },

    /// A channel closed. Raised once per channel.
    ChannelInvalidated {
        /// Connection the channel belonged to
        connection: ConnectionId,
        /// Channel id
        channel: ChannelId,
        /// Channel type
        channel_type: ChannelType,
    },

    /// The peer sent a contact request.
    ContactRequestReceived {
        /// Connection it arrived on
        connection: ConnectionId,
        /// Contact request channel
        channel: ChannelId,
        /// Claimed display name
        nickname: String,
        /// Greeting text
        message: String,
    },

    /// The peer sent a chat message.
    ChatMessageReceived {
        /// Connection it arrived on
        connection: ConnectionId,
        /// Chat channel
        channel: ChannelId,
        /// Message text
        text: String,
        /// Send time mapped onto our clock
        sent_at: Timestamp,
    },

    /// A reply to one of our requests arrived.
    ReplyReceived {
        /// Connection it arrived on
        connection: ConnectionId,
        /// Channel of the original request
        channel: ChannelId,
        /// Opcode of the original request
        opcode: Opcode,
        /// Request identifier
        identifier: u16,
        /// Reply status
        status: ReplyStatus,
        /// Reply data
        payload: Bytes,
    },

    /// The connection closed. Raised once, after its channel invalidations.
    ConnectionClosed {
        /// The closed connection
        connection: ConnectionId,
    },
}

impl ConnectionEvent {
    /// Connection the event belongs to.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        match self {
            Self::ChannelOpened { connection, .. }
            | Self::ChannelInvalidated { connection, .. }
            | Self::ContactRequestReceived { connection, .. }
            | Self::ChatMessageReceived { connection, .. }
            | Self::ReplyReceived { connection, .. }
            | Self::ConnectionClosed { connection } => *connection,
        }
    }
}
