// ============================================
// File: crates/umbra-node/src/connection/channel.rs
// ============================================
//! # Channel
//!
//! ## Creation Reason
//! A channel is a typed logical sub-stream of a connection. It is owned
//! by its connection and only ever reached through it.
//!
//! ## Main Functionality
//! - `ChannelState`: `Opening → Open → Closed`
//! - `Channel`: state plus the data negotiated on the channel (the
//!   contact request received on it, and the last response sent)
//!
//! ## ⚠️ Important Note for Next Developer
//! - `Closed` is terminal; `close()` reports `true` exactly once so the
//!   connection emits a single invalidation
//! - Only one contact request is accepted per channel
//!
//! ## Last Modified
//! v0.1.0 - Initial channel implementation

use std::fmt;

use umbra_common::ChannelId;
use umbra_core::protocol::{ChannelType, ContactRequest, ContactRequestStatus};

use crate::error::{NodeError, Result};

// ============================================
// ChannelState
// ============================================

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// We asked the peer to open it and wait for the answer.
    Opening,
    /// Usable in both directions.
    Open,
    /// Terminal.
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opening => write!(f, "Opening"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// ============================================
// Channel
// ============================================

/// A typed sub-stream of a connection.
#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    channel_type: ChannelType,
    state: ChannelState,
    opened_locally: bool,
    contact_request: Option<ContactRequest>,
    request_identifier: Option<u16>,
    last_response: Option<ContactRequestStatus>,
}

impl Channel {
    /// The always-open control channel.
    #[must_use]
    pub fn control() -> Self {
        Self::new(ChannelId::CONTROL, ChannelType::Control, ChannelState::Open, false)
    }

    /// A channel the peer opened; open immediately.
    #[must_use]
    pub fn remote(id: ChannelId, channel_type: ChannelType) -> Self {
        Self::new(id, channel_type, ChannelState::Open, false)
    }

    /// A channel we asked the peer to open.
    #[must_use]
    pub fn local(id: ChannelId, channel_type: ChannelType) -> Self {
        Self::new(id, channel_type, ChannelState::Opening, true)
    }

    fn new(id: ChannelId, channel_type: ChannelType, state: ChannelState, opened_locally: bool) -> Self {
        Self {
            id,
            channel_type,
            state,
            opened_locally,
            contact_request: None,
            request_identifier: None,
            last_response: None,
        }
    }

    /// Channel id.
    #[must_use]
    pub const fn id(&self) -> ChannelId {
        self.id
    }

    /// Channel type.
    #[must_use]
    pub const fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// Returns `true` while commands may flow.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Returns `true` if this side opened the channel.
    #[must_use]
    pub const fn opened_locally(&self) -> bool {
        self.opened_locally
    }

    /// Moves an opening channel to `Open`. No-op in any other state.
    pub fn mark_open(&mut self) {
        if self.state == ChannelState::Opening {
            self.state = ChannelState::Open;
        }
    }

    /// Closes the channel. Returns `true` only on the first call.
    pub fn close(&mut self) -> bool {
        if self.state == ChannelState::Closed {
            return false;
        }
        self.state = ChannelState::Closed;
        true
    }

    // ========================================
    // Contact request data
    // ========================================

    /// Stores the contact request received on this channel.
    ///
    /// # Errors
    /// Returns `InvalidChannel` on a channel of another type or when a
    /// request was already received.
    pub fn record_request(&mut self, identifier: u16, request: ContactRequest) -> Result<()> {
        if self.channel_type != ChannelType::ContactRequest {
            return Err(NodeError::invalid_channel(self.id, "not a contact request channel"));
        }
        if self.contact_request.is_some() {
            return Err(NodeError::invalid_channel(self.id, "contact request already received"));
        }
        self.contact_request = Some(request);
        self.request_identifier = Some(identifier);
        Ok(())
    }

    /// The contact request received on this channel, if any.
    #[must_use]
    pub const fn contact_request(&self) -> Option<&ContactRequest> {
        self.contact_request.as_ref()
    }

    /// Identifier the peer expects responses on.
    #[must_use]
    pub const fn request_identifier(&self) -> Option<u16> {
        self.request_identifier
    }

    /// Records the response just sent to the peer.
    pub fn set_response(&mut self, status: ContactRequestStatus) {
        self.last_response = Some(status);
    }

    /// Last response sent to the peer.
    #[must_use]
    pub const fn last_response(&self) -> Option<ContactRequestStatus> {
        self.last_response
    }
}
