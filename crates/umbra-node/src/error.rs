// ============================================
// File: crates/umbra-node/src/error.rs
// ============================================
//! # Node Error Types
//!
//! ## Creation Reason
//! Defines the errors raised by the node: configuration, the connection
//! arena, ownership conflicts, the contact request workflow and
//! persistence. Lower-layer errors are wrapped transparently.
//!
//! ## Error Categories
//! 1. **Configuration**: load/validation failures, fatal at start-up
//! 2. **Ownership**: purpose and claim conflicts; the caller must close
//!    the connection
//! 3. **Workflow**: unknown requests, missing nickname on accept
//! 4. **Storage**: the settings file could not be read or written
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use umbra_common::error::CommonError;
use umbra_common::{ChannelId, ConnectionId, ContactId, OnionHostname};
use umbra_core::error::CoreError;
use umbra_transport::error::TransportError;

use crate::connection::Purpose;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Node error types.
#[derive(Error, Debug)]
pub enum NodeError {
    // ========================================
    // Configuration Errors
    // ========================================

    /// Configuration file could not be loaded.
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        /// File path
        path: String,
        /// What went wrong
        reason: String,
    },

    /// A configuration value is invalid.
    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        /// Dotted field name
        field: String,
        /// Why it's invalid
        reason: String,
    },

    /// Start-up could not complete.
    #[error("Node failed to start: {reason}")]
    StartupFailed {
        /// What went wrong
        reason: String,
    },

    /// The node is shutting down and no longer takes commands.
    #[error("Node is shutting down")]
    ShuttingDown,

    // ========================================
    // Connection Errors
    // ========================================

    /// No connection with this id.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// The connection has already been closed.
    #[error("Connection closed: {0}")]
    ConnectionClosed(ConnectionId),

    /// Too many live connections.
    #[error("Connection limit reached: max {limit} connections")]
    ConnectionLimitReached {
        /// Configured maximum
        limit: usize,
    },

    /// A connection with this id is already tracked.
    #[error("Connection id already in use: {0}")]
    DuplicateConnection(ConnectionId),

    /// No open channel with this id on the connection.
    #[error("Channel {channel} not found on {connection}")]
    ChannelNotFound {
        /// Connection searched
        connection: ConnectionId,
        /// Missing channel
        channel: ChannelId,
    },

    /// The channel cannot be used for this operation.
    #[error("Invalid channel {channel}: {reason}")]
    InvalidChannel {
        /// Channel concerned
        channel: ChannelId,
        /// Why the operation is refused
        reason: String,
    },

    // ========================================
    // Ownership Errors
    // ========================================

    /// The connection's purpose was already set.
    #[error("Purpose of {connection} already claimed as {current}")]
    PurposeAlreadyClaimed {
        /// Connection concerned
        connection: ConnectionId,
        /// Purpose it already has
        current: Purpose,
    },

    /// `Unknown` is not a purpose that can be claimed.
    #[error("Cannot set purpose of {connection} to Unknown")]
    InvalidPurpose {
        /// Connection concerned
        connection: ConnectionId,
    },

    /// A claim was attempted before the purpose was set.
    #[error("{connection} has no purpose; set one before claiming")]
    PurposeNotSet {
        /// Connection concerned
        connection: ConnectionId,
    },

    /// The connection already has an owner.
    #[error("{connection} is already claimed")]
    AlreadyClaimed {
        /// Connection concerned
        connection: ConnectionId,
    },

    /// A transfer was attempted by something that does not own the
    /// connection.
    #[error("Transfer of {connection} refused: caller is not the owner")]
    NotOwner {
        /// Connection concerned
        connection: ConnectionId,
    },

    // ========================================
    // Workflow Errors
    // ========================================

    /// No active contact request for this hostname.
    #[error("No contact request from {0}")]
    RequestNotFound(OnionHostname),

    /// A contact would be created with an empty nickname.
    #[error("Contact request from {hostname} has no nickname")]
    MissingNickname {
        /// Request concerned
        hostname: OnionHostname,
    },

    /// No contact with this id.
    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    // ========================================
    // Storage Errors
    // ========================================

    /// Settings could not be read or written.
    #[error("Settings error ({context}): {reason}")]
    Storage {
        /// What was being accessed
        context: String,
        /// What went wrong
        reason: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Error from core crate.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from transport crate.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl NodeError {
    /// Creates a `ConfigLoad` error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigInvalid` error.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `StartupFailed` error.
    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidChannel` error.
    pub fn invalid_channel(channel: ChannelId, reason: impl Into<String>) -> Self {
        Self::InvalidChannel {
            channel,
            reason: reason.into(),
        }
    }

    /// Creates a `Storage` error.
    pub fn storage(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Storage {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for configuration errors.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }

    /// Returns `true` when two subsystems competed for one connection.
    #[must_use]
    pub const fn is_ownership_conflict(&self) -> bool {
        matches!(
            self,
            Self::PurposeAlreadyClaimed { .. }
                | Self::PurposeNotSet { .. }
                | Self::AlreadyClaimed { .. }
                | Self::NotOwner { .. }
        )
    }

    /// Returns `true` if the error was caused by the remote peer.
    #[must_use]
    pub const fn is_peer_violation(&self) -> bool {
        match self {
            Self::Core(e) => e.is_protocol_error(),
            _ => false,
        }
    }

    /// Returns `true` if the node cannot keep running.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::ConfigLoad { .. } | Self::StartupFailed { .. } => true,
            Self::Core(e) => e.is_configuration_error(),
            _ => false,
        }
    }
}
