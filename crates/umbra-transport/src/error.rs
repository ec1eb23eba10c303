// ============================================
// File: crates/umbra-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Defines error types for the transport port: writing to a session,
//! session state and event-source failures.
//!
//! ## Main Functionality
//! - `TransportError`: Primary error enum for transport operations
//! - Error conversion from system errors
//! - Categorization of retryable vs fatal errors
//!
//! ## Error Categories
//! 1. **Session Errors**: send failures, writes after close
//! 2. **Source Errors**: the event feed went away
//! 3. **System Errors**: wrapped I/O errors from real adapters
//!
//! ## ⚠️ Important Note for Next Developer
//! - A failed send is reported, not retried; the node treats a dead
//!   session as a closed connection
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use umbra_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Session Errors
    // ========================================

    /// Send operation failed.
    #[error("Failed to send: {reason}")]
    SendFailed {
        /// Why send failed
        reason: String,
    },

    /// Session is not connected.
    #[error("Session not connected")]
    NotConnected,

    /// Outbound buffer of a session is full.
    #[error("Send queue full ({capacity} writes)")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl TransportError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `SendFailed` error.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed {
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error is transient and retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }

    /// Returns `true` if the session can no longer be used.
    #[must_use]
    pub const fn is_session_lost(&self) -> bool {
        matches!(self, Self::NotConnected | Self::SendFailed { .. })
    }
}

// ============================================
// Tests
// ============================================
