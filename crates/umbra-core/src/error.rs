// ============================================
// File: crates/umbra-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines error types specific to command framing, command parsing and
//! command registration in the umbra core crate.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for core operations
//! - `Result<T>`: Type alias using `CoreError`
//!
//! ## Error Categories
//! 1. **Framing Errors**: inconsistent lengths, trailing bytes
//! 2. **Payload Errors**: bad UTF-8, unknown channel types, oversized fields
//! 3. **Configuration Errors**: duplicate opcode registration
//!
//! ## ⚠️ Important Note for Next Developer
//! - Framing and payload errors are caused by the peer and must never
//!   crash the process; callers log and discard
//! - Only `InvalidDeclaredLength` leaves the byte stream unrecoverable
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use umbra_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for command framing and parsing.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Framing Errors
    // ========================================

    /// Frame is shorter than its header or its declared length.
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum expected length
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    /// Bytes remain after the declared end of a frame or payload.
    #[error("Trailing data: expected {expected} bytes, got {actual}")]
    TrailingData {
        /// Length that was expected
        expected: usize,
        /// Length that was present
        actual: usize,
    },

    /// Declared frame length is below the header size.
    ///
    /// The stream cannot be resynchronized after this.
    #[error("Invalid declared frame length: {declared}")]
    InvalidDeclaredLength {
        /// The length field as received
        declared: usize,
    },

    /// Frame is otherwise malformed.
    #[error("Malformed frame: {reason}")]
    MalformedFrame {
        /// What's wrong with the frame
        reason: String,
    },

    // ========================================
    // Payload Errors
    // ========================================

    /// Channel type byte is not recognized.
    #[error("Unknown channel type: 0x{0:02x}")]
    UnknownChannelType(u8),

    /// A text field is not valid UTF-8.
    #[error("Invalid UTF-8 in field '{field}'")]
    InvalidUtf8 {
        /// Name of the field
        field: &'static str,
    },

    /// A field exceeds its maximum length.
    #[error("Field '{field}' too long: max {max}, got {actual}")]
    FieldTooLong {
        /// Name of the field
        field: &'static str,
        /// Maximum allowed length
        max: usize,
        /// Actual length
        actual: usize,
    },

    // ========================================
    // Configuration Errors
    // ========================================

    /// Two commands were registered for the same opcode.
    #[error("Duplicate registration for opcode 0x{opcode:02x} (already registered as {existing})")]
    DuplicateOpcode {
        /// The contested opcode
        opcode: u8,
        /// Name of the command registered first
        existing: &'static str,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `MalformedFrame` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    /// Creates a `FrameTooShort` error.
    pub const fn too_short(expected: usize, actual: usize) -> Self {
        Self::FrameTooShort { expected, actual }
    }

    /// Creates a `TrailingData` error.
    pub const fn trailing(expected: usize, actual: usize) -> Self {
        Self::TrailingData { expected, actual }
    }

    /// Creates a `FieldTooLong` error.
    pub const fn field_too_long(field: &'static str, max: usize, actual: usize) -> Self {
        Self::FieldTooLong { field, max, actual }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this is a protocol error.
    ///
    /// Protocol errors indicate malformed or invalid input from the peer.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. }
                | Self::TrailingData { .. }
                | Self::InvalidDeclaredLength { .. }
                | Self::MalformedFrame { .. }
                | Self::UnknownChannelType(_)
                | Self::InvalidUtf8 { .. }
                | Self::FieldTooLong { .. }
        )
    }

    /// Returns `true` if the byte stream cannot continue after this error.
    #[must_use]
    pub const fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::InvalidDeclaredLength { .. })
    }

    /// Returns `true` if this error is a local configuration bug.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(self, Self::DuplicateOpcode { .. })
    }
}

// ============================================
// Tests
// ============================================
