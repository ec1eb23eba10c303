// ============================================
// File: crates/umbra-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! Errors raised while parsing the shared identity types. Each crate
//! defines its own error type that wraps `CommonError`.
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

/// Result type for parsing shared types.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors of the shared types.
///
/// # Example
/// ```
/// use umbra_common::error::CommonError;
/// use umbra_common::OnionHostname;
///
/// let err = OnionHostname::parse("example.com").unwrap_err();
/// assert!(matches!(err, CommonError::InvalidHostname { .. }));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// A string is not a recognized hidden-service hostname.
    #[error("Invalid hostname '{hostname}': {reason}")]
    InvalidHostname {
        /// The rejected input
        hostname: String,
        /// Why it was rejected
        reason: String,
    },
}

impl CommonError {
    /// Creates an `InvalidHostname` error.
    pub fn invalid_hostname(hostname: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHostname {
            hostname: hostname.into(),
            reason: reason.into(),
        }
    }
}
