// ============================================
// File: crates/umbra-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the identifiers used throughout the protocol stack so that
//! peer identities and arena handles cannot be confused with each other or
//! with raw strings and integers.
//!
//! ## Main Functionality
//! - `OnionHostname`: normalized hidden-service hostname (peer identity)
//! - `ConnectionId`: stable handle of a connection in the node arena
//! - `ChannelId`: per-connection channel number (0 is the control channel)
//! - `ContactId`: handle of a trusted contact
//!
//! ## Normalization Rules
//! ```text
//!   "ABCDEFGHIJKLMNOP"        ─┐
//!   "abcdefghijklmnop.onion"   ├─►  "abcdefghijklmnop.onion"
//!   " AbCdEfGhIjKlMnOp.ONION " ─┘
//! ```
//! The service id must be 16 (v2) or 56 (v3) base32 characters (`a-z2-7`).
//!
//! ## ⚠️ Important Note for Next Developer
//! - `OnionHostname` is always lower-case and `.onion`-suffixed exactly once
//! - Settings keys use `service_id()` (suffix stripped)
//! - `ConnectionId` values are never reused within a process
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::CommonError;

// ============================================
// Constants
// ============================================

/// Hidden-service hostname suffix.
pub const ONION_SUFFIX: &str = ".onion";

/// Service id length of a v2 hidden service.
pub const V2_SERVICE_ID_LEN: usize = 16;

/// Service id length of a v3 hidden service.
pub const V3_SERVICE_ID_LEN: usize = 56;

// ============================================
// OnionHostname
// ============================================

/// Normalized hidden-service hostname, the stable identity of a peer.
///
/// # Example
/// ```
/// use umbra_common::types::OnionHostname;
///
/// let host = OnionHostname::parse("ABCDEFGHIJKLMNOP.onion").unwrap();
/// assert_eq!(host.as_str(), "abcdefghijklmnop.onion");
/// assert_eq!(host.service_id(), "abcdefghijklmnop");
///
/// assert!(OnionHostname::parse("example.com").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OnionHostname(String);

impl OnionHostname {
    /// Parses and normalizes a hostname.
    ///
    /// Accepts the service id with or without the `.onion` suffix, in any
    /// letter case, surrounded by optional whitespace.
    ///
    /// # Errors
    /// Returns `InvalidHostname` if the service id has the wrong length or
    /// contains characters outside the base32 alphabet.
    pub fn parse(input: &str) -> Result<Self, CommonError> {
        let lowered = input.trim().to_ascii_lowercase();
        let service_id = lowered.strip_suffix(ONION_SUFFIX).unwrap_or(&lowered);

        if service_id.len() != V2_SERVICE_ID_LEN && service_id.len() != V3_SERVICE_ID_LEN {
            return Err(CommonError::invalid_hostname(
                input,
                format!(
                    "service id must be {V2_SERVICE_ID_LEN} or {V3_SERVICE_ID_LEN} characters"
                ),
            ));
        }

        if !service_id.bytes().all(is_base32) {
            return Err(CommonError::invalid_hostname(
                input,
                "service id must be base32 (a-z, 2-7)",
            ));
        }

        Ok(Self(format!("{service_id}{ONION_SUFFIX}")))
    }

    /// Returns `true` if `input` is a recognized remote-address form.
    #[must_use]
    pub fn is_valid(input: &str) -> bool {
        Self::parse(input).is_ok()
    }

    /// Returns the full hostname, including the `.onion` suffix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the hostname without the `.onion` suffix.
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.0[..self.0.len() - ONION_SUFFIX.len()]
    }
}

const fn is_base32(byte: u8) -> bool {
    matches!(byte, b'a'..=b'z' | b'2'..=b'7')
}

impl fmt::Debug for OnionHostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionHostname({})", self.0)
    }
}

impl fmt::Display for OnionHostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OnionHostname {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OnionHostname {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OnionHostname> for String {
    fn from(host: OnionHostname) -> Self {
        host.0
    }
}

impl AsRef<str> for OnionHostname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================
// ConnectionId
// ============================================

/// Stable handle of a connection in the node's connection arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next process-unique connection id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw id (tests and transport adapters).
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

// ============================================
// ChannelId
// ============================================

/// Channel number, unique within one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u16);

impl ChannelId {
    /// The implicit control channel.
    pub const CONTROL: Self = Self(0);

    /// Creates a channel id.
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw channel number.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns `true` for the control channel.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.0 == 0
    }

    /// Returns `true` for odd (transport-initiator owned) channel numbers.
    #[must_use]
    pub const fn is_odd(&self) -> bool {
        self.0 % 2 == 1
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

// ============================================
// ContactId
// ============================================

/// Handle of a trusted contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(u64);

impl ContactId {
    /// Creates a contact id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contact#{}", self.0)
    }
}

// ============================================
// Tests
// ============================================
