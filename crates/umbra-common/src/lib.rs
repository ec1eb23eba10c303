// ============================================
// File: crates/umbra-common/src/lib.rs
// ============================================
//! # Umbra Common - Shared Utilities Library
//!
//! ## Creation Reason
//! Provides foundational types shared by every umbra crate: peer identity
//! (hidden-service hostnames), arena identifiers, timestamps and the base
//! error type.
//!
//! ## Main Functionality
//! - [`types`]: `OnionHostname`, `ConnectionId`, `ChannelId`, `ContactId`
//! - [`time`]: Unix `Timestamp` and relative-age helpers used on the wire
//! - [`error`]: Common error types and result aliases
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 umbra-node                          │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │    umbra-core          umbra-transport             │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │              umbra-common  ◄── You are here        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate is the foundation - changes affect everything
//! - Keep dependencies minimal (serde + thiserror only)
//! - `OnionHostname` is the only way a peer identity enters the system;
//!   never compare raw strings against it
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use time::Timestamp;
pub use types::{ChannelId, ConnectionId, ContactId, OnionHostname};
