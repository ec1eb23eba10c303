// ============================================
// File: crates/umbra-node/src/connection/mod.rs
// ============================================
//! # Connection Layer
//!
//! ## Creation Reason
//! Channels multiplexed over authenticated transport sessions, kept in
//! an arena and observed through queued events.
//!
//! ## Modules
//! - `channel`: Typed sub-stream state
//! - `connection`: One session, its channels, purpose and owner
//! - `events`: Notifications raised by connections
//! - `manager`: Arena with deferred collection
//!
//! ## Last Modified
//! v0.1.0 - Initial connection layer

pub mod channel;
#[allow(clippy::module_inception)]
pub mod connection;
pub mod events;
pub mod manager;

pub use channel::{Channel, ChannelState};
pub use connection::{Connection, Owner, Purpose};
pub use events::ConnectionEvent;
pub use manager::ConnectionManager;
