// ============================================
// File: crates/umbra-transport/src/lib.rs
// ============================================
//! # Umbra Transport - Network Port
//!
//! ## Creation Reason
//! Separates the node from the anonymity network it runs over. The node
//! only sees authenticated byte streams and a feed of events about them;
//! dialing, hidden-service publication and the identity proof live behind
//! these traits.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `Transport`, `TransportEvent`, `TransportEventSource`
//! - [`mock`]: In-memory sessions and network for tests
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 umbra-node                          │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │    umbra-core          umbra-transport             │
//! │                        You are here ◄──            │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │              umbra-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │               Anonymity network adapter                  │
//! │                       │                                  │
//! │          TransportEvent (Connected / Data / ...)         │
//! │                       ▼                                  │
//! │            ┌─────────────────────┐                      │
//! │            │   Dispatch loop     │                      │
//! │            └──────────┬──────────┘                      │
//! │                       │ Transport::send                  │
//! │                       ▼                                  │
//! │                     Peer                                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always use traits for testability
//! - The mock is compiled unconditionally so downstream integration
//!   tests can use it
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod mock;
pub mod traits;

// Re-export commonly used items
pub use error::{Result, TransportError};
pub use mock::{MockNetwork, MockSession};
pub use traits::{
    AuthMode, ChannelSource, Direction, Transport, TransportEvent, TransportEventSource,
};
