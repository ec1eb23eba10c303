// ============================================
// File: crates/umbra-node/src/services/mod.rs
// ============================================
//! # Node Services
//!
//! ## Creation Reason
//! Business logic that sits on top of connections and channels, kept
//! apart from framing and transport concerns.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`request`]: A single pending contact request and its persistence
//! - [`request_manager`]: The incoming contact request workflow
//!
//! ## Request Lifecycle
//! ```text
//!   ContactRequest ──► [blacklisted?] ──yes──► reply Rejected
//!          │                 │no
//!          │          [local / contact?] ─yes─► reply Error
//!          │                 │no
//!          ▼                 ▼
//!     save record ──► bind connection ──► reply Pending
//!                                              │
//!                      ┌───────────────────────┴──────────┐
//!                      ▼                                  ▼
//!                   accept()                          reject()
//!          transfer to contact, Accepted      blacklist, Rejected, close
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - A record can exist without a connection; it is restored from
//!   settings at start-up and waits for the peer to reconnect
//! - Every mutation persists before it replies to the peer
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod request;
pub mod request_manager;

// Re-export primary types
pub use request::{IncomingContactRequest, RequestSummary, CONTACT_REQUESTS_KEY};
pub use request_manager::{
    IncomingRequestManager, RequestContext, RequestEvent, HOSTNAME_BLACKLIST_KEY,
};
