// ============================================
// File: crates/umbra-node/src/lib.rs
// ============================================
//! # Umbra Node Library
//!
//! ## Creation Reason
//! Ties the command protocol and the transport port together into a
//! working peer: connections with multiplexed channels, the contact list
//! and the incoming contact request workflow, all driven from one
//! dispatch loop.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: Node configuration management
//! - [`connection`]: Channels, connections and the connection arena
//! - [`contacts`]: Contact list port and in-memory implementation
//! - [`services`]: Business logic services
//!   - [`services::request`]: Pending contact request record
//!   - [`services::request_manager`]: Contact request workflow
//! - [`storage`]: Settings persistence port
//! - [`node`]: Dispatch loop and operator handle
//! - [`logging`]: Tracing subscriber setup
//! - [`error`]: Node-specific error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Umbra Node                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐    │
//! │  │   Config    │────►│    Node     │◄────│   NodeHandle    │    │
//! │  │             │     │ (dispatch)  │     │ accept / reject │    │
//! │  └─────────────┘     └──────┬──────┘     └─────────────────┘    │
//! │                             │                                   │
//! │         ┌───────────────────┼───────────────────┐               │
//! │         ▼                   ▼                   ▼               │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐        │
//! │  │ Connection  │     │  Incoming   │     │  Contacts   │        │
//! │  │  Manager    │◄────│  Requests   │────►│             │        │
//! │  └──────┬──────┘     └──────┬──────┘     └─────────────┘        │
//! │         │                   ▼                                   │
//! │         │            ┌─────────────┐                            │
//! │         │            │  Settings   │                            │
//! │         │            └─────────────┘                            │
//! ├─────────┼───────────────────────────────────────────────────────┤
//! │         ▼            Transport Layer                            │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │  Transport sessions + TransportEventSource              │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//! Transport → reassemble → Command → Channel → ConnectionEvent → Requests
//! Requests  → reply Command → Channel → encode → Transport
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All state is owned by `Node`; nothing here is shared across tasks
//! - A connection is never removed while events about it are queued
//! - Configuration changes require restart (no hot-reload)
//!
//! ## Last Modified
//! v0.1.0 - Initial node library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod contacts;
pub mod error;
pub mod logging;
pub mod node;
pub mod services;
pub mod storage;

// Re-export primary types
pub use config::NodeConfig;
pub use connection::{ConnectionEvent, ConnectionManager, Owner, Purpose};
pub use contacts::{ContactStatus, Contacts, ContactsManager};
pub use error::{NodeError, Result};
pub use node::{Node, NodeCommand, NodeHandle};
pub use services::{IncomingRequestManager, RequestEvent, RequestSummary};
pub use storage::{JsonSettings, SettingsStore};
