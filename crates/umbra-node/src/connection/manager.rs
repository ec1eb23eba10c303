// ============================================
// File: crates/umbra-node/src/connection/manager.rs
// ============================================
//! # Connection Manager
//!
//! ## Creation Reason
//! Arena of live connections keyed by `ConnectionId`. Higher layers only
//! hold ids; every access goes through the manager, so a connection that
//! was closed meanwhile is observed as such instead of being used.
//!
//! ## Main Functionality
//! - Connection admission with a maximum count
//! - Inbound data and disconnect handling
//! - Idempotent close with deferred removal (`collect_garbage`)
//! - Event queue drained by the dispatch loop
//! - Purpose, claim and transfer by id
//!
//! ## Lifecycle
//! ```text
//! add() ──► live ──► close() ──► closed (events queued)
//!                                   │
//!                      collect_garbage() after events drained
//!                                   ▼
//!                                removed
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Only call `collect_garbage` once `next_event` returned `None`
//! - `close` on an unknown or already closed id is a no-op
//!
//! ## Last Modified
//! v0.1.0 - Initial connection manager

use std::collections::{HashMap, VecDeque};

use tracing::{debug, error, info, warn};

use umbra_common::{ChannelId, ConnectionId, OnionHostname};
use umbra_core::protocol::{ChannelType, Command, CommandRegistry, ContactRequestStatus};
use umbra_transport::{AuthMode, Transport};

use crate::connection::connection::{Connection, Owner, Purpose};
use crate::connection::events::ConnectionEvent;
use crate::error::{NodeError, Result};

/// Arena of connections.
pub struct ConnectionManager {
    connections: HashMap<ConnectionId, Connection>,
    events: VecDeque<ConnectionEvent>,
    registry: CommandRegistry,
    max_connections: usize,
}

impl ConnectionManager {
    /// Creates an empty arena.
    #[must_use]
    pub fn new(registry: CommandRegistry, max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            events: VecDeque::new(),
            registry,
            max_connections,
        }
    }

    // ========================================
    // Admission and teardown
    // ========================================

    /// Admits a new transport session.
    ///
    /// # Errors
    /// Returns `ConnectionLimitReached` (after closing the transport) when
    /// the arena is full, and `DuplicateConnection` (also closing it) when
    /// `id` is already tracked. The tracked connection is left untouched.
    pub fn add(&mut self, id: ConnectionId, mut transport: Box<dyn Transport>) -> Result<()> {
        if self.connections.contains_key(&id) {
            error!(connection = %id, "BUG: connection id reused, dropping new transport");
            transport.close();
            return Err(NodeError::DuplicateConnection(id));
        }

        if self.live_count() >= self.max_connections {
            warn!(
                connection = %id,
                limit = self.max_connections,
                "Connection limit reached, dropping transport"
            );
            transport.close();
            return Err(NodeError::ConnectionLimitReached {
                limit: self.max_connections,
            });
        }

        let connection = Connection::new(id, transport);
        info!(
            connection = %id,
            direction = ?connection.direction(),
            live = self.live_count() + 1,
            "Connection added"
        );
        self.connections.insert(id, connection);
        Ok(())
    }

    /// Feeds inbound bytes to a connection. A stream that can't be parsed
    /// any further closes the connection.
    pub fn handle_data(&mut self, id: ConnectionId, bytes: &[u8]) {
        let Some(connection) = self.connections.get_mut(&id).filter(|c| !c.is_closed()) else {
            debug!(connection = %id, len = bytes.len(), "Data for an unknown connection");
            return;
        };

        if let Err(e) = connection.receive(bytes, &self.registry, &mut self.events) {
            warn!(connection = %id, error = %e, "Unrecoverable stream error, closing connection");
            connection.close(&mut self.events);
        }
    }

    /// Handles the transport going away.
    pub fn handle_disconnect(&mut self, id: ConnectionId) {
        debug!(connection = %id, "Transport disconnected");
        self.close(id);
    }

    /// Closes a connection. Returns `false` if it was unknown or closed.
    pub fn close(&mut self, id: ConnectionId) -> bool {
        self.connections
            .get_mut(&id)
            .is_some_and(|c| c.close(&mut self.events))
    }

    /// Closes every connection.
    pub fn close_all(&mut self) {
        for connection in self.connections.values_mut() {
            connection.close(&mut self.events);
        }
    }

    /// Removes closed connections. Returns how many were removed.
    pub fn collect_garbage(&mut self) -> usize {
        if !self.events.is_empty() {
            debug!(pending = self.events.len(), "Deferring collection until events are drained");
            return 0;
        }
        let before = self.connections.len();
        self.connections.retain(|_, c| !c.is_closed());
        let removed = before - self.connections.len();
        if removed > 0 {
            debug!(removed, remaining = self.connections.len(), "Collected closed connections");
        }
        removed
    }

    /// Takes the next queued event.
    pub fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    // ========================================
    // Lookup
    // ========================================

    /// Looks up a connection, closed or not.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Returns `true` if the connection exists and is not closed.
    #[must_use]
    pub fn is_live(&self, id: ConnectionId) -> bool {
        self.get(id).is_some_and(|c| !c.is_closed())
    }

    /// Verified remote hostname of a live connection.
    #[must_use]
    pub fn authenticated_identity(&self, id: ConnectionId, mode: AuthMode) -> Option<OnionHostname> {
        self.get(id).and_then(|c| c.authenticated_identity(mode))
    }

    /// Connections in the arena, closed ones included until collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if the arena holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Connections not yet closed.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.connections.values().filter(|c| !c.is_closed()).count()
    }

    fn live_mut(&mut self, id: ConnectionId) -> Result<&mut Connection> {
        match self.connections.get_mut(&id) {
            Some(c) if !c.is_closed() => Ok(c),
            Some(_) => Err(NodeError::ConnectionClosed(id)),
            None => Err(NodeError::ConnectionNotFound(id)),
        }
    }

    // ========================================
    // Operations by id
    // ========================================

    /// See [`Connection::set_purpose`].
    ///
    /// # Errors
    /// Returns the purpose error, or a lookup error.
    pub fn set_purpose(&mut self, id: ConnectionId, purpose: Purpose) -> Result<()> {
        self.live_mut(id)?.set_purpose(purpose)
    }

    /// See [`Connection::claim`].
    ///
    /// # Errors
    /// Returns the claim error, or a lookup error.
    pub fn claim(&mut self, id: ConnectionId, owner: Owner) -> Result<()> {
        self.live_mut(id)?.claim(owner)
    }

    /// See [`Connection::transfer`].
    ///
    /// # Errors
    /// Returns `NotOwner`, or a lookup error.
    pub fn transfer(&mut self, id: ConnectionId, from: &Owner, to: Owner) -> Result<()> {
        self.live_mut(id)?.transfer(from, to)
    }

    /// See [`Connection::open_channel`].
    ///
    /// # Errors
    /// Returns the channel error, or a lookup error.
    pub fn open_channel(&mut self, id: ConnectionId, channel_type: ChannelType) -> Result<ChannelId> {
        self.live_mut(id)?.open_channel(channel_type)
    }

    /// See [`Connection::send_request`].
    ///
    /// # Errors
    /// Returns the send error, or a lookup error.
    pub fn send_request(
        &mut self,
        id: ConnectionId,
        channel: ChannelId,
        command: Command,
        wants_reply: bool,
    ) -> Result<Option<u16>> {
        self.live_mut(id)?.send_request(channel, command, wants_reply)
    }

    /// See [`Connection::respond_contact_request`].
    ///
    /// # Errors
    /// Returns the send error, or a lookup error.
    pub fn respond_contact_request(
        &mut self,
        id: ConnectionId,
        channel: ChannelId,
        status: ContactRequestStatus,
    ) -> Result<()> {
        let connection = match self.connections.get_mut(&id) {
            Some(c) if !c.is_closed() => c,
            Some(_) => return Err(NodeError::ConnectionClosed(id)),
            None => return Err(NodeError::ConnectionNotFound(id)),
        };
        connection.respond_contact_request(channel, status, &mut self.events)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connections.len())
            .field("pending_events", &self.events.len())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

// ============================================
// Tests
// ============================================
