// ============================================
// File: crates/umbra-node/src/contacts.rs
// ============================================
//! # Contacts
//!
//! ## Creation Reason
//! The request workflow needs an authority on who is already trusted and
//! somewhere to hand accepted connections. `Contacts` is that port;
//! `ContactsManager` keeps contacts in memory.
//!
//! ## Main Functionality
//! - Hostname lookup (a known contact never gets a pending request)
//! - Contact creation from an accepted request
//! - Connection assignment and online status
//!
//! ## ⚠️ Important Note for Next Developer
//! - A contact holds at most one connection; assigning a new one closes
//!   the old one
//! - `assign_connection` never takes a connection from another owner.
//!   The owner must `transfer` it first
//!
//! ## Last Modified
//! v0.1.0 - Initial contacts implementation

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info};

use umbra_common::{ConnectionId, ContactId, OnionHostname};

use crate::connection::{ConnectionManager, Owner, Purpose};
use crate::error::{NodeError, Result};

// ============================================
// Contacts Trait
// ============================================

/// Port to the contact list.
pub trait Contacts: Send {
    /// Contact bound to `hostname`, if any.
    fn lookup_hostname(&self, hostname: &OnionHostname) -> Option<ContactId>;

    /// Returns `true` if `contact` exists.
    fn contains(&self, contact: ContactId) -> bool;

    /// Creates a contact.
    ///
    /// # Errors
    /// Implementation specific.
    fn add_contact(&mut self, nickname: &str) -> Result<ContactId>;

    /// Binds a contact to a hostname.
    ///
    /// # Errors
    /// Returns `ContactNotFound` for an unknown contact.
    fn set_hostname(&mut self, contact: ContactId, hostname: OnionHostname) -> Result<()>;

    /// Makes `connection` the contact's connection.
    ///
    /// # Errors
    /// Returns `ContactNotFound`, a lookup error, or an ownership error
    /// when another object owns the connection.
    fn assign_connection(
        &mut self,
        contact: ContactId,
        connections: &mut ConnectionManager,
        connection: ConnectionId,
    ) -> Result<()>;

    /// Recomputes and returns the contact's status.
    ///
    /// # Errors
    /// Returns `ContactNotFound` for an unknown contact.
    fn update_status(&mut self, contact: ContactId, connections: &ConnectionManager) -> Result<ContactStatus>;

    /// Forgets a connection that has closed.
    fn connection_closed(&mut self, connection: ConnectionId);
}

// ============================================
// ContactUser
// ============================================

/// Reachability of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactStatus {
    /// Has a live connection.
    Online,
    /// No live connection.
    Offline,
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// A trusted peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactUser {
    /// Contact id
    pub id: ContactId,
    /// Display name
    pub nickname: String,
    /// Hidden-service hostname, once known
    pub hostname: Option<OnionHostname>,
    /// Current connection
    pub connection: Option<ConnectionId>,
    /// Last computed status
    pub status: ContactStatus,
}

// ============================================
// ContactsManager
// ============================================

/// In-memory contact list.
#[derive(Debug, Default)]
pub struct ContactsManager {
    contacts: BTreeMap<ContactId, ContactUser>,
    next_id: u64,
}

impl ContactsManager {
    /// Creates an empty contact list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a contact.
    #[must_use]
    pub fn get(&self, id: ContactId) -> Option<&ContactUser> {
        self.contacts.get(&id)
    }

    /// All contacts, by id.
    pub fn iter(&self) -> impl Iterator<Item = &ContactUser> {
        self.contacts.values()
    }

    /// Number of contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Returns `true` if there are no contacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    fn user_mut(&mut self, id: ContactId) -> Result<&mut ContactUser> {
        self.contacts.get_mut(&id).ok_or(NodeError::ContactNotFound(id))
    }
}

impl Contacts for ContactsManager {
    fn lookup_hostname(&self, hostname: &OnionHostname) -> Option<ContactId> {
        self.contacts
            .values()
            .find(|c| c.hostname.as_ref() == Some(hostname))
            .map(|c| c.id)
    }

    fn contains(&self, contact: ContactId) -> bool {
        self.contacts.contains_key(&contact)
    }

    fn add_contact(&mut self, nickname: &str) -> Result<ContactId> {
        self.next_id += 1;
        let id = ContactId::new(self.next_id);
        self.contacts.insert(
            id,
            ContactUser {
                id,
                nickname: nickname.to_string(),
                hostname: None,
                connection: None,
                status: ContactStatus::Offline,
            },
        );
        info!(contact = %id, nickname, "Contact added");
        Ok(id)
    }

    fn set_hostname(&mut self, contact: ContactId, hostname: OnionHostname) -> Result<()> {
        let user = self.user_mut(contact)?;
        debug!(contact = %contact, hostname = %hostname, "Contact hostname set");
        user.hostname = Some(hostname);
        Ok(())
    }

    fn assign_connection(
        &mut self,
        contact: ContactId,
        connections: &mut ConnectionManager,
        connection: ConnectionId,
    ) -> Result<()> {
        if !self.contains(contact) {
            return Err(NodeError::ContactNotFound(contact));
        }

        let owner = Owner::Contact(contact);
        let (purpose, current) = match connections.get(connection) {
            Some(c) if !c.is_closed() => (c.purpose(), c.owner().clone()),
            Some(_) => return Err(NodeError::ConnectionClosed(connection)),
            None => return Err(NodeError::ConnectionNotFound(connection)),
        };

        match current {
            Owner::Unclaimed => {
                if purpose == Purpose::Unknown {
                    connections.set_purpose(connection, Purpose::KnownContact)?;
                }
                connections.claim(connection, owner)?;
            }
            current if current == owner => {}
            _ => return Err(NodeError::NotOwner { connection }),
        }

        let user = self.user_mut(contact)?;
        let previous = user.connection.replace(connection);
        user.status = ContactStatus::Online;

        if let Some(old) = previous.filter(|old| *old != connection) {
            info!(contact = %contact, old = %old, new = %connection, "Replacing contact connection");
            connections.close(old);
        }
        debug!(contact = %contact, connection = %connection, "Connection assigned to contact");
        Ok(())
    }

    fn update_status(&mut self, contact: ContactId, connections: &ConnectionManager) -> Result<ContactStatus> {
        let user = self.user_mut(contact)?;
        let status = match user.connection {
            Some(id) if connections.is_live(id) => ContactStatus::Online,
            _ => ContactStatus::Offline,
        };
        if user.status != status {
            info!(contact = %contact, status = %status, "Contact status changed");
        }
        user.status = status;
        Ok(status)
    }

    fn connection_closed(&mut self, connection: ConnectionId) {
        for user in self.contacts.values_mut() {
            if user.connection == Some(connection) {
                user.connection = None;
                user.status = ContactStatus::Offline;
                info!(contact = %user.id, connection = %connection, "Contact went offline");
            }
        }
    }
}

// ============================================
// Tests
// ============================================
