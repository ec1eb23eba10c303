// ============================================
// File: crates/umbra-node/src/services/request_manager.rs
// ============================================
//! # Incoming Request Manager
//!
//! ## Creation Reason
//! Decides what happens to every inbound contact request and keeps the
//! set of pending requests and the rejected-host blacklist.
//!
//! ## Main Functionality
//! - Inbound request rules (identity, blacklist, own identity, known
//!   contact, renew or create)
//! - `accept`: turn a request into a contact, handing over its connection
//! - `reject`: answer, close, blacklist
//! - Start-up restore of persisted requests
//!
//! ## Request Rules
//! ```text
//! ContactRequestReceived
//!     │
//!     ├─ no proven hostname ──────────► Error
//!     ├─ hostname blacklisted ────────► Rejected
//!     ├─ one of our own hostnames ────► Error
//!     ├─ already a contact (BUG) ─────► Error
//!     ├─ pending record exists ───────► renew, rebind ─┐
//!     └─ otherwise ───────────────────► create ────────┤
//!                                                      ▼
//!                                    save ─► claim connection ─► Pending
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Save happens before the `Pending` reply; a failed save answers
//!   `Error` and leaves no record
//! - A record may outlive its connection; accept/reject must work without
//!   one
//! - Never mutate `requests` from inside a connection callback. All input
//!   arrives through the dispatch loop
//!
//! ## Last Modified
//! v0.1.0 - Initial request workflow

use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use umbra_common::{ChannelId, ConnectionId, ContactId, OnionHostname, Timestamp};
use umbra_core::protocol::ContactRequestStatus;
use umbra_transport::AuthMode;

use crate::connection::{ConnectionManager, Owner, Purpose};
use crate::contacts::Contacts;
use crate::error::{NodeError, Result};
use crate::services::request::{IncomingContactRequest, RequestSummary, CONTACT_REQUESTS_KEY};
use crate::storage::SettingsStore;

/// Settings key of the rejected-host list.
pub const HOSTNAME_BLACKLIST_KEY: &str = "hostnameBlacklist";

// ============================================
// RequestEvent / RequestContext
// ============================================

/// Change to the set of pending requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    /// A request appeared (new or restored).
    Added(OnionHostname),
    /// A request was accepted, rejected or removed.
    Removed(OnionHostname),
}

/// Collaborators the workflow operates on.
pub struct RequestContext<'a> {
    /// Connection arena
    pub connections: &'a mut ConnectionManager,
    /// Contact list
    pub contacts: &'a mut dyn Contacts,
    /// Settings store
    pub settings: &'a mut dyn SettingsStore,
}

// ============================================
// IncomingRequestManager
// ============================================

/// Pending contact requests and the blacklist.
#[derive(Debug, Default)]
pub struct IncomingRequestManager {
    requests: BTreeMap<OnionHostname, IncomingContactRequest>,
    blacklist: Vec<String>,
    local_hostnames: Vec<OnionHostname>,
    events: VecDeque<RequestEvent>,
}

impl IncomingRequestManager {
    /// Creates an empty manager. Requests from `local_hostnames` are
    /// always refused.
    #[must_use]
    pub fn new(local_hostnames: Vec<OnionHostname>) -> Self {
        Self {
            local_hostnames,
            ..Self::default()
        }
    }

    // ========================================
    // Queries
    // ========================================

    /// Active request for a hostname.
    #[must_use]
    pub fn request_from_hostname(&self, hostname: &OnionHostname) -> Option<&IncomingContactRequest> {
        self.requests.get(hostname)
    }

    /// All active requests, by hostname.
    pub fn requests(&self) -> impl Iterator<Item = &IncomingContactRequest> {
        self.requests.values()
    }

    /// Snapshots of all active requests.
    #[must_use]
    pub fn summaries(&self) -> Vec<RequestSummary> {
        self.requests.values().map(IncomingContactRequest::summary).collect()
    }

    /// Number of active requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Returns `true` if no request is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Returns `true` if requests from `hostname` are refused.
    #[must_use]
    pub fn is_hostname_rejected(&self, hostname: &OnionHostname) -> bool {
        self.blacklist.iter().any(|h| h == hostname.as_str())
    }

    /// Takes the next change notification.
    pub fn next_event(&mut self) -> Option<RequestEvent> {
        self.events.pop_front()
    }

    // ========================================
    // Start-up
    // ========================================

    /// Restores the blacklist and every persisted request. Returns the
    /// number of requests restored.
    pub fn load_requests(&mut self, settings: &dyn SettingsStore) -> usize {
        self.blacklist = read_blacklist(settings);

        let mut restored = 0;
        for key in settings.keys(CONTACT_REQUESTS_KEY) {
            let hostname = match OnionHostname::parse(&key) {
                Ok(h) => h,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping stored request with invalid hostname");
                    continue;
                }
            };
            if self.requests.contains_key(&hostname) {
                continue;
            }

            let request = IncomingContactRequest::load(settings, hostname.clone());
            debug!(hostname = %hostname, nickname = request.nickname(), "Restored contact request");
            self.requests.insert(hostname.clone(), request);
            self.events.push_back(RequestEvent::Added(hostname));
            restored += 1;
        }

        info!(
            requests = restored,
            blacklisted = self.blacklist.len(),
            "Contact requests loaded"
        );
        restored
    }

    // ========================================
    // Inbound requests
    // ========================================

    /// Handles a contact request that arrived on `channel`.
    pub fn handle_contact_request(
        &mut self,
        ctx: &mut RequestContext<'_>,
        connection: ConnectionId,
        channel: ChannelId,
        nickname: String,
        message: String,
    ) {
        let Some(hostname) = ctx
            .connections
            .authenticated_identity(connection, AuthMode::HiddenService)
        else {
            warn!(connection = %connection, "Contact request from a connection without a proven hostname");
            respond(ctx.connections, connection, channel, ContactRequestStatus::Error);
            return;
        };

        if self.is_hostname_rejected(&hostname) {
            info!(hostname = %hostname, "Rejecting contact request from blacklisted hostname");
            respond(ctx.connections, connection, channel, ContactRequestStatus::Rejected);
            return;
        }

        if self.local_hostnames.contains(&hostname) {
            warn!(hostname = %hostname, "Contact request from one of our own identities");
            respond(ctx.connections, connection, channel, ContactRequestStatus::Error);
            return;
        }

        if let Some(contact) = ctx.contacts.lookup_hostname(&hostname) {
            error!(
                hostname = %hostname,
                contact = %contact,
                "BUG: contact request from a known contact; it should have used its own channel"
            );
            respond(ctx.connections, connection, channel, ContactRequestStatus::Error);
            return;
        }

        let now = Timestamp::now();
        let existing = self.requests.get(&hostname);
        let is_new = existing.is_none();
        let mut record = existing
            .cloned()
            .unwrap_or_else(|| IncomingContactRequest::new(hostname.clone()));
        record.set_details(nickname, message);
        if !is_new {
            record.renew(now);
        }

        if let Err(e) = record.save(ctx.settings, now) {
            error!(hostname = %hostname, error = %e, "Failed to save contact request");
            respond(ctx.connections, connection, channel, ContactRequestStatus::Error);
            return;
        }

        let bound = bind_connection(ctx.connections, &record, connection);
        if bound {
            record.attach(connection, channel);
        } else {
            record.clear_connection();
        }
        self.requests.insert(hostname.clone(), record);

        if is_new {
            info!(hostname = %hostname, connection = %connection, "New contact request");
            self.events.push_back(RequestEvent::Added(hostname));
        } else {
            info!(hostname = %hostname, connection = %connection, "Contact request renewed");
        }

        if bound {
            respond(ctx.connections, connection, channel, ContactRequestStatus::Pending);
        }
    }

    /// Reacts to a contact request channel closing. The connection is
    /// closed too if it only existed for that request.
    pub fn handle_channel_invalidated(
        &mut self,
        connections: &mut ConnectionManager,
        connection: ConnectionId,
        channel: ChannelId,
    ) {
        let Some(record) = self
            .requests
            .values()
            .find(|r| r.connection() == Some(connection) && r.channel() == Some(channel))
        else {
            return;
        };

        let owner = Owner::IncomingRequest(record.hostname().clone());
        let dedicated = connections
            .get(connection)
            .is_some_and(|c| c.purpose() == Purpose::InboundRequest && c.owner() == &owner);
        if dedicated {
            info!(
                hostname = %record.hostname(),
                connection = %connection,
                "Contact request channel closed, closing its connection"
            );
            connections.close(connection);
        }
    }

    /// Drops references to a connection that has closed. The requests
    /// themselves stay.
    pub fn handle_connection_closed(&mut self, connection: ConnectionId) {
        for record in self.requests.values_mut() {
            if record.connection() == Some(connection) {
                debug!(hostname = %record.hostname(), connection = %connection, "Request lost its connection");
                record.clear_connection();
            }
        }
    }

    // ========================================
    // Operator decisions
    // ========================================

    /// Accepts the request from `hostname`.
    ///
    /// Without `existing`, a contact named after the request is created.
    /// A live connection is handed to the contact and answered `Accepted`.
    ///
    /// # Errors
    /// - `RequestNotFound` if no request is pending for `hostname`
    /// - `ContactNotFound` if `existing` names no contact; nothing changes
    /// - `MissingNickname` if a contact must be created and the request
    ///   has no nickname
    /// - Contacts errors while creating the contact
    pub fn accept(
        &mut self,
        ctx: &mut RequestContext<'_>,
        hostname: &OnionHostname,
        existing: Option<ContactId>,
    ) -> Result<ContactId> {
        let record = self
            .requests
            .get(hostname)
            .cloned()
            .ok_or_else(|| NodeError::RequestNotFound(hostname.clone()))?;

        let contact = match existing {
            Some(contact) if !ctx.contacts.contains(contact) => {
                return Err(NodeError::ContactNotFound(contact));
            }
            Some(contact) => contact,
            None => {
                if record.nickname().is_empty() {
                    return Err(NodeError::MissingNickname {
                        hostname: hostname.clone(),
                    });
                }
                let contact = ctx.contacts.add_contact(record.nickname())?;
                ctx.contacts.set_hostname(contact, hostname.clone())?;
                contact
            }
        };

        if let Some(connection) = record.connection() {
            match record.channel().filter(|_| ctx.connections.is_live(connection)) {
                Some(channel) => hand_over(ctx, hostname, contact, connection, channel),
                None => {
                    ctx.connections.close(connection);
                }
            }
        }

        self.remove_request(ctx.settings, hostname)?;
        ctx.contacts.update_status(contact, ctx.connections)?;

        info!(hostname = %hostname, contact = %contact, "Contact request accepted");
        Ok(contact)
    }

    /// Rejects the request from `hostname` and blacklists it.
    ///
    /// # Errors
    /// - `RequestNotFound` if no request is pending for `hostname`
    /// - `Storage` if the blacklist can't be saved; nothing changes then
    pub fn reject(&mut self, ctx: &mut RequestContext<'_>, hostname: &OnionHostname) -> Result<()> {
        let record = self
            .requests
            .get(hostname)
            .cloned()
            .ok_or_else(|| NodeError::RequestNotFound(hostname.clone()))?;

        self.add_rejected_host(ctx.settings, hostname)?;

        if let Some(connection) = record.connection() {
            if let Some(channel) = record.channel() {
                respond(ctx.connections, connection, channel, ContactRequestStatus::Rejected);
            }
            ctx.connections.close(connection);
        }

        self.remove_request(ctx.settings, hostname)?;
        info!(hostname = %hostname, "Contact request rejected");
        Ok(())
    }

    /// Forgets the request from `hostname` and deletes its persisted data.
    /// The connection, if any, is left alone.
    ///
    /// # Errors
    /// Returns `RequestNotFound` if no request is pending for `hostname`.
    pub fn remove_request(
        &mut self,
        settings: &mut dyn SettingsStore,
        hostname: &OnionHostname,
    ) -> Result<IncomingContactRequest> {
        let record = self
            .requests
            .remove(hostname)
            .ok_or_else(|| NodeError::RequestNotFound(hostname.clone()))?;

        if let Err(e) = record.remove_settings(settings) {
            error!(hostname = %hostname, error = %e, "Failed to delete stored contact request");
        }
        self.events.push_back(RequestEvent::Removed(hostname.clone()));
        debug!(hostname = %hostname, "Contact request removed");
        Ok(record)
    }

    /// Adds `hostname` to the blacklist. Already listed is a no-op.
    ///
    /// # Errors
    /// Returns `Storage` if the list can't be saved.
    pub fn add_rejected_host(&mut self, settings: &mut dyn SettingsStore, hostname: &OnionHostname) -> Result<()> {
        if self.is_hostname_rejected(hostname) {
            return Ok(());
        }

        let mut updated = self.blacklist.clone();
        updated.push(hostname.as_str().to_string());
        settings.write(HOSTNAME_BLACKLIST_KEY, Value::from(updated.clone()))?;
        self.blacklist = updated;

        info!(hostname = %hostname, "Hostname added to blacklist");
        Ok(())
    }
}

// ============================================
// Helpers
// ============================================

fn read_blacklist(settings: &dyn SettingsStore) -> Vec<String> {
    let Some(value) = settings.read(HOSTNAME_BLACKLIST_KEY) else {
        return Vec::new();
    };
    let Some(entries) = value.as_array() else {
        warn!("Stored hostname blacklist is not a list, ignoring it");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(Value::as_str)
        .map(|h| OnionHostname::parse(h).map_or_else(|_| h.to_string(), String::from))
        .collect()
}

fn respond(
    connections: &mut ConnectionManager,
    connection: ConnectionId,
    channel: ChannelId,
    status: ContactRequestStatus,
) {
    if let Err(e) = connections.respond_contact_request(connection, channel, status) {
        warn!(
            connection = %connection,
            channel = %channel,
            ?status,
            error = %e,
            "Failed to answer contact request"
        );
    }
}

/// Claims `connection` for `record`, closing the connection it
/// replaces. Returns `false` (after closing `connection`) if the
/// connection belongs to something else.
fn bind_connection(
    connections: &mut ConnectionManager,
    record: &IncomingContactRequest,
    connection: ConnectionId,
) -> bool {
    if let Some(old) = record.connection().filter(|old| *old != connection) {
        if let Some(previous) = connections.get(old) {
            info!(
                hostname = %record.hostname(),
                old = %old,
                new = %connection,
                age_secs = previous.age().as_secs(),
                "Replacing connection on contact request"
            );
        }
        connections.close(old);
    }

    let owner = Owner::IncomingRequest(record.hostname().clone());
    if connections.get(connection).is_some_and(|c| c.owner() == &owner) {
        return true;
    }

    let claimed = connections
        .set_purpose(connection, Purpose::InboundRequest)
        .and_then(|()| connections.claim(connection, owner));
    match claimed {
        Ok(()) => true,
        Err(e) => {
            warn!(
                hostname = %record.hostname(),
                connection = %connection,
                error = %e,
                "Connection can't carry a contact request, closing"
            );
            connections.close(connection);
            false
        }
    }
}

fn hand_over(
    ctx: &mut RequestContext<'_>,
    hostname: &OnionHostname,
    contact: ContactId,
    connection: ConnectionId,
    channel: ChannelId,
) {
    let to = Owner::Contact(contact);
    let from = Owner::IncomingRequest(hostname.clone());

    let assigned = match ctx.connections.transfer(connection, &from, to.clone()) {
        Err(e) => {
            error!(
                hostname = %hostname,
                connection = %connection,
                error = %e,
                "BUG: request does not own its connection"
            );
            false
        }
        Ok(()) => match ctx.contacts.assign_connection(contact, ctx.connections, connection) {
            Err(e) => {
                error!(
                    hostname = %hostname,
                    contact = %contact,
                    error = %e,
                    "BUG: contact refused the connection"
                );
                false
            }
            Ok(()) => true,
        },
    };

    respond(ctx.connections, connection, channel, ContactRequestStatus::Accepted);

    // Transferred but unassigned still reads as owned, so both must hold
    let owned = assigned
        && ctx
            .connections
            .get(connection)
            .is_some_and(|c| c.owner() == &to);
    if !owned {
        error!(
            hostname = %hostname,
            contact = %contact,
            connection = %connection,
            "BUG: contact did not take ownership of the connection, closing it"
        );
        ctx.connections.close(connection);
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionEvent;
    use crate::contacts::{ContactStatus, ContactsManager};
    use crate::storage::JsonSettings;
    use proptest::prelude::*;
    use serde_json::json;
    use umbra_core::protocol::{CommandCodec, CommandRegistry, ReplyStatus};
    use umbra_transport::{Direction, MockSession};

    const BOB: &str = "abcdefghijklmnop.onion";

    fn host(name: &str) -> OnionHostname {
        OnionHostname::parse(name).unwrap()
    }

    struct Fixture {
        connections: ConnectionManager,
        contacts: ContactsManager,
        settings: JsonSettings,
        manager: IncomingRequestManager,
        next: u64,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                connections: ConnectionManager::new(CommandRegistry::standard().unwrap(), 64),
                contacts: ContactsManager::new(),
                settings: JsonSettings::in_memory(),
                manager: IncomingRequestManager::new(vec![host("ourselvesxxxxxxx")]),
                next: 100,
            }
        }

        fn connect(&mut self, identity: Option<&str>) -> (ConnectionId, MockSession) {
            self.next += 1;
            let id = ConnectionId::from_raw(self.next);
            let mut session = MockSession::new(Direction::Inbound);
            if let Some(name) = identity {
                session = session.with_identity(AuthMode::HiddenService, host(name));
            }
            self.connections.add(id, Box::new(session.clone())).unwrap();
            (id, session)
        }

        /// Opens a contact request channel and sends a request on it.
        fn request(&mut self, connection: ConnectionId, channel: u16, nickname: &str, message: &str) {
            use umbra_core::protocol::{ChannelType, CommandPayload, ContactRequest, OpenChannel};

            let open = OpenChannel {
                channel_type: ChannelType::ContactRequest,
                channel: ChannelId::new(channel),
            }
            .to_command()
            .with_reply(1);
            let request = ContactRequest::new(nickname, message)
                .unwrap()
                .to_command()
                .with_reply(2);

            let mut bytes = CommandCodec::encode_packet(ChannelId::CONTROL, &open).frame.to_vec();
            bytes.extend_from_slice(&CommandCodec::encode_packet(ChannelId::new(channel), &request).frame);
            self.connections.handle_data(connection, &bytes);
            self.pump();
        }

        fn pump(&mut self) {
            while let Some(event) = self.connections.next_event() {
                let mut ctx = RequestContext {
                    connections: &mut self.connections,
                    contacts: &mut self.contacts,
                    settings: &mut self.settings,
                };
                match event {
                    ConnectionEvent::ContactRequestReceived {
                        connection,
                        channel,
                        nickname,
                        message,
                    } => self
                        .manager
                        .handle_contact_request(&mut ctx, connection, channel, nickname, message),
                    ConnectionEvent::ChannelInvalidated {
                        connection, channel, ..
                    } => self
                        .manager
                        .handle_channel_invalidated(ctx.connections, connection, channel),
                    ConnectionEvent::ConnectionClosed { connection } => {
                        self.manager.handle_connection_closed(connection);
                        ctx.contacts.connection_closed(connection);
                    }
                    _ => {}
                }
            }
            self.connections.collect_garbage();
        }

        fn accept(&mut self, hostname: &str, existing: Option<ContactId>) -> Result<ContactId> {
            let mut ctx = RequestContext {
                connections: &mut self.connections,
                contacts: &mut self.contacts,
                settings: &mut self.settings,
            };
            let result = self.manager.accept(&mut ctx, &host(hostname), existing);
            self.pump();
            result
        }

        fn reject(&mut self, hostname: &str) -> Result<()> {
            let mut ctx = RequestContext {
                connections: &mut self.connections,
                contacts: &mut self.contacts,
                settings: &mut self.settings,
            };
            let result = self.manager.reject(&mut ctx, &host(hostname));
            self.pump();
            result
        }
    }

    /// Contact request statuses written on `channel`.
    fn statuses(session: &MockSession, channel: u16) -> Vec<ReplyStatus> {
        session
            .take_written()
            .into_iter()
            .filter_map(|b| CommandCodec::decode_packet(b).ok())
            .filter(|p| p.channel == ChannelId::new(channel))
            .filter_map(|p| p.command.reply_status())
            .collect()
    }

    fn status(s: ContactRequestStatus) -> ReplyStatus {
        s.as_reply_status()
    }

    #[test]
    fn test_new_request_pending_and_saved() {
        let mut fx = Fixture::new();
        let (conn, session) = fx.connect(Some(BOB));
        fx.request(conn, 1, "Bob", "hello");

        assert_eq!(statuses(&session, 1), vec![status(ContactRequestStatus::Pending)]);

        let record = fx.manager.request_from_hostname(&host(BOB)).unwrap();
        assert_eq!(record.nickname(), "Bob");
        assert_eq!(record.connection(), Some(conn));

        let stored = fx.settings.read("contactRequests.abcdefghijklmnop").unwrap();
        assert_eq!(stored["nickname"], json!("Bob"));
        assert_eq!(stored["message"], json!("hello"));

        let c = fx.connections.get(conn).unwrap();
        assert_eq!(c.purpose(), Purpose::InboundRequest);
        assert_eq!(c.owner(), &Owner::IncomingRequest(host(BOB)));
        assert_eq!(fx.manager.next_event(), Some(RequestEvent::Added(host(BOB))));
        fx.connections.close_all();
    }

    #[test]
    fn test_unauthenticated_sender_gets_error() {
        let mut fx = Fixture::new();
        let (conn, session) = fx.connect(None);
        fx.request(conn, 1, "Bob", "hello");

        assert_eq!(statuses(&session, 1), vec![status(ContactRequestStatus::Error)]);
        assert!(fx.manager.is_empty());
        assert!(fx.settings.keys(CONTACT_REQUESTS_KEY).is_empty());
        // The error is final: the channel closed, the connection did not
        assert!(fx.connections.is_live(conn));
        fx.connections.close_all();
    }

    #[test]
    fn test_own_hostname_gets_error() {
        let mut fx = Fixture::new();
        let (conn, session) = fx.connect(Some("ourselvesxxxxxxx"));
        fx.request(conn, 1, "Me", "hi");

        assert_eq!(statuses(&session, 1), vec![status(ContactRequestStatus::Error)]);
        assert!(fx.manager.is_empty());
        fx.connections.close_all();
    }

    #[test]
    fn test_known_contact_refused() {
        let mut fx = Fixture::new();
        let contact = fx.contacts.add_contact("Bob").unwrap();
        fx.contacts.set_hostname(contact, host(BOB)).unwrap();

        let (conn, session) = fx.connect(Some(BOB));
        fx.request(conn, 1, "Bob", "hello again");

        assert_eq!(statuses(&session, 1), vec![status(ContactRequestStatus::Error)]);
        assert!(fx.manager.is_empty());
        assert_eq!(fx.connections.get(conn).unwrap().purpose(), Purpose::Unknown);
        fx.connections.close_all();
    }

    #[test]
    fn test_blacklisted_host_rejected_without_record() {
        let mut fx = Fixture::new();
        fx.manager
            .add_rejected_host(&mut fx.settings, &host(BOB))
            .unwrap();

        let (conn, session) = fx.connect(Some(BOB));
        fx.request(conn, 1, "Bob", "hello");

        assert_eq!(statuses(&session, 1), vec![status(ContactRequestStatus::Rejected)]);
        assert!(fx.manager.request_from_hostname(&host(BOB)).is_none());
        assert!(fx.settings.keys(CONTACT_REQUESTS_KEY).is_empty());
        fx.connections.close_all();
    }

    #[test]
    fn test_renewal_on_new_connection_replaces_old() {
        let mut fx = Fixture::new();
        let (first, first_session) = fx.connect(Some(BOB));
        fx.request(first, 1, "Bob", "hello");
        let request_date = fx
            .manager
            .request_from_hostname(&host(BOB))
            .unwrap()
            .request_date();

        let (second, second_session) = fx.connect(Some(BOB));
        fx.request(second, 1, "Bobby", "hello?");

        assert_eq!(fx.manager.len(), 1);
        let record = fx.manager.request_from_hostname(&host(BOB)).unwrap();
        assert_eq!(record.connection(), Some(second));
        assert_eq!(record.nickname(), "Bobby");
        assert_eq!(record.request_date(), request_date);

        assert_eq!(first_session.close_calls(), 1);
        assert_eq!(
            statuses(&second_session, 1),
            vec![status(ContactRequestStatus::Pending)]
        );

        assert_eq!(fx.manager.next_event(), Some(RequestEvent::Added(host(BOB))));
        assert_eq!(fx.manager.next_event(), None);
        fx.connections.close_all();
    }

    #[test]
    fn test_renewal_moves_only_last_request_date() {
        let mut fx = Fixture::new();
        fx.settings
            .write(
                "contactRequests.abcdefghijklmnop",
                json!({"nickname": "Bob", "message": "hi", "requestDate": 100, "lastRequestDate": 200}),
            )
            .unwrap();
        fx.manager.load_requests(&fx.settings);
        assert_eq!(fx.manager.next_event(), Some(RequestEvent::Added(host(BOB))));

        let (conn, session) = fx.connect(Some(BOB));
        fx.request(conn, 1, "Bob", "hello again");

        let record = fx.manager.request_from_hostname(&host(BOB)).unwrap();
        assert_eq!(record.request_date(), Some(Timestamp::from_secs(100)));
        assert!(record.last_request_date() > Some(Timestamp::from_secs(200)));

        let stored = fx.settings.read("contactRequests.abcdefghijklmnop").unwrap();
        assert_eq!(stored["requestDate"], json!(100));
        assert_ne!(stored["lastRequestDate"], json!(200));
        assert_eq!(stored["message"], json!("hello again"));

        assert_eq!(statuses(&session, 1), vec![status(ContactRequestStatus::Pending)]);
        assert_eq!(fx.manager.len(), 1);
        assert_eq!(fx.manager.next_event(), None);
        fx.connections.close_all();
    }

    #[test]
    fn test_renewal_on_same_connection_rebinds() {
        let mut fx = Fixture::new();
        let (conn, session) = fx.connect(Some(BOB));
        fx.request(conn, 1, "Bob", "hello");
        fx.request(conn, 3, "Bob", "hello");

        assert!(fx.connections.is_live(conn));
        assert_eq!(fx.manager.request_from_hostname(&host(BOB)).unwrap().channel(), Some(ChannelId::new(3)));
        assert_eq!(statuses(&session, 3), vec![status(ContactRequestStatus::Pending)]);
        fx.connections.close_all();
    }

    #[test]
    fn test_accept_hands_over_connection() {
        let mut fx = Fixture::new();
        let (conn, session) = fx.connect(Some(BOB));
        fx.request(conn, 1, "Bob", "hello");
        session.take_written();

        let contact = fx.accept(BOB, None).unwrap();

        assert_eq!(statuses(&session, 1), vec![status(ContactRequestStatus::Accepted)]);
        assert!(fx.connections.is_live(conn));
        assert_eq!(fx.connections.get(conn).unwrap().owner(), &Owner::Contact(contact));

        let user = fx.contacts.get(contact).unwrap();
        assert_eq!(user.nickname, "Bob");
        assert_eq!(user.hostname, Some(host(BOB)));
        assert_eq!(user.connection, Some(conn));

        assert!(fx.manager.is_empty());
        assert!(fx.settings.keys(CONTACT_REQUESTS_KEY).is_empty());
        fx.connections.close_all();
    }

    #[test]
    fn test_accept_with_existing_contact() {
        let mut fx = Fixture::new();
        let existing = fx.contacts.add_contact("Robert").unwrap();
        let (conn, _session) = fx.connect(Some(BOB));
        fx.request(conn, 1, "", "hello");

        let contact = fx.accept(BOB, Some(existing)).unwrap();
        assert_eq!(contact, existing);
        assert_eq!(fx.contacts.len(), 1);
        fx.connections.close_all();
    }

    #[test]
    fn test_accept_unknown_contact_changes_nothing() {
        let mut fx = Fixture::new();
        let (conn, session) = fx.connect(Some(BOB));
        fx.request(conn, 1, "Bob", "hello");
        session.take_written();

        let err = fx.accept(BOB, Some(ContactId::new(999))).unwrap_err();
        assert!(matches!(err, NodeError::ContactNotFound(id) if id == ContactId::new(999)));

        let record = fx.manager.request_from_hostname(&host(BOB)).unwrap();
        assert_eq!(record.connection(), Some(conn));
        assert!(fx.settings.read("contactRequests.abcdefghijklmnop").is_some());
        assert!(fx.contacts.is_empty());
        assert!(session.take_written().is_empty());
        assert_eq!(
            fx.connections.get(conn).unwrap().owner(),
            &Owner::IncomingRequest(host(BOB))
        );

        // The request can still be accepted afterwards
        let contact = fx.accept(BOB, None).unwrap();
        assert_eq!(fx.connections.get(conn).unwrap().owner(), &Owner::Contact(contact));
        fx.connections.close_all();
    }

    /// Contact list whose contacts never take a connection.
    struct RefusingContacts(ContactsManager);

    impl Contacts for RefusingContacts {
        fn lookup_hostname(&self, hostname: &OnionHostname) -> Option<ContactId> {
            self.0.lookup_hostname(hostname)
        }

        fn contains(&self, contact: ContactId) -> bool {
            self.0.contains(contact)
        }

        fn add_contact(&mut self, nickname: &str) -> Result<ContactId> {
            self.0.add_contact(nickname)
        }

        fn set_hostname(&mut self, contact: ContactId, hostname: OnionHostname) -> Result<()> {
            self.0.set_hostname(contact, hostname)
        }

        fn assign_connection(
            &mut self,
            _contact: ContactId,
            _connections: &mut ConnectionManager,
            connection: ConnectionId,
        ) -> Result<()> {
            Err(NodeError::NotOwner { connection })
        }

        fn update_status(&mut self, contact: ContactId, connections: &ConnectionManager) -> Result<ContactStatus> {
            self.0.update_status(contact, connections)
        }

        fn connection_closed(&mut self, connection: ConnectionId) {
            self.0.connection_closed(connection);
        }
    }

    #[test]
    fn test_accept_closes_connection_the_contact_refused() {
        let mut fx = Fixture::new();
        let (conn, session) = fx.connect(Some(BOB));
        fx.request(conn, 1, "Bob", "hello");
        session.take_written();

        let mut contacts = RefusingContacts(ContactsManager::new());
        let mut ctx = RequestContext {
            connections: &mut fx.connections,
            contacts: &mut contacts,
            settings: &mut fx.settings,
        };
        let contact = fx.manager.accept(&mut ctx, &host(BOB), None).unwrap();
        fx.pump();

        assert_eq!(statuses(&session, 1), vec![status(ContactRequestStatus::Accepted)]);
        assert_eq!(session.close_calls(), 1);
        assert!(!fx.connections.is_live(conn));

        assert!(fx.manager.is_empty());
        assert!(fx.settings.keys(CONTACT_REQUESTS_KEY).is_empty());
        let user = contacts.0.get(contact).unwrap();
        assert!(user.connection.is_none());
        assert_eq!(user.status, ContactStatus::Offline);
    }

    #[test]
    fn test_accept_without_connection() {
        let mut fx = Fixture::new();
        fx.settings
            .write(
                "contactRequests.abcdefghijklmnop",
                json!({"nickname": "Alice", "message": "hi"}),
            )
            .unwrap();
        fx.manager.load_requests(&fx.settings);

        let contact = fx.accept(BOB, None).unwrap();
        let user = fx.contacts.get(contact).unwrap();
        assert_eq!(user.nickname, "Alice");
        assert_eq!(user.hostname, Some(host(BOB)));
        assert!(fx.settings.read("contactRequests.abcdefghijklmnop").is_none());
    }

    #[test]
    fn test_accept_requires_nickname() {
        let mut fx = Fixture::new();
        fx.settings
            .write("contactRequests.abcdefghijklmnop", json!({"message": "hi"}))
            .unwrap();
        fx.manager.load_requests(&fx.settings);

        let err = fx.accept(BOB, None).unwrap_err();
        assert!(matches!(err, NodeError::MissingNickname { .. }));
        assert!(fx.contacts.is_empty());
        assert!(fx.manager.request_from_hostname(&host(BOB)).is_some());
        assert!(fx.settings.read("contactRequests.abcdefghijklmnop").is_some());
    }

    #[test]
    fn test_reject_blacklists() {
        let mut fx = Fixture::new();
        let (conn, session) = fx.connect(Some(BOB));
        fx.request(conn, 1, "Bob", "hello");
        session.take_written();

        fx.reject(BOB).unwrap();

        assert_eq!(statuses(&session, 1), vec![status(ContactRequestStatus::Rejected)]);
        assert!(!fx.connections.is_live(conn));
        assert_eq!(session.close_calls(), 1);
        assert!(fx.manager.is_empty());
        assert!(fx.settings.read("contactRequests.abcdefghijklmnop").is_none());
        assert_eq!(fx.settings.read(HOSTNAME_BLACKLIST_KEY), Some(json!([BOB])));

        // Next request stops at the blacklist
        let (again, again_session) = fx.connect(Some(BOB));
        fx.request(again, 1, "Bob", "please");
        assert_eq!(statuses(&again_session, 1), vec![status(ContactRequestStatus::Rejected)]);
        assert!(fx.manager.is_empty());
        fx.connections.close_all();
    }

    #[test]
    fn test_unknown_request() {
        let mut fx = Fixture::new();
        assert!(matches!(
            fx.accept(BOB, None),
            Err(NodeError::RequestNotFound(_))
        ));
        assert!(matches!(fx.reject(BOB), Err(NodeError::RequestNotFound(_))));
    }

    #[test]
    fn test_request_outlives_connection() {
        let mut fx = Fixture::new();
        let (conn, _session) = fx.connect(Some(BOB));
        fx.request(conn, 1, "Bob", "hello");

        fx.connections.handle_disconnect(conn);
        fx.pump();

        let record = fx.manager.request_from_hostname(&host(BOB)).unwrap();
        assert!(record.connection().is_none());
        assert_eq!(record.nickname(), "Bob");
        assert!(fx.connections.is_empty());
    }

    #[test]
    fn test_channel_close_closes_dedicated_connection() {
        use umbra_core::protocol::{CloseChannel, CommandPayload};

        let mut fx = Fixture::new();
        let (conn, session) = fx.connect(Some(BOB));
        fx.request(conn, 1, "Bob", "hello");

        let close = CloseChannel {
            channel: ChannelId::new(1),
        }
        .to_command();
        let bytes = CommandCodec::encode_packet(ChannelId::CONTROL, &close).frame;
        fx.connections.handle_data(conn, &bytes);
        fx.pump();

        assert_eq!(session.close_calls(), 1);
        assert!(fx.manager.request_from_hostname(&host(BOB)).unwrap().connection().is_none());
    }

    #[test]
    fn test_load_requests() {
        let mut fx = Fixture::new();
        fx.settings
            .write(
                CONTACT_REQUESTS_KEY,
                json!({
                    "abcdefghijklmnop": {"nickname": "Bob", "requestDate": 5, "lastRequestDate": 9},
                    "not a hostname": {"nickname": "x"},
                }),
            )
            .unwrap();
        fx.settings
            .write(HOSTNAME_BLACKLIST_KEY, json!(["QRSTUVWXYZ234567"]))
            .unwrap();

        assert_eq!(fx.manager.load_requests(&fx.settings), 1);
        let record = fx.manager.request_from_hostname(&host(BOB)).unwrap();
        assert_eq!(record.request_date(), Some(Timestamp::from_secs(5)));
        assert_eq!(record.last_request_date(), Some(Timestamp::from_secs(9)));
        assert!(fx.manager.is_hostname_rejected(&host("qrstuvwxyz234567.onion")));
        assert_eq!(fx.manager.next_event(), Some(RequestEvent::Added(host(BOB))));
    }

    #[test]
    fn test_add_rejected_host_once() {
        let mut fx = Fixture::new();
        fx.manager.add_rejected_host(&mut fx.settings, &host(BOB)).unwrap();
        fx.manager.add_rejected_host(&mut fx.settings, &host(BOB)).unwrap();
        assert_eq!(fx.settings.read(HOSTNAME_BLACKLIST_KEY), Some(json!([BOB])));
    }

    proptest! {
        #[test]
        fn prop_lookup_ignores_case_and_suffix(
            id in "[a-z2-7]{16}",
            upper in prop::collection::vec(any::<bool>(), 16),
            suffix in any::<bool>(),
        ) {
            let mut fx = Fixture::new();
            let name = format!("{id}.onion");
            let (conn, _session) = fx.connect(Some(name.as_str()));
            fx.request(conn, 1, "Bob", "hello");

            let mut variant: String = id
                .chars()
                .zip(&upper)
                .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
                .collect();
            if suffix {
                variant.push_str(".ONION");
            }

            let lookup = OnionHostname::parse(&variant).unwrap();
            prop_assert_eq!(lookup.as_str(), name.as_str());
            prop_assert!(fx.manager.request_from_hostname(&lookup).is_some());
            fx.connections.close_all();
        }
    }
}
