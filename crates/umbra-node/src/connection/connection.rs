// ============================================
// File: crates/umbra-node/src/connection/connection.rs
// ============================================
//! # Connection
//!
//! ## Creation Reason
//! Wraps one authenticated transport session and multiplexes typed
//! channels over it.
//!
//! ## Main Functionality
//! - Stream reassembly: inbound bytes are buffered until a full packet
//!   is available
//! - Control channel: OpenChannel / CloseChannel handling with id
//!   parity checks
//! - Request/reply correlation with non-zero identifiers
//! - Purpose (set once) and ownership (claimed once, then only
//!   transferred by its owner)
//!
//! ## Channel Id Parity
//! ```text
//! side that dialed  ──► opens odd ids   (1, 3, 5, ...)
//! side that accepted ──► opens even ids (2, 4, 6, ...)
//! channel 0 ─────────► control, always open
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never call into higher layers from here; push a `ConnectionEvent`
//! - Malformed commands from the peer are dropped, never fatal. Only a
//!   corrupt length prefix (the stream can't be resynchronised) is
//!   returned as an error, and the caller closes the connection
//! - A channel that sent a final contact-request reply closes itself
//!
//! ## Last Modified
//! v0.1.0 - Initial connection implementation

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, info, trace, warn};

use umbra_common::{ChannelId, ConnectionId, ContactId, OnionHostname, Timestamp};
use umbra_core::protocol::{
    ChannelType, CloseChannel, Command, CommandBody, CommandCodec, CommandPayload,
    CommandRegistry, ContactRequest, ContactRequestStatus, Opcode, OpenChannel, Packet,
    ReplyStatus,
};
use umbra_transport::{AuthMode, Direction, Transport};

use crate::connection::channel::Channel;
use crate::connection::events::ConnectionEvent;
use crate::error::{NodeError, Result};

// ============================================
// Purpose / Owner
// ============================================

/// Which subsystem owns the meaning of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Not yet claimed.
    Unknown,
    /// Traffic of an established contact.
    KnownContact,
    /// A peer asking us to become a contact.
    InboundRequest,
    /// Us asking a peer to become a contact.
    OutboundRequest,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::KnownContact => write!(f, "KnownContact"),
            Self::InboundRequest => write!(f, "InboundRequest"),
            Self::OutboundRequest => write!(f, "OutboundRequest"),
        }
    }
}

/// Higher-level object holding a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    /// Nobody has claimed the connection.
    Unclaimed,
    /// The pending contact request from this hostname.
    IncomingRequest(OnionHostname),
    /// An established contact.
    Contact(ContactId),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unclaimed => write!(f, "unclaimed"),
            Self::IncomingRequest(hostname) => write!(f, "request from {hostname}"),
            Self::Contact(id) => write!(f, "{id}"),
        }
    }
}

/// Bookkeeping for a request waiting on its reply.
#[derive(Debug, Clone, Copy)]
struct PendingReply {
    channel: ChannelId,
    opcode: Opcode,
    /// Channel being opened, for OpenChannel requests.
    opening: Option<ChannelId>,
}

// ============================================
// Connection
// ============================================

/// A transport session with its channels.
pub struct Connection {
    id: ConnectionId,
    transport: Box<dyn Transport>,
    direction: Direction,
    created_at: Instant,
    purpose: Purpose,
    owner: Owner,
    channels: BTreeMap<ChannelId, Channel>,
    read_buf: BytesMut,
    next_channel: u32,
    next_identifier: u16,
    pending_replies: HashMap<u16, PendingReply>,
    closed: bool,
}

impl Connection {
    /// Wraps a transport session.
    #[must_use]
    pub fn new(id: ConnectionId, transport: Box<dyn Transport>) -> Self {
        let direction = transport.direction();
        let mut channels = BTreeMap::new();
        channels.insert(ChannelId::CONTROL, Channel::control());

        Self {
            id,
            transport,
            direction,
            created_at: Instant::now(),
            purpose: Purpose::Unknown,
            owner: Owner::Unclaimed,
            channels,
            read_buf: BytesMut::with_capacity(1024),
            // Dialing side opens odd ids
            next_channel: match direction {
                Direction::Outbound => 1,
                Direction::Inbound => 2,
            },
            next_identifier: 0,
            pending_replies: HashMap::new(),
            closed: false,
        }
    }

    // ========================================
    // Accessors
    // ========================================

    /// Arena id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Which side dialed.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Time since the connection was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Current purpose.
    #[must_use]
    pub const fn purpose(&self) -> Purpose {
        self.purpose
    }

    /// Current owner.
    #[must_use]
    pub const fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Returns `true` once `close` ran.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Verified remote hostname, once the transport proved it.
    #[must_use]
    pub fn authenticated_identity(&self, mode: AuthMode) -> Option<OnionHostname> {
        if self.closed {
            return None;
        }
        self.transport.authenticated_identity(mode)
    }

    /// Looks up a channel.
    #[must_use]
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    /// Number of channels, control channel included.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    // ========================================
    // Purpose and ownership
    // ========================================

    /// Sets the purpose. Only possible once.
    ///
    /// # Errors
    /// - `InvalidPurpose` for `Purpose::Unknown`
    /// - `PurposeAlreadyClaimed` if a purpose was already set
    pub fn set_purpose(&mut self, purpose: Purpose) -> Result<()> {
        if purpose == Purpose::Unknown {
            return Err(NodeError::InvalidPurpose {
                connection: self.id,
            });
        }
        if self.purpose != Purpose::Unknown {
            return Err(NodeError::PurposeAlreadyClaimed {
                connection: self.id,
                current: self.purpose,
            });
        }

        debug!(connection = %self.id, purpose = %purpose, "Connection purpose set");
        self.purpose = purpose;
        Ok(())
    }

    /// Takes ownership of an unclaimed connection.
    ///
    /// # Errors
    /// - `PurposeNotSet` while the purpose is still `Unknown`
    /// - `AlreadyClaimed` if another object owns it
    /// - `NotOwner` if `owner` is `Owner::Unclaimed`
    pub fn claim(&mut self, owner: Owner) -> Result<()> {
        if owner == Owner::Unclaimed {
            return Err(NodeError::NotOwner {
                connection: self.id,
            });
        }
        if self.purpose == Purpose::Unknown {
            return Err(NodeError::PurposeNotSet {
                connection: self.id,
            });
        }
        if self.owner != Owner::Unclaimed {
            return Err(NodeError::AlreadyClaimed {
                connection: self.id,
            });
        }

        debug!(connection = %self.id, owner = %owner, "Connection claimed");
        self.owner = owner;
        Ok(())
    }

    /// Hands the connection from its current owner to another.
    ///
    /// # Errors
    /// Returns `NotOwner` unless `from` is the current owner.
    pub fn transfer(&mut self, from: &Owner, to: Owner) -> Result<()> {
        if *from == Owner::Unclaimed || self.owner != *from {
            return Err(NodeError::NotOwner {
                connection: self.id,
            });
        }

        debug!(connection = %self.id, from = %from, to = %to, "Connection ownership transferred");
        self.owner = to;
        Ok(())
    }

    // ========================================
    // Outbound
    // ========================================

    /// Opens a channel towards the peer. It stays `Opening` until the
    /// peer answers.
    ///
    /// # Errors
    /// Returns an error for the control type, when the id space is
    /// exhausted, or if the OpenChannel request can't be sent.
    pub fn open_channel(&mut self, channel_type: ChannelType) -> Result<ChannelId> {
        if channel_type == ChannelType::Control {
            return Err(NodeError::invalid_channel(
                ChannelId::CONTROL,
                "the control channel is implicit",
            ));
        }
        let raw = u16::try_from(self.next_channel).map_err(|_| {
            NodeError::invalid_channel(ChannelId::CONTROL, "channel id space exhausted")
        })?;
        let id = ChannelId::new(raw);

        let request = OpenChannel {
            channel_type,
            channel: id,
        };
        let identifier = self.allocate_identifier();
        self.send_command(ChannelId::CONTROL, &request.to_command().with_reply(identifier))?;

        self.next_channel += 2;
        self.pending_replies.insert(
            identifier,
            PendingReply {
                channel: ChannelId::CONTROL,
                opcode: Opcode::OPEN_CHANNEL,
                opening: Some(id),
            },
        );
        self.channels.insert(id, Channel::local(id, channel_type));

        debug!(connection = %self.id, channel = %id, ?channel_type, "Opening channel");
        Ok(id)
    }

    /// Sends a request on an open channel. Returns the identifier when a
    /// reply was asked for.
    ///
    /// # Errors
    /// Returns `ChannelNotFound` for unknown or closed channels, or the
    /// transport error.
    pub fn send_request(
        &mut self,
        channel: ChannelId,
        command: Command,
        wants_reply: bool,
    ) -> Result<Option<u16>> {
        if !self.channels.get(&channel).is_some_and(Channel::is_open) {
            return Err(NodeError::ChannelNotFound {
                connection: self.id,
                channel,
            });
        }

        if !wants_reply {
            self.send_command(channel, &command)?;
            return Ok(None);
        }

        let identifier = self.allocate_identifier();
        let opcode = command.opcode;
        self.send_command(channel, &command.with_reply(identifier))?;
        self.pending_replies.insert(
            identifier,
            PendingReply {
                channel,
                opcode,
                opening: None,
            },
        );
        Ok(Some(identifier))
    }

    /// Answers the contact request received on `channel`. A final status
    /// closes the channel afterwards.
    ///
    /// # Errors
    /// Returns `ChannelNotFound` or `InvalidChannel` when the channel holds
    /// no contact request, or the transport error.
    pub fn respond_contact_request(
        &mut self,
        channel: ChannelId,
        status: ContactRequestStatus,
        events: &mut VecDeque<ConnectionEvent>,
    ) -> Result<()> {
        let ch = self
            .channels
            .get(&channel)
            .filter(|ch| ch.is_open())
            .ok_or(NodeError::ChannelNotFound {
                connection: self.id,
                channel,
            })?;
        let identifier = ch
            .request_identifier()
            .ok_or_else(|| NodeError::invalid_channel(channel, "no contact request to answer"))?;

        let reply = Command::reply(
            Opcode::CONTACT_REQUEST,
            identifier,
            status.as_reply_status(),
            Bytes::new(),
        );
        self.send_command(channel, &reply)?;
        if let Some(ch) = self.channels.get_mut(&channel) {
            ch.set_response(status);
        }

        debug!(connection = %self.id, channel = %channel, ?status, "Contact request response sent");

        if status.is_final() {
            self.close_channel(channel, events)?;
        }
        Ok(())
    }

    /// Closes a channel and tells the peer.
    ///
    /// # Errors
    /// Returns `InvalidChannel` for the control channel.
    pub fn close_channel(
        &mut self,
        channel: ChannelId,
        events: &mut VecDeque<ConnectionEvent>,
    ) -> Result<()> {
        if channel.is_control() {
            return Err(NodeError::invalid_channel(channel, "the control channel can't be closed"));
        }
        if !self.invalidate_channel(channel, events) {
            return Ok(());
        }

        let notice = CloseChannel { channel }.to_command();
        if let Err(e) = self.send_command(ChannelId::CONTROL, &notice) {
            debug!(connection = %self.id, channel = %channel, error = %e, "CloseChannel not delivered");
        }
        Ok(())
    }

    /// Closes the connection. Returns `false` if it was already closed.
    ///
    /// Every non-control channel is invalidated (one event each) before a
    /// single `ConnectionClosed` is queued.
    pub fn close(&mut self, events: &mut VecDeque<ConnectionEvent>) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;

        let ids: Vec<ChannelId> = self
            .channels
            .keys()
            .copied()
            .filter(|id| !id.is_control())
            .collect();
        for id in ids {
            self.invalidate_channel(id, events);
        }
        if let Some(control) = self.channels.get_mut(&ChannelId::CONTROL) {
            control.close();
        }
        self.channels.clear();
        self.pending_replies.clear();
        self.read_buf.clear();
        self.transport.close();

        info!(
            connection = %self.id,
            purpose = %self.purpose,
            age_secs = self.age().as_secs(),
            "Connection closed"
        );
        events.push_back(ConnectionEvent::ConnectionClosed {
            connection: self.id,
        });
        true
    }

    fn send_command(&mut self, channel: ChannelId, command: &Command) -> Result<()> {
        if self.closed {
            return Err(NodeError::ConnectionClosed(self.id));
        }
        let encoded = CommandCodec::encode_packet(channel, command);
        trace!(
            connection = %self.id,
            channel = %channel,
            opcode = %command.opcode,
            len = encoded.frame.len(),
            "Sending packet"
        );
        self.transport.send(&encoded.frame)?;
        Ok(())
    }

    fn reply(&mut self, channel: ChannelId, opcode: Opcode, identifier: u16, status: ReplyStatus) {
        let reply = Command::reply(opcode, identifier, status, Bytes::new());
        if let Err(e) = self.send_command(channel, &reply) {
            warn!(connection = %self.id, channel = %channel, error = %e, "Failed to send reply");
        }
    }

    fn allocate_identifier(&mut self) -> u16 {
        loop {
            self.next_identifier = self.next_identifier.wrapping_add(1);
            if self.next_identifier != 0 && !self.pending_replies.contains_key(&self.next_identifier) {
                return self.next_identifier;
            }
        }
    }

    fn invalidate_channel(&mut self, id: ChannelId, events: &mut VecDeque<ConnectionEvent>) -> bool {
        let Some(mut channel) = self.channels.remove(&id) else {
            return false;
        };
        if !channel.close() {
            return false;
        }

        self.pending_replies.retain(|_, p| p.channel != id && p.opening != Some(id));
        debug!(connection = %self.id, channel = %id, "Channel invalidated");
        events.push_back(ConnectionEvent::ChannelInvalidated {
            connection: self.id,
            channel: id,
            channel_type: channel.channel_type(),
        });
        true
    }

    // ========================================
    // Inbound
    // ========================================

    /// Feeds bytes from the transport and handles every complete packet.
    ///
    /// # Errors
    /// Returns the framing error when the stream can't be resynchronised;
    /// the caller must close the connection.
    pub fn receive(
        &mut self,
        bytes: &[u8],
        registry: &CommandRegistry,
        events: &mut VecDeque<ConnectionEvent>,
    ) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.read_buf.extend_from_slice(bytes);

        while let Some(len) = CommandCodec::check_complete(&self.read_buf)? {
            let raw = self.read_buf.split_to(len).freeze();
            match CommandCodec::decode_packet(raw) {
                Ok(packet) => self.handle_packet(packet, registry, events),
                Err(e) if e.is_unrecoverable() => return Err(e.into()),
                Err(e) => {
                    warn!(connection = %self.id, error = %e, "Discarding malformed packet");
                }
            }
            if self.closed {
                break;
            }
        }
        Ok(())
    }

    fn handle_packet(
        &mut self,
        packet: Packet,
        registry: &CommandRegistry,
        events: &mut VecDeque<ConnectionEvent>,
    ) {
        let Packet { channel, command } = packet;

        if command.is_reply() {
            self.handle_reply(channel, command, events);
            return;
        }

        let Some(channel_type) = self
            .channels
            .get(&channel)
            .filter(|ch| ch.is_open())
            .map(Channel::channel_type)
        else {
            debug!(
                connection = %self.id,
                channel = %channel,
                opcode = %command.opcode,
                "Dropping command for a channel that isn't open"
            );
            return;
        };

        let opcode = command.opcode;
        let identifier = command.identifier;
        let wants_reply = command.wants_reply();

        let Some(body) = registry.process(&command) else {
            if wants_reply {
                self.reply(channel, opcode, identifier, registry.malformed_status(opcode));
            }
            return;
        };

        match (channel_type, body) {
            (ChannelType::Control, CommandBody::OpenChannel(open)) => {
                self.handle_open_channel(open, identifier, wants_reply, events);
            }
            (ChannelType::Control, CommandBody::CloseChannel(close)) => {
                if !close.channel.is_control() {
                    self.invalidate_channel(close.channel, events);
                }
                if wants_reply {
                    self.reply(channel, opcode, identifier, ReplyStatus::SUCCESS);
                }
            }
            (ChannelType::ContactRequest, CommandBody::ContactRequest(request)) => {
                self.handle_contact_request(channel, request, identifier, wants_reply, events);
            }
            (ChannelType::Chat, CommandBody::ChatMessage(message)) => {
                let sent_at = message.sent_time(Timestamp::now());
                events.push_back(ConnectionEvent::ChatMessageReceived {
                    connection: self.id,
                    channel,
                    text: message.text().to_string(),
                    sent_at,
                });
                if wants_reply {
                    self.reply(channel, opcode, identifier, ReplyStatus::SUCCESS);
                }
            }
            (channel_type, body) => {
                warn!(
                    connection = %self.id,
                    channel = %channel,
                    ?channel_type,
                    opcode = %body.opcode(),
                    "Command not valid on this channel type"
                );
                if wants_reply {
                    self.reply(channel, opcode, identifier, ReplyStatus::FAILED);
                }
            }
        }
    }

    fn handle_open_channel(
        &mut self,
        open: OpenChannel,
        identifier: u16,
        wants_reply: bool,
        events: &mut VecDeque<ConnectionEvent>,
    ) {
        // The peer opens odd ids if it dialed us
        let peer_opens_odd = self.direction == Direction::Inbound;

        let refusal = if open.channel.is_control() {
            Some("channel 0 is reserved")
        } else if open.channel_type == ChannelType::Control {
            Some("control channel type can't be opened")
        } else if self.channels.contains_key(&open.channel) {
            Some("channel id already in use")
        } else if open.channel.is_odd() != peer_opens_odd {
            Some("channel id has the wrong parity")
        } else {
            None
        };

        if let Some(reason) = refusal {
            warn!(
                connection = %self.id,
                channel = %open.channel,
                channel_type = ?open.channel_type,
                reason,
                "Refusing channel"
            );
            if wants_reply {
                self.reply(ChannelId::CONTROL, Opcode::OPEN_CHANNEL, identifier, ReplyStatus::FAILED);
            }
            return;
        }

        self.channels
            .insert(open.channel, Channel::remote(open.channel, open.channel_type));
        if wants_reply {
            self.reply(ChannelId::CONTROL, Opcode::OPEN_CHANNEL, identifier, ReplyStatus::SUCCESS);
        }

        debug!(
            connection = %self.id,
            channel = %open.channel,
            channel_type = ?open.channel_type,
            "Peer opened channel"
        );
        events.push_back(ConnectionEvent::ChannelOpened {
            connection: self.id,
            channel: open.channel,
            channel_type: open.channel_type,
            locally: false,
        });
    }

    fn handle_contact_request(
        &mut self,
        channel: ChannelId,
        request: ContactRequest,
        identifier: u16,
        wants_reply: bool,
        events: &mut VecDeque<ConnectionEvent>,
    ) {
        if !wants_reply {
            warn!(connection = %self.id, channel = %channel, "Contact request without reply identifier, dropping");
            return;
        }

        let recorded = self
            .channels
            .get_mut(&channel)
            .map(|ch| ch.record_request(identifier, request.clone()));

        match recorded {
            Some(Ok(())) => {
                let (nickname, message) = request.into_parts();
                events.push_back(ConnectionEvent::ContactRequestReceived {
                    connection: self.id,
                    channel,
                    nickname,
                    message,
                });
            }
            Some(Err(e)) => {
                warn!(connection = %self.id, channel = %channel, error = %e, "Rejecting repeated contact request");
                self.reply(
                    channel,
                    Opcode::CONTACT_REQUEST,
                    identifier,
                    ContactRequestStatus::Error.as_reply_status(),
                );
            }
            None => {}
        }
    }

    fn handle_reply(&mut self, channel: ChannelId, command: Command, events: &mut VecDeque<ConnectionEvent>) {
        let identifier = command.identifier;
        let Some(status) = command.reply_status() else {
            return;
        };

        let Some(pending) = self.pending_replies.get(&identifier).copied() else {
            warn!(connection = %self.id, identifier, "Reply for an unknown request, dropping");
            return;
        };
        if pending.channel != channel || pending.opcode != command.opcode {
            warn!(
                connection = %self.id,
                identifier,
                channel = %channel,
                opcode = %command.opcode,
                "Reply does not match its request, dropping"
            );
            return;
        }
        if status.is_final() {
            self.pending_replies.remove(&identifier);
        }

        if let Some(opening) = pending.opening {
            self.finish_open(opening, status, events);
            return;
        }

        events.push_back(ConnectionEvent::ReplyReceived {
            connection: self.id,
            channel,
            opcode: command.opcode,
            identifier,
            status,
            payload: command.payload,
        });
    }

    fn finish_open(&mut self, id: ChannelId, status: ReplyStatus, events: &mut VecDeque<ConnectionEvent>) {
        if status.is_error() {
            warn!(connection = %self.id, channel = %id, %status, "Peer refused channel");
            self.invalidate_channel(id, events);
            return;
        }
        if !status.is_final() {
            return;
        }

        let Some(channel) = self.channels.get_mut(&id) else {
            return;
        };
        channel.mark_open();
        let channel_type = channel.channel_type();
        events.push_back(ConnectionEvent::ChannelOpened {
            connection: self.id,
            channel: id,
            channel_type,
            locally: true,
        });
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("purpose", &self.purpose)
            .field("owner", &self.owner)
            .field("channels", &self.channels.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.closed {
            error!(connection = %self.id, "BUG: connection dropped without being closed");
            self.transport.close();
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use umbra_core::protocol::ChatMessage;
    use umbra_transport::MockSession;

    fn host() -> OnionHostname {
        OnionHostname::parse("abcdefghijklmnop.onion").unwrap()
    }

    fn inbound() -> (Connection, MockSession) {
        let session = MockSession::new(Direction::Inbound);
        let conn = Connection::new(ConnectionId::from_raw(1), Box::new(session.clone()));
        (conn, session)
    }

    fn packet(channel: u16, command: &Command) -> Vec<u8> {
        CommandCodec::encode_packet(ChannelId::new(channel), command)
            .frame
            .to_vec()
    }

    fn open(channel: u16, channel_type: ChannelType, identifier: u16) -> Vec<u8> {
        let cmd = OpenChannel {
            channel_type,
            channel: ChannelId::new(channel),
        }
        .to_command()
        .with_reply(identifier);
        packet(0, &cmd)
    }

    fn written(session: &MockSession) -> Vec<Packet> {
        session
            .take_written()
            .into_iter()
            .map(|b| CommandCodec::decode_packet(b).unwrap())
            .collect()
    }

    fn registry() -> CommandRegistry {
        CommandRegistry::standard().unwrap()
    }

    fn close(conn: &mut Connection) {
        conn.close(&mut VecDeque::new());
    }

    #[test]
    fn test_set_purpose_once() {
        let (mut conn, _session) = inbound();

        assert!(matches!(
            conn.set_purpose(Purpose::Unknown),
            Err(NodeError::InvalidPurpose { .. })
        ));
        conn.set_purpose(Purpose::InboundRequest).unwrap();
        let err = conn.set_purpose(Purpose::KnownContact).unwrap_err();
        assert!(err.is_ownership_conflict());
        assert_eq!(conn.purpose(), Purpose::InboundRequest);
        close(&mut conn);
    }

    #[test]
    fn test_claim_and_transfer() {
        let (mut conn, _session) = inbound();
        let request = Owner::IncomingRequest(host());
        let contact = Owner::Contact(ContactId::new(7));

        assert!(matches!(
            conn.claim(request.clone()),
            Err(NodeError::PurposeNotSet { .. })
        ));
        conn.set_purpose(Purpose::InboundRequest).unwrap();
        conn.claim(request.clone()).unwrap();
        assert!(matches!(
            conn.claim(contact.clone()),
            Err(NodeError::AlreadyClaimed { .. })
        ));

        assert!(matches!(
            conn.transfer(&contact, contact.clone()),
            Err(NodeError::NotOwner { .. })
        ));
        conn.transfer(&request, contact.clone()).unwrap();
        assert_eq!(conn.owner(), &contact);
        close(&mut conn);
    }

    #[test]
    fn test_peer_opens_channel() {
        let (mut conn, session) = inbound();
        let mut events = VecDeque::new();

        conn.receive(&open(1, ChannelType::ContactRequest, 9), &registry(), &mut events)
            .unwrap();

        assert!(conn.channel(ChannelId::new(1)).unwrap().is_open());
        assert_eq!(
            events.pop_front(),
            Some(ConnectionEvent::ChannelOpened {
                connection: conn.id(),
                channel: ChannelId::new(1),
                channel_type: ChannelType::ContactRequest,
                locally: false,
            })
        );

        let replies = written(&session);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].command.identifier, 9);
        assert_eq!(replies[0].command.reply_status(), Some(ReplyStatus::SUCCESS));
        close(&mut conn);
    }

    #[test]
    fn test_refuses_bad_channels() {
        let (mut conn, session) = inbound();
        let mut events = VecDeque::new();
        let registry = registry();

        // Even id from the dialing side, reserved id, control type
        conn.receive(&open(2, ChannelType::Chat, 1), &registry, &mut events).unwrap();
        conn.receive(&open(0, ChannelType::Chat, 2), &registry, &mut events).unwrap();
        conn.receive(&open(3, ChannelType::Control, 3), &registry, &mut events).unwrap();
        // Duplicate id
        conn.receive(&open(5, ChannelType::Chat, 4), &registry, &mut events).unwrap();
        conn.receive(&open(5, ChannelType::Chat, 5), &registry, &mut events).unwrap();

        let statuses: Vec<_> = written(&session)
            .iter()
            .map(|p| p.command.reply_status().unwrap())
            .collect();
        assert_eq!(
            statuses,
            vec![
                ReplyStatus::FAILED,
                ReplyStatus::FAILED,
                ReplyStatus::FAILED,
                ReplyStatus::SUCCESS,
                ReplyStatus::FAILED,
            ]
        );
        assert_eq!(events.len(), 1);
        close(&mut conn);
    }

    #[test]
    fn test_reassembles_split_packets() {
        let (mut conn, _session) = inbound();
        let mut events = VecDeque::new();
        let registry = registry();

        let mut bytes = open(1, ChannelType::ContactRequest, 1);
        let request = ContactRequest::new("Bob", "hello").unwrap();
        bytes.extend(packet(1, &request.to_command().with_reply(2)));

        for chunk in bytes.chunks(3) {
            conn.receive(chunk, &registry, &mut events).unwrap();
        }

        assert_eq!(events.len(), 2);
        assert_eq!(
            events.pop_back(),
            Some(ConnectionEvent::ContactRequestReceived {
                connection: conn.id(),
                channel: ChannelId::new(1),
                nickname: "Bob".into(),
                message: "hello".into(),
            })
        );
        close(&mut conn);
    }

    #[test]
    fn test_corrupt_length_is_unrecoverable() {
        let (mut conn, _session) = inbound();
        let err = conn
            .receive(&[0, 0, 0, 2, 0xff, 0xff], &registry(), &mut VecDeque::new())
            .unwrap_err();
        assert!(matches!(err, NodeError::Core(_)));
        close(&mut conn);
    }

    #[test]
    fn test_malformed_contact_request_gets_error() {
        let (mut conn, session) = inbound();
        let mut events = VecDeque::new();
        let registry = registry();

        conn.receive(&open(1, ChannelType::ContactRequest, 1), &registry, &mut events).unwrap();
        written(&session);
        events.clear();

        let garbage = Command::request(Opcode::CONTACT_REQUEST, vec![0xff]).with_reply(4);
        conn.receive(&packet(1, &garbage), &registry, &mut events).unwrap();

        assert!(events.is_empty());
        let replies = written(&session);
        assert_eq!(
            replies[0].command.reply_status(),
            Some(ContactRequestStatus::Error.as_reply_status())
        );
        assert!(!conn.is_closed());
        close(&mut conn);
    }

    #[test]
    fn test_second_request_on_channel_refused() {
        let (mut conn, session) = inbound();
        let mut events = VecDeque::new();
        let registry = registry();
        let request = ContactRequest::new("Bob", "hello").unwrap();

        conn.receive(&open(1, ChannelType::ContactRequest, 1), &registry, &mut events).unwrap();
        conn.receive(&packet(1, &request.to_command().with_reply(2)), &registry, &mut events)
            .unwrap();
        written(&session);
        events.clear();

        conn.receive(&packet(1, &request.to_command().with_reply(3)), &registry, &mut events)
            .unwrap();
        assert!(events.is_empty());
        let replies = written(&session);
        assert_eq!(replies[0].command.identifier, 3);
        assert!(replies[0].command.reply_status().unwrap().is_error());
        close(&mut conn);
    }

    #[test]
    fn test_chat_on_wrong_channel_type() {
        let (mut conn, session) = inbound();
        let mut events = VecDeque::new();
        let registry = registry();

        conn.receive(&open(1, ChannelType::ContactRequest, 1), &registry, &mut events).unwrap();
        written(&session);
        events.clear();

        let chat = ChatMessage::new("hi", 0).to_command().with_reply(2);
        conn.receive(&packet(1, &chat), &registry, &mut events).unwrap();
        assert!(events.is_empty());
        assert_eq!(written(&session)[0].command.reply_status(), Some(ReplyStatus::FAILED));
        close(&mut conn);
    }

    #[test]
    fn test_final_response_closes_channel() {
        let (mut conn, session) = inbound();
        let mut events = VecDeque::new();
        let registry = registry();
        let request = ContactRequest::new("Bob", "hello").unwrap();

        conn.receive(&open(1, ChannelType::ContactRequest, 1), &registry, &mut events).unwrap();
        conn.receive(&packet(1, &request.to_command().with_reply(2)), &registry, &mut events)
            .unwrap();
        written(&session);
        events.clear();

        let channel = ChannelId::new(1);
        conn.respond_contact_request(channel, ContactRequestStatus::Pending, &mut events)
            .unwrap();
        assert!(conn.channel(channel).is_some());

        conn.respond_contact_request(channel, ContactRequestStatus::Accepted, &mut events)
            .unwrap();
        assert!(conn.channel(channel).is_none());
        assert_eq!(
            events.pop_front(),
            Some(ConnectionEvent::ChannelInvalidated {
                connection: conn.id(),
                channel,
                channel_type: ChannelType::ContactRequest,
            })
        );

        let out = written(&session);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].command.reply_status(), ReplyStatus::new(0x01));
        assert_eq!(out[1].command.reply_status(), Some(ReplyStatus::SUCCESS));
        assert_eq!(out[2].channel, ChannelId::CONTROL);
        assert_eq!(out[2].command.opcode, Opcode::CLOSE_CHANNEL);
        close(&mut conn);
    }

    #[test]
    fn test_local_open_waits_for_reply() {
        let session = MockSession::new(Direction::Outbound);
        let mut conn = Connection::new(ConnectionId::from_raw(2), Box::new(session.clone()));
        let mut events = VecDeque::new();

        let id = conn.open_channel(ChannelType::Chat).unwrap();
        assert!(id.is_odd());
        assert!(!conn.channel(id).unwrap().is_open());
        assert!(conn
            .send_request(id, ChatMessage::new("early", 0).to_command(), false)
            .is_err());

        let sent = written(&session);
        let identifier = sent[0].command.identifier;
        let reply = Command::reply(Opcode::OPEN_CHANNEL, identifier, ReplyStatus::SUCCESS, Bytes::new());
        conn.receive(&packet(0, &reply), &registry(), &mut events).unwrap();

        assert!(conn.channel(id).unwrap().is_open());
        assert!(matches!(
            events.pop_front(),
            Some(ConnectionEvent::ChannelOpened { locally: true, .. })
        ));

        let next = conn.open_channel(ChannelType::Chat).unwrap();
        assert_eq!(next.as_u16(), id.as_u16() + 2);
        close(&mut conn);
    }

    #[test]
    fn test_unknown_reply_dropped() {
        let (mut conn, _session) = inbound();
        let mut events = VecDeque::new();
        let reply = Command::reply(Opcode::OPEN_CHANNEL, 77, ReplyStatus::SUCCESS, Bytes::new());
        conn.receive(&packet(0, &reply), &registry(), &mut events).unwrap();
        assert!(events.is_empty());
        close(&mut conn);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut conn, session) = inbound();
        let mut events = VecDeque::new();
        let registry = registry();

        conn.receive(&open(1, ChannelType::ContactRequest, 1), &registry, &mut events).unwrap();
        conn.receive(&open(3, ChannelType::Chat, 2), &registry, &mut events).unwrap();
        events.clear();

        assert!(conn.close(&mut events));
        assert!(!conn.close(&mut events));

        let invalidated = events
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::ChannelInvalidated { .. }))
            .count();
        assert_eq!(invalidated, 2);
        assert!(matches!(
            events.back(),
            Some(ConnectionEvent::ConnectionClosed { .. })
        ));
        assert_eq!(events.len(), 3);
        assert_eq!(session.close_calls(), 1);
        assert!(conn.authenticated_identity(AuthMode::HiddenService).is_none());
    }

    fn purpose() -> impl Strategy<Value = Purpose> {
        prop_oneof![
            Just(Purpose::Unknown),
            Just(Purpose::KnownContact),
            Just(Purpose::InboundRequest),
            Just(Purpose::OutboundRequest),
        ]
    }

    proptest! {
        #[test]
        fn prop_purpose_freezes_on_first_success(purposes in prop::collection::vec(purpose(), 1..8)) {
            let (mut conn, _session) = inbound();
            let first = purposes.iter().position(|p| *p != Purpose::Unknown);

            for (i, p) in purposes.iter().enumerate() {
                let accepted = conn.set_purpose(*p).is_ok();
                prop_assert_eq!(accepted, Some(i) == first);
            }
            prop_assert_eq!(
                conn.purpose(),
                first.map_or(Purpose::Unknown, |i| purposes[i])
            );
            close(&mut conn);
        }
    }
}
