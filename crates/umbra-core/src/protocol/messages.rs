// ============================================
// File: crates/umbra-core/src/protocol/messages.rs
// ============================================
//! # Command Bodies
//!
//! ## Creation Reason
//! Defines the typed payloads of the built-in commands and the channel
//! types they travel on.
//!
//! ## Main Functionality
//! - `ChannelType`: control / contact request / chat
//! - `OpenChannel`, `CloseChannel`: control-channel commands
//! - `ContactRequest`: nickname + greeting of an inbound trust request
//! - `ContactRequestStatus`: reply statuses of the trust negotiation
//! - `ChatMessage`: relative age + text
//! - `CommandPayload` trait and the `CommandBody` sum type
//!
//! ## Payload Layouts
//! | Command | Payload |
//! |---------|---------|
//! | OpenChannel | `[type u8][channel u16]` |
//! | CloseChannel | `[channel u16]` |
//! | ChatMessage | `[age u32][len u32][utf8 text]` |
//! | ContactRequest | `[len u16][utf8 nickname][len u16][utf8 message]` |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Parsers consume fields in a fixed order and reject leftovers
//! - Chat messages carry an age, never an absolute time
//! - Contact request limits are counted in characters, not bytes
//!
//! ## Last Modified
//! v0.1.0 - Initial message definitions

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::warn;

use umbra_common::{ChannelId, Timestamp};

use crate::error::{CoreError, Result};
use crate::protocol::command::{Command, Opcode, ReplyStatus, MAX_COMMAND_DATA};

// ============================================
// Constants
// ============================================

/// Maximum nickname length of a contact request, in characters.
pub const MAX_NICKNAME_CHARS: usize = 30;

/// Maximum greeting length of a contact request, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Maximum chat text size in bytes (command limit minus age and length).
pub const MAX_CHAT_TEXT_BYTES: usize = MAX_COMMAND_DATA - 8;

// ============================================
// ChannelType
// ============================================

/// Channel type identifier.
///
/// # Values
/// | Value | Type |
/// |-------|------|
/// | 0x00 | Control |
/// | 0x01 | ContactRequest |
/// | 0x02 | Chat |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelType {
    /// Implicit channel 0, carries open/close commands.
    Control = 0x00,
    /// Carries a single trust request and its replies.
    ContactRequest = 0x01,
    /// Carries chat messages between contacts.
    Chat = 0x02,
}

impl ChannelType {
    /// Converts a byte to a `ChannelType`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Control),
            0x01 => Some(Self::ContactRequest),
            0x02 => Some(Self::Chat),
            _ => None,
        }
    }

    /// Converts the `ChannelType` to its byte representation.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for ChannelType {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self> {
        Self::from_byte(value).ok_or(CoreError::UnknownChannelType(value))
    }
}

// ============================================
// CommandPayload Trait
// ============================================

/// A typed command body bound to one opcode.
pub trait CommandPayload: Sized {
    /// Opcode this body is carried under.
    const OPCODE: Opcode;

    /// Human-readable command name for logs.
    const NAME: &'static str;

    /// Serializes the body.
    fn write_to(&self, buf: &mut BytesMut);

    /// Parses the body, consuming the whole payload.
    ///
    /// # Errors
    /// Returns a protocol error if a field is missing, invalid, or if
    /// bytes are left over.
    fn parse(payload: Bytes) -> Result<Self>;

    /// Builds a request command carrying this body.
    fn to_command(&self) -> Command {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        Command::request(Self::OPCODE, buf.freeze())
    }
}

// ============================================
// OpenChannel
// ============================================

/// Asks the peer to open a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenChannel {
    /// Type of the new channel
    pub channel_type: ChannelType,
    /// Id chosen by the opener
    pub channel: ChannelId,
}

impl CommandPayload for OpenChannel {
    const OPCODE: Opcode = Opcode::OPEN_CHANNEL;
    const NAME: &'static str = "OpenChannel";

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.channel_type.as_byte());
        buf.put_u16(self.channel.as_u16());
    }

    fn parse(mut payload: Bytes) -> Result<Self> {
        let channel_type = ChannelType::try_from(take_u8(&mut payload)?)?;
        let channel = ChannelId::new(take_u16(&mut payload)?);
        finish(&payload, 3)?;
        Ok(Self {
            channel_type,
            channel,
        })
    }
}

// ============================================
// CloseChannel
// ============================================

/// Announces that a channel has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseChannel {
    /// The closed channel
    pub channel: ChannelId,
}

impl CommandPayload for CloseChannel {
    const OPCODE: Opcode = Opcode::CLOSE_CHANNEL;
    const NAME: &'static str = "CloseChannel";

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.channel.as_u16());
    }

    fn parse(mut payload: Bytes) -> Result<Self> {
        let channel = ChannelId::new(take_u16(&mut payload)?);
        finish(&payload, 2)?;
        Ok(Self { channel })
    }
}

// ============================================
// ContactRequest
// ============================================

/// Inbound trust request: who the sender claims to be and what they say.
///
/// # Example
/// ```
/// use umbra_core::protocol::messages::{CommandPayload, ContactRequest};
///
/// let request = ContactRequest::new("Bob", "hello").unwrap();
/// let cmd = request.to_command();
/// let parsed = ContactRequest::parse(cmd.payload).unwrap();
/// assert_eq!(parsed.nickname(), "Bob");
///
/// assert!(ContactRequest::new("x".repeat(31), "").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRequest {
    nickname: String,
    message: String,
}

impl ContactRequest {
    /// Creates a request after checking the field limits.
    ///
    /// # Errors
    /// Returns `FieldTooLong` if the nickname exceeds
    /// [`MAX_NICKNAME_CHARS`] or the message exceeds [`MAX_MESSAGE_CHARS`].
    pub fn new(nickname: impl Into<String>, message: impl Into<String>) -> Result<Self> {
        let nickname = nickname.into();
        let message = message.into();
        check_chars("nickname", &nickname, MAX_NICKNAME_CHARS)?;
        check_chars("message", &message, MAX_MESSAGE_CHARS)?;
        Ok(Self { nickname, message })
    }

    /// Nickname the sender suggests for themselves.
    #[must_use]
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Greeting text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Splits the request into `(nickname, message)`.
    #[must_use]
    pub fn into_parts(self) -> (String, String) {
        (self.nickname, self.message)
    }
}

impl CommandPayload for ContactRequest {
    const OPCODE: Opcode = Opcode::CONTACT_REQUEST;
    const NAME: &'static str = "ContactRequest";

    fn write_to(&self, buf: &mut BytesMut) {
        // Character limits keep both fields well below u16::MAX bytes
        for field in [&self.nickname, &self.message] {
            buf.put_u16(u16::try_from(field.len()).unwrap_or(u16::MAX));
            buf.put_slice(field.as_bytes());
        }
    }

    fn parse(mut payload: Bytes) -> Result<Self> {
        let total = payload.len();
        let nickname_len = usize::from(take_u16(&mut payload)?);
        let nickname = take_string(&mut payload, nickname_len, "nickname")?;
        let message_len = usize::from(take_u16(&mut payload)?);
        let message = take_string(&mut payload, message_len, "message")?;
        finish(&payload, total - payload.len())?;
        Self::new(nickname, message)
    }
}

// ============================================
// ContactRequestStatus
// ============================================

/// Reply statuses of a contact request.
///
/// # Values
/// | Value | Status | Final |
/// |-------|--------|-------|
/// | 0x00 | Accepted | yes |
/// | 0x01 | Pending | no |
/// | 0x40 | Rejected | yes |
/// | 0x41 | Error | yes |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactRequestStatus {
    /// The receiver added the sender as a contact.
    Accepted,
    /// The request is waiting for a decision.
    Pending,
    /// The receiver declined; future requests are refused.
    Rejected,
    /// The request could not be processed.
    Error,
}

impl ContactRequestStatus {
    /// Converts to the wire status.
    #[must_use]
    pub const fn as_reply_status(self) -> ReplyStatus {
        let raw = match self {
            Self::Accepted => 0x00,
            Self::Pending => 0x01,
            Self::Rejected => 0x40,
            Self::Error => 0x41,
        };
        match ReplyStatus::new(raw) {
            Some(status) => status,
            None => ReplyStatus::FAILED,
        }
    }

    /// Converts from the wire status.
    #[must_use]
    pub const fn from_reply_status(status: ReplyStatus) -> Option<Self> {
        match status.as_byte() {
            0x00 => Some(Self::Accepted),
            0x01 => Some(Self::Pending),
            0x40 => Some(Self::Rejected),
            0x41 => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns `true` if the negotiation ends with this status.
    #[must_use]
    pub const fn is_final(self) -> bool {
        self.as_reply_status().is_final()
    }
}

// ============================================
// ChatMessage
// ============================================

/// Chat text with its age relative to the moment of encoding.
///
/// # Example
/// ```
/// use umbra_common::Timestamp;
/// use umbra_core::protocol::messages::ChatMessage;
///
/// let now = Timestamp::from_secs(1_000);
/// let msg = ChatMessage::sent_at("hi", Timestamp::from_secs(940), now);
/// assert_eq!(msg.age(), 60);
/// assert_eq!(msg.sent_time(Timestamp::from_secs(2_000)), Timestamp::from_secs(1_940));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    age: u32,
    text: String,
}

impl ChatMessage {
    /// Creates a message `age` seconds old.
    ///
    /// Text longer than [`MAX_CHAT_TEXT_BYTES`] is cut on a character
    /// boundary.
    #[must_use]
    pub fn new(text: impl Into<String>, age: u32) -> Self {
        let mut text = text.into();
        if text.len() > MAX_CHAT_TEXT_BYTES {
            let mut end = MAX_CHAT_TEXT_BYTES;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            warn!(size = text.len(), kept = end, "Chat message too long, truncating");
            text.truncate(end);
        }
        Self { age, text }
    }

    /// Creates a message that was written at `sent`, as seen at `now`.
    #[must_use]
    pub fn sent_at(text: impl Into<String>, sent: Timestamp, now: Timestamp) -> Self {
        Self::new(text, sent.age_at(now))
    }

    /// Seconds between writing and encoding.
    #[must_use]
    pub const fn age(&self) -> u32 {
        self.age
    }

    /// Message text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Maps the age onto the local clock.
    #[must_use]
    pub fn sent_time(&self, now: Timestamp) -> Timestamp {
        Timestamp::from_age(self.age, now)
    }
}

impl CommandPayload for ChatMessage {
    const OPCODE: Opcode = Opcode::CHAT_MESSAGE;
    const NAME: &'static str = "ChatMessage";

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32(self.age);
        buf.put_u32(u32::try_from(self.text.len()).unwrap_or(u32::MAX));
        buf.put_slice(self.text.as_bytes());
    }

    fn parse(mut payload: Bytes) -> Result<Self> {
        let total = payload.len();
        let age = take_u32(&mut payload)?;
        let len = usize::try_from(take_u32(&mut payload)?)
            .map_err(|_| CoreError::malformed("chat text length overflows usize"))?;
        let text = take_string(&mut payload, len, "text")?;
        finish(&payload, total - payload.len())?;
        Ok(Self { age, text })
    }
}

// ============================================
// CommandBody
// ============================================

/// Any parsed built-in command body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBody {
    /// See [`OpenChannel`]
    OpenChannel(OpenChannel),
    /// See [`CloseChannel`]
    CloseChannel(CloseChannel),
    /// See [`ContactRequest`]
    ContactRequest(ContactRequest),
    /// See [`ChatMessage`]
    ChatMessage(ChatMessage),
}

impl CommandBody {
    /// Opcode of the body.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::OpenChannel(_) => OpenChannel::OPCODE,
            Self::CloseChannel(_) => CloseChannel::OPCODE,
            Self::ContactRequest(_) => ContactRequest::OPCODE,
            Self::ChatMessage(_) => ChatMessage::OPCODE,
        }
    }
}

impl From<OpenChannel> for CommandBody {
    fn from(body: OpenChannel) -> Self {
        Self::OpenChannel(body)
    }
}

impl From<CloseChannel> for CommandBody {
    fn from(body: CloseChannel) -> Self {
        Self::CloseChannel(body)
    }
}

impl From<ContactRequest> for CommandBody {
    fn from(body: ContactRequest) -> Self {
        Self::ContactRequest(body)
    }
}

impl From<ChatMessage> for CommandBody {
    fn from(body: ChatMessage) -> Self {
        Self::ChatMessage(body)
    }
}

// ============================================
// Field Readers
// ============================================

fn take_u8(buf: &mut Bytes) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(CoreError::too_short(1, buf.remaining()));
    }
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut Bytes) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(CoreError::too_short(2, buf.remaining()));
    }
    Ok(buf.get_u16())
}

fn take_u32(buf: &mut Bytes) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(CoreError::too_short(4, buf.remaining()));
    }
    Ok(buf.get_u32())
}

fn take_string(buf: &mut Bytes, len: usize, field: &'static str) -> Result<String> {
    if buf.remaining() < len {
        return Err(CoreError::too_short(len, buf.remaining()));
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CoreError::InvalidUtf8 { field })
}

fn finish(rest: &Bytes, consumed: usize) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(CoreError::trailing(consumed, consumed + rest.len()))
    }
}

fn check_chars(field: &'static str, value: &str, max: usize) -> Result<()> {
    let count = value.chars().count();
    if count > max {
        return Err(CoreError::field_too_long(field, max, count));
    }
    Ok(())
}

// ============================================
// Tests
// ============================================
