// ============================================
// File: crates/umbra-node/src/services/request.rs
// ============================================
//! # Incoming Contact Request
//!
//! ## Creation Reason
//! One record per remote hostname that asked to become a contact and
//! has not been answered yet. The record survives restarts through the
//! settings store and may outlive the connection it arrived on.
//!
//! ## Main Functionality
//! - Persistent fields: nickname, message, first and last request time
//! - Optional live binding: connection + contact request channel
//! - Save / load / remove under `contactRequests.<service id>`
//!
//! ## ⚠️ Important Note for Next Developer
//! - `requestDate` is set once, on the first save
//! - Loading tolerates missing or mistyped fields; they read as empty
//!
//! ## Last Modified
//! v0.1.0 - Initial request record

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use umbra_common::{ChannelId, ConnectionId, OnionHostname, Timestamp};

use crate::error::{NodeError, Result};
use crate::storage::SettingsStore;

/// Settings key holding all pending requests.
pub const CONTACT_REQUESTS_KEY: &str = "contactRequests";

/// Persisted form of a request.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredRequest {
    nickname: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_date: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_request_date: Option<Timestamp>,
}

// ============================================
// IncomingContactRequest
// ============================================

/// A pending contact request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingContactRequest {
    hostname: OnionHostname,
    nickname: String,
    message: String,
    request_date: Option<Timestamp>,
    last_request_date: Option<Timestamp>,
    connection: Option<ConnectionId>,
    channel: Option<ChannelId>,
}

impl IncomingContactRequest {
    /// Creates an empty, unsaved record.
    #[must_use]
    pub fn new(hostname: OnionHostname) -> Self {
        Self {
            hostname,
            nickname: String::new(),
            message: String::new(),
            request_date: None,
            last_request_date: None,
            connection: None,
            channel: None,
        }
    }

    /// Settings key of a hostname's record.
    #[must_use]
    pub fn settings_key_for(hostname: &OnionHostname) -> String {
        format!("{CONTACT_REQUESTS_KEY}.{}", hostname.service_id())
    }

    /// Settings key of this record.
    #[must_use]
    pub fn settings_key(&self) -> String {
        Self::settings_key_for(&self.hostname)
    }

    // ========================================
    // Accessors
    // ========================================

    /// Normalized hostname.
    #[must_use]
    pub const fn hostname(&self) -> &OnionHostname {
        &self.hostname
    }

    /// Nickname the peer sent.
    #[must_use]
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Greeting the peer sent.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Time of the first request.
    #[must_use]
    pub const fn request_date(&self) -> Option<Timestamp> {
        self.request_date
    }

    /// Time of the latest request.
    #[must_use]
    pub const fn last_request_date(&self) -> Option<Timestamp> {
        self.last_request_date
    }

    /// Attached connection.
    #[must_use]
    pub const fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    /// Contact request channel on the attached connection.
    #[must_use]
    pub const fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    // ========================================
    // Mutation
    // ========================================

    /// Updates the data the peer sent.
    pub fn set_details(&mut self, nickname: impl Into<String>, message: impl Into<String>) {
        self.nickname = nickname.into();
        self.message = message.into();
    }

    /// Marks a repeated request.
    pub fn renew(&mut self, now: Timestamp) {
        self.last_request_date = Some(now);
    }

    /// Binds the record to a live channel.
    pub fn attach(&mut self, connection: ConnectionId, channel: ChannelId) {
        self.connection = Some(connection);
        self.channel = Some(channel);
    }

    /// Drops the live binding.
    pub fn clear_connection(&mut self) {
        self.connection = None;
        self.channel = None;
    }

    // ========================================
    // Persistence
    // ========================================

    /// Writes the record. The first save stamps both dates with `now`.
    ///
    /// # Errors
    /// Returns `Storage` if the store can't persist it.
    pub fn save(&mut self, settings: &mut dyn SettingsStore, now: Timestamp) -> Result<()> {
        if self.request_date.is_none() {
            self.request_date = Some(now);
            self.last_request_date = Some(now);
        }

        let stored = StoredRequest {
            nickname: self.nickname.clone(),
            message: self.message.clone(),
            request_date: self.request_date,
            last_request_date: self.last_request_date,
        };
        let value = serde_json::to_value(stored)
            .map_err(|e| NodeError::storage(self.settings_key(), e.to_string()))?;
        settings.write(&self.settings_key(), value)
    }

    /// Reads a record back. Missing data reads as empty.
    #[must_use]
    pub fn load(settings: &dyn SettingsStore, hostname: OnionHostname) -> Self {
        let key = Self::settings_key_for(&hostname);
        let stored = match settings.read(&key) {
            Some(value) => parse_stored(&key, value),
            None => StoredRequest::default(),
        };

        Self {
            hostname,
            nickname: stored.nickname,
            message: stored.message,
            request_date: stored.request_date,
            last_request_date: stored.last_request_date,
            connection: None,
            channel: None,
        }
    }

    /// Deletes the persisted record.
    ///
    /// # Errors
    /// Returns `Storage` if the store can't persist the removal.
    pub fn remove_settings(&self, settings: &mut dyn SettingsStore) -> Result<()> {
        settings.undefine(&self.settings_key())
    }

    /// Operator-facing snapshot.
    #[must_use]
    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            hostname: self.hostname.clone(),
            nickname: self.nickname.clone(),
            message: self.message.clone(),
            request_date: self.request_date,
            last_request_date: self.last_request_date,
            connected: self.connection.is_some(),
        }
    }
}

fn parse_stored(key: &str, value: Value) -> StoredRequest {
    if let Ok(stored) = serde_json::from_value::<StoredRequest>(value.clone()) {
        return stored;
    }

    // Salvage field by field
    warn!(key, "Stored contact request is malformed, reading what is usable");
    let text = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let date = |name: &str| value.get(name).and_then(Value::as_i64).map(Timestamp::from_secs);

    StoredRequest {
        nickname: text("nickname"),
        message: text("message"),
        request_date: date("requestDate"),
        last_request_date: date("lastRequestDate"),
    }
}

// ============================================
// RequestSummary
// ============================================

/// Snapshot of a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    /// Normalized hostname
    pub hostname: OnionHostname,
    /// Nickname
    pub nickname: String,
    /// Greeting
    pub message: String,
    /// First request
    pub request_date: Option<Timestamp>,
    /// Latest request
    pub last_request_date: Option<Timestamp>,
    /// Whether a live connection is attached
    pub connected: bool,
}

// ============================================
// Tests
// ============================================
