// ============================================
// File: crates/umbra-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! Defines the port through which the node talks to the anonymity
//! network: one `Transport` per authenticated byte stream, and an event
//! source that announces new streams, inbound bytes and disconnects.
//!
//! ## Main Functionality
//! - `Transport`: send/close a session, query its verified identity
//! - `TransportEvent`: connected / data / disconnected notifications
//! - `TransportEventSource`: async feed of transport events
//! - `ChannelSource`: event source backed by a tokio channel
//!
//! ## Design Philosophy
//! - Sessions are driven synchronously from the dispatch loop; only the
//!   event feed is awaited
//! - Identity proof is the transport's job; the node only asks for the
//!   result
//!
//! ## ⚠️ Important Note for Next Developer
//! - `authenticated_identity` must return `None` until the proof for that
//!   mode has completed
//! - Events for one session must be delivered in the order they happened
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use umbra_common::{ConnectionId, OnionHostname};

use crate::error::Result;

// ============================================
// AuthMode / Direction
// ============================================

/// Which identity proof is being asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMode {
    /// The peer proved possession of its hidden-service key.
    HiddenService,
    /// The peer proved it is a contact we already know.
    KnownToPeer,
}

/// Which side opened the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// We dialed the peer.
    Outbound,
    /// The peer dialed us.
    Inbound,
}

// ============================================
// Transport Trait
// ============================================

/// One authenticated, bidirectional byte stream to a peer.
///
/// # Thread Safety
/// Implementations must be `Send` so sessions can be handed from the
/// network task to the dispatch loop.
pub trait Transport: Send + fmt::Debug {
    /// Writes bytes to the peer.
    ///
    /// # Errors
    /// Returns `NotConnected` after close, or a send error.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Closes the stream. Closing twice is a no-op.
    fn close(&mut self);

    /// Returns `true` until the stream is closed by either side.
    fn is_connected(&self) -> bool;

    /// Verified remote hostname for `mode`, once the proof is complete.
    fn authenticated_identity(&self, mode: AuthMode) -> Option<OnionHostname>;

    /// Which side opened the stream.
    fn direction(&self) -> Direction;
}

// ============================================
// TransportEvent
// ============================================

/// Notification produced by the transport layer.
#[derive(Debug)]
pub enum TransportEvent {
    /// A new session is ready.
    Connected {
        /// Arena id assigned to the session
        id: ConnectionId,
        /// The session itself
        session: Box<dyn Transport>,
    },
    /// Bytes arrived on a session, in order.
    Data {
        /// Session the bytes belong to
        id: ConnectionId,
        /// Raw bytes, arbitrarily chunked
        bytes: Bytes,
    },
    /// The peer or network closed a session.
    Disconnected {
        /// Session that went away
        id: ConnectionId,
    },
}

impl TransportEvent {
    /// Session the event belongs to.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Connected { id, .. } | Self::Data { id, .. } | Self::Disconnected { id } => *id,
        }
    }
}

// ============================================
// TransportEventSource Trait
// ============================================

/// Async feed of transport events.
///
/// # Example
/// ```ignore
/// async fn pump<S: TransportEventSource>(source: &mut S) {
///     while let Some(event) = source.next_event().await {
///         handle(event);
///     }
/// }
/// ```
#[async_trait]
pub trait TransportEventSource: Send {
    /// Waits for the next event; `None` once the source is exhausted.
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

// ============================================
// ChannelSource
// ============================================

/// Event source fed through a tokio channel by a network adapter task.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl ChannelSource {
    /// Creates a sender/source pair.
    #[must_use]
    pub fn channel() -> (mpsc::UnboundedSender<TransportEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl TransportEventSource for ChannelSource {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_delivers_in_order() {
        let (tx, mut source) = ChannelSource::channel();
        let id = ConnectionId::from_raw(42);

        tx.send(TransportEvent::Data {
            id,
            bytes: Bytes::from_static(b"one"),
        })
        .unwrap();
        tx.send(TransportEvent::Disconnected { id }).unwrap();
        drop(tx);

        match source.next_event().await {
            Some(TransportEvent::Data { bytes, .. }) => assert_eq!(&bytes[..], b"one"),
            other => panic!("unexpected {other:?}"),
        }
        let event = source.next_event().await.unwrap();
        assert!(matches!(event, TransportEvent::Disconnected { .. }));
        assert_eq!(event.connection_id(), id);
        assert!(source.next_event().await.is_none());
    }
}
