// ============================================
// File: crates/umbra-transport/src/mock.rs
// ============================================
//! # Mock Network Implementation
//!
//! ## Creation Reason
//! Provides an in-memory transport for testing the node without an
//! anonymity network, keys or sockets.
//!
//! ## Main Functionality
//! - `MockSession`: a `Transport` whose writes are captured and whose
//!   identity proof is set by the test
//! - `MockNetwork`: a `TransportEventSource` the test pushes events into
//!
//! ## Usage in Tests
//! ```
//! use umbra_common::OnionHostname;
//! use umbra_transport::mock::{MockNetwork, MockSession};
//! use umbra_transport::traits::{AuthMode, Direction, Transport};
//!
//! let host = OnionHostname::parse("abcdefghijklmnop").unwrap();
//! let session = MockSession::new(Direction::Inbound)
//!     .with_identity(AuthMode::HiddenService, host.clone());
//! let network = MockNetwork::new();
//! let id = network.connect(session.clone());
//!
//! network.deliver(id, b"bytes from the peer".to_vec());
//! assert_eq!(session.authenticated_identity(AuthMode::HiddenService), Some(host));
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is for testing only - do not use in production
//! - Clones of a `MockSession` share state; keep one in the test and hand
//!   the other to the node
//! - Queues are bounded to catch runaway loops in tests
//!
//! ## Last Modified
//! v0.1.0 - Initial mock implementation

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use umbra_common::{ConnectionId, OnionHostname};

use crate::error::{Result, TransportError};
use crate::traits::{AuthMode, Direction, Transport, TransportEvent, TransportEventSource};

// ============================================
// Constants
// ============================================

/// Maximum number of writes or events to queue.
const MAX_QUEUE_SIZE: usize = 1000;

// ============================================
// MockSession
// ============================================

#[derive(Debug)]
struct SessionState {
    written: VecDeque<Bytes>,
    connected: bool,
    close_calls: usize,
    identities: HashMap<AuthMode, OnionHostname>,
}

/// In-memory session for tests.
///
/// # Features
/// - Captures every write for verification
/// - Identity proof configurable per `AuthMode`
/// - Records close calls
#[derive(Debug, Clone)]
pub struct MockSession {
    state: Arc<Mutex<SessionState>>,
    direction: Direction,
}

impl MockSession {
    /// Creates a connected session with no proven identity.
    #[must_use]
    pub fn new(direction: Direction) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                written: VecDeque::with_capacity(16),
                connected: true,
                close_calls: 0,
                identities: HashMap::new(),
            })),
            direction,
        }
    }

    /// Marks `hostname` as proven for `mode`.
    #[must_use]
    pub fn with_identity(self, mode: AuthMode, hostname: OnionHostname) -> Self {
        self.set_identity(mode, hostname);
        self
    }

    /// Marks `hostname` as proven for `mode` on a live session.
    pub fn set_identity(&self, mode: AuthMode, hostname: OnionHostname) {
        self.state.lock().identities.insert(mode, hostname);
    }

    /// Takes every chunk written so far.
    #[must_use]
    pub fn take_written(&self) -> Vec<Bytes> {
        self.state.lock().written.drain(..).collect()
    }

    /// Number of chunks waiting in the capture queue.
    #[must_use]
    pub fn written_count(&self) -> usize {
        self.state.lock().written.len()
    }

    /// How many times `close` was called.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }
}

impl Transport for MockSession {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.written.len() >= MAX_QUEUE_SIZE {
            return Err(TransportError::QueueFull {
                capacity: MAX_QUEUE_SIZE,
            });
        }
        state.written.push_back(Bytes::copy_from_slice(bytes));
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.close_calls += 1;
        state.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn authenticated_identity(&self, mode: AuthMode) -> Option<OnionHostname> {
        self.state.lock().identities.get(&mode).cloned()
    }

    fn direction(&self) -> Direction {
        self.direction
    }
}

// ============================================
// MockNetwork
// ============================================

#[derive(Debug, Default)]
struct NetworkInner {
    queue: Mutex<VecDeque<TransportEvent>>,
    notify: Notify,
    shut_down: AtomicBool,
}

/// In-memory event source for tests.
///
/// Clones share the same queue, so a test can keep one handle while the
/// node consumes the other.
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    inner: Arc<NetworkInner>,
}

impl MockNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Announces a new session and returns its id.
    pub fn connect(&self, session: impl Transport + 'static) -> ConnectionId {
        let id = ConnectionId::next();
        self.push(TransportEvent::Connected {
            id,
            session: Box::new(session),
        });
        id
    }

    /// Delivers bytes on a session.
    pub fn deliver(&self, id: ConnectionId, bytes: impl Into<Bytes>) {
        self.push(TransportEvent::Data {
            id,
            bytes: bytes.into(),
        });
    }

    /// Announces that a session went away.
    pub fn disconnect(&self, id: ConnectionId) {
        self.push(TransportEvent::Disconnected { id });
    }

    /// Ends the feed once queued events are consumed.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    /// Number of events not yet consumed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    fn push(&self, event: TransportEvent) {
        let mut queue = self.inner.queue.lock();
        assert!(queue.len() < MAX_QUEUE_SIZE, "Mock network event queue overflow");
        trace!(connection = %event.connection_id(), "Mock network queued event");
        queue.push_back(event);
        drop(queue);
        self.inner.notify.notify_one();
    }
}

#[async_trait]
impl TransportEventSource for MockNetwork {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            {
                let mut queue = self.inner.queue.lock();
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
            }

            if self.inner.shut_down.load(Ordering::Acquire) {
                return None;
            }

            // Wait for an event to be pushed
            self.inner.notify.notified().await;
        }
    }
}

// ============================================
// Tests
// ============================================
