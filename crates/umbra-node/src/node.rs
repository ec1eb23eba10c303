// ============================================
// File: crates/umbra-node/src/node.rs
// ============================================
//! # Node Orchestrator
//!
//! ## Creation Reason
//! Owns every piece of node state and drives it from a single dispatch
//! loop, so no component needs locking.
//!
//! ## Main Functionality
//! - `Node`: state owner and dispatch loop
//! - `NodeHandle`: clonable handle for operator commands and shutdown
//! - Event routing from connections to the request workflow and contacts
//!
//! ## Dispatch Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Node::run                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │   tokio::select! ─┬─ shutdown signal ──────► stop           │
//! │                   ├─ NodeCommand ──────────► accept/reject  │
//! │                   └─ TransportEvent ───────► arena          │
//! │                                                 │           │
//! │                                                 ▼           │
//! │   drain ConnectionEvents ─► request manager / contacts      │
//! │                                                 │           │
//! │                                                 ▼           │
//! │   publish RequestEvents ─► collect_garbage                  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Handlers never await; the only suspension point is the select
//! - Garbage collection runs only after the event queue is empty
//! - Settings writes are synchronous file writes inside the loop
//!
//! ## Last Modified
//! v0.1.0 - Initial node implementation

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use umbra_common::{ContactId, OnionHostname};
use umbra_core::protocol::{ChannelType, CommandRegistry};
use umbra_transport::{TransportEvent, TransportEventSource};

use crate::config::NodeConfig;
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::contacts::{Contacts, ContactsManager};
use crate::error::{NodeError, Result};
use crate::services::{IncomingRequestManager, RequestContext, RequestEvent, RequestSummary};
use crate::storage::JsonSettings;

/// Capacity of the operator command queue.
const COMMAND_QUEUE_SIZE: usize = 32;

/// Capacity of the request notification feed.
const REQUEST_EVENT_CAPACITY: usize = 64;

// ============================================
// NodeCommand / NodeHandle
// ============================================

/// Operator command delivered to the dispatch loop.
#[derive(Debug)]
pub enum NodeCommand {
    /// Accept a pending request.
    Accept {
        /// Request hostname
        hostname: OnionHostname,
        /// Existing contact to bind instead of creating one
        contact: Option<ContactId>,
        /// Result channel
        reply: oneshot::Sender<Result<ContactId>>,
    },
    /// Reject a pending request.
    Reject {
        /// Request hostname
        hostname: OnionHostname,
        /// Result channel
        reply: oneshot::Sender<Result<()>>,
    },
    /// List pending requests.
    ListRequests {
        /// Result channel
        reply: oneshot::Sender<Vec<RequestSummary>>,
    },
}

/// Handle to a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<NodeCommand>,
    shutdown_tx: broadcast::Sender<()>,
    request_events: broadcast::Sender<RequestEvent>,
}

impl NodeHandle {
    /// Accepts the request from `hostname`.
    ///
    /// # Errors
    /// Returns the workflow error, or `ShuttingDown` once the node stopped.
    pub async fn accept(&self, hostname: OnionHostname, contact: Option<ContactId>) -> Result<ContactId> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Accept {
            hostname,
            contact,
            reply,
        })
        .await?;
        rx.await.map_err(|_| NodeError::ShuttingDown)?
    }

    /// Rejects the request from `hostname`.
    ///
    /// # Errors
    /// Returns the workflow error, or `ShuttingDown` once the node stopped.
    pub async fn reject(&self, hostname: OnionHostname) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::Reject { hostname, reply }).await?;
        rx.await.map_err(|_| NodeError::ShuttingDown)?
    }

    /// Lists pending requests.
    ///
    /// # Errors
    /// Returns `ShuttingDown` once the node stopped.
    pub async fn list_requests(&self) -> Result<Vec<RequestSummary>> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeCommand::ListRequests { reply }).await?;
        rx.await.map_err(|_| NodeError::ShuttingDown)
    }

    /// Subscribes to request additions and removals.
    #[must_use]
    pub fn subscribe_requests(&self) -> broadcast::Receiver<RequestEvent> {
        self.request_events.subscribe()
    }

    /// Asks the dispatch loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn send(&self, command: NodeCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NodeError::ShuttingDown)
    }
}

// ============================================
// Node
// ============================================

/// Loop input, taken out of `select!` before it is handled.
enum Input {
    Shutdown,
    Command(NodeCommand),
    Transport(Option<TransportEvent>),
}

/// An umbra node.
///
/// # Lifecycle
/// 1. Create with `Node::new(config)`; persisted requests are restored
/// 2. Take a `NodeHandle` for operator commands
/// 3. Drive with `node.run(&mut source).await` until shutdown or the
///    event source ends
pub struct Node {
    connections: ConnectionManager,
    contacts: ContactsManager,
    requests: IncomingRequestManager,
    settings: JsonSettings,
    command_tx: mpsc::Sender<NodeCommand>,
    command_rx: mpsc::Receiver<NodeCommand>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    request_events: broadcast::Sender<RequestEvent>,
}

impl Node {
    /// Creates a node from configuration.
    ///
    /// # Errors
    /// Returns a configuration error, a `Storage` error for an unreadable
    /// settings file, or `StartupFailed` if the registry can't be built.
    pub fn new(config: &NodeConfig) -> Result<Self> {
        config.validate()?;

        let settings = match &config.identity.settings_path {
            Some(path) => JsonSettings::open(path)?,
            None => JsonSettings::in_memory(),
        };

        Self::with_settings(config, settings)
    }

    /// Creates a node over an already opened settings store.
    ///
    /// # Errors
    /// Returns `StartupFailed` if the command registry can't be built, or
    /// a configuration error for an invalid local hostname.
    pub fn with_settings(config: &NodeConfig, settings: JsonSettings) -> Result<Self> {
        let registry = CommandRegistry::standard()
            .map_err(|e| NodeError::startup_failed(format!("command registry: {e}")))?;
        let local_hostnames = config.local_hostnames()?;

        let mut requests = IncomingRequestManager::new(local_hostnames);
        requests.load_requests(&settings);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        // Subscribed up front so a shutdown sent before run() is not lost
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (request_events, _) = broadcast::channel(REQUEST_EVENT_CAPACITY);

        info!(
            max_connections = config.limits.max_connections,
            pending_requests = requests.len(),
            "Node initialized"
        );

        Ok(Self {
            connections: ConnectionManager::new(registry, config.limits.max_connections),
            contacts: ContactsManager::new(),
            requests,
            settings,
            command_tx,
            command_rx,
            shutdown_tx,
            shutdown_rx,
            request_events,
        })
    }

    /// Handle for commands and shutdown.
    #[must_use]
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            commands: self.command_tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            request_events: self.request_events.clone(),
        }
    }

    // ========================================
    // Accessors
    // ========================================

    /// Connection arena.
    #[must_use]
    pub const fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Contact list.
    #[must_use]
    pub const fn contacts(&self) -> &ContactsManager {
        &self.contacts
    }

    /// Pending requests.
    #[must_use]
    pub const fn requests(&self) -> &IncomingRequestManager {
        &self.requests
    }

    /// Settings store.
    #[must_use]
    pub const fn settings(&self) -> &JsonSettings {
        &self.settings
    }

    // ========================================
    // Dispatch loop
    // ========================================

    /// Runs until shutdown is requested or `source` ends. Every
    /// connection is closed on the way out.
    ///
    /// # Errors
    /// Currently always returns `Ok`; errors of single events are logged.
    pub async fn run<S>(&mut self, source: &mut S) -> Result<()>
    where
        S: TransportEventSource + ?Sized,
    {
        info!("Starting umbra node v{}", env!("CARGO_PKG_VERSION"));

        loop {
            let input = tokio::select! {
                _ = self.shutdown_rx.recv() => Input::Shutdown,
                Some(command) = self.command_rx.recv() => Input::Command(command),
                event = source.next_event() => Input::Transport(event),
            };

            match input {
                Input::Shutdown => {
                    debug!("Dispatch loop received shutdown signal");
                    break;
                }
                Input::Command(command) => self.handle_command(command),
                Input::Transport(Some(event)) => self.handle_transport_event(event),
                Input::Transport(None) => {
                    info!("Transport event source ended");
                    break;
                }
            }
            self.process_events();
        }

        info!("Shutting down node...");
        self.connections.close_all();
        self.process_events();
        info!("Node shutdown complete");
        Ok(())
    }

    /// Handles one transport event and everything it triggers.
    pub fn step(&mut self, event: TransportEvent) {
        self.handle_transport_event(event);
        self.process_events();
    }

    /// Accepts a pending request. See [`IncomingRequestManager::accept`].
    ///
    /// # Errors
    /// Returns the workflow error.
    pub fn accept(&mut self, hostname: &OnionHostname, contact: Option<ContactId>) -> Result<ContactId> {
        let mut ctx = RequestContext {
            connections: &mut self.connections,
            contacts: &mut self.contacts,
            settings: &mut self.settings,
        };
        let result = self.requests.accept(&mut ctx, hostname, contact);
        self.process_events();
        result
    }

    /// Rejects a pending request. See [`IncomingRequestManager::reject`].
    ///
    /// # Errors
    /// Returns the workflow error.
    pub fn reject(&mut self, hostname: &OnionHostname) -> Result<()> {
        let mut ctx = RequestContext {
            connections: &mut self.connections,
            contacts: &mut self.contacts,
            settings: &mut self.settings,
        };
        let result = self.requests.reject(&mut ctx, hostname);
        self.process_events();
        result
    }

    fn handle_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::Accept {
                hostname,
                contact,
                reply,
            } => {
                let result = self.accept(&hostname, contact);
                if let Err(e) = &result {
                    warn!(hostname = %hostname, error = %e, "Accept failed");
                }
                let _ = reply.send(result);
            }
            NodeCommand::Reject { hostname, reply } => {
                let result = self.reject(&hostname);
                if let Err(e) = &result {
                    warn!(hostname = %hostname, error = %e, "Reject failed");
                }
                let _ = reply.send(result);
            }
            NodeCommand::ListRequests { reply } => {
                let _ = reply.send(self.requests.summaries());
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { id, session } => {
                if let Err(e) = self.connections.add(id, session) {
                    debug!(connection = %id, error = %e, "Connection not admitted");
                }
            }
            TransportEvent::Data { id, bytes } => self.connections.handle_data(id, &bytes),
            TransportEvent::Disconnected { id } => self.connections.handle_disconnect(id),
        }
    }

    /// Delivers queued connection events until none are left, publishes
    /// request changes, then collects closed connections.
    fn process_events(&mut self) {
        while let Some(event) = self.connections.next_event() {
            self.dispatch(event);
        }

        while let Some(event) = self.requests.next_event() {
            match &event {
                RequestEvent::Added(hostname) => debug!(hostname = %hostname, "Request added"),
                RequestEvent::Removed(hostname) => debug!(hostname = %hostname, "Request removed"),
            }
            // No subscribers is fine
            let _ = self.request_events.send(event);
        }

        self.connections.collect_garbage();
    }

    fn dispatch(&mut self, event: ConnectionEvent) {
        let mut ctx = RequestContext {
            connections: &mut self.connections,
            contacts: &mut self.contacts,
            settings: &mut self.settings,
        };

        match event {
            ConnectionEvent::ChannelOpened {
                connection,
                channel,
                channel_type,
                locally,
            } => {
                debug!(connection = %connection, channel = %channel, ?channel_type, locally, "Channel opened");
            }
            ConnectionEvent::ContactRequestReceived {
                connection,
                channel,
                nickname,
                message,
            } => {
                self.requests
                    .handle_contact_request(&mut ctx, connection, channel, nickname, message);
            }
            ConnectionEvent::ChannelInvalidated {
                connection,
                channel,
                channel_type,
            } => {
                if channel_type == ChannelType::ContactRequest {
                    self.requests
                        .handle_channel_invalidated(ctx.connections, connection, channel);
                }
            }
            ConnectionEvent::ChatMessageReceived {
                connection,
                channel,
                text,
                sent_at,
            } => {
                let owner = ctx
                    .connections
                    .get(connection)
                    .map(|c| c.owner().clone());
                info!(
                    connection = %connection,
                    channel = %channel,
                    owner = ?owner,
                    sent_at = %sent_at,
                    len = text.len(),
                    "Chat message received"
                );
            }
            ConnectionEvent::ReplyReceived {
                connection,
                opcode,
                identifier,
                status,
                ..
            } => {
                debug!(connection = %connection, opcode = %opcode, identifier, %status, "Reply received");
            }
            ConnectionEvent::ConnectionClosed { connection } => {
                self.requests.handle_connection_closed(connection);
                ctx.contacts.connection_closed(connection);
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.connections.live_count() > 0 {
            error!(live = self.connections.live_count(), "Node dropped with live connections, closing them");
            self.connections.close_all();
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("connections", &self.connections)
            .field("contacts", &self.contacts.len())
            .field("requests", &self.requests.len())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_transport::{ChannelSource, Direction, MockSession};

    fn config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.identity.settings_path = None;
        config
    }

    #[test]
    fn test_new_restores_requests() {
        use crate::storage::SettingsStore;

        let mut settings = JsonSettings::in_memory();
        settings
            .write(
                "contactRequests.abcdefghijklmnop",
                serde_json::json!({"nickname": "Bob"}),
            )
            .unwrap();

        let node = Node::with_settings(&config(), settings).unwrap();
        assert_eq!(node.requests().len(), 1);
    }

    #[test]
    fn test_new_with_missing_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.identity.settings_path = Some(dir.path().join("settings.json"));

        let node = Node::new(&config).unwrap();
        assert!(node.requests().is_empty());
        assert!(node.settings().path().is_some());
    }

    #[test]
    fn test_step_admits_and_closes() {
        let mut node = Node::new(&config()).unwrap();
        let session = MockSession::new(Direction::Inbound);
        let id = umbra_common::ConnectionId::from_raw(500);

        node.step(TransportEvent::Connected {
            id,
            session: Box::new(session.clone()),
        });
        assert!(node.connections().is_live(id));

        node.step(TransportEvent::Disconnected { id });
        assert!(node.connections().is_empty());
        assert_eq!(session.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut node = Node::new(&config()).unwrap();
        let handle = node.handle();
        let (_tx, mut source) = ChannelSource::channel();

        handle.shutdown();
        node.run(&mut source).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_source_ends() {
        let mut node = Node::new(&config()).unwrap();
        let (tx, mut source) = ChannelSource::channel();
        let session = MockSession::new(Direction::Inbound);
        tx.send(TransportEvent::Connected {
            id: umbra_common::ConnectionId::from_raw(501),
            session: Box::new(session.clone()),
        })
        .unwrap();
        drop(tx);

        node.run(&mut source).await.unwrap();
        assert_eq!(session.close_calls(), 1);
        assert!(node.connections().is_empty());
    }

    #[tokio::test]
    async fn test_handle_after_node_dropped() {
        let node = Node::new(&config()).unwrap();
        let handle = node.handle();
        drop(node);

        assert!(matches!(
            handle.list_requests().await,
            Err(NodeError::ShuttingDown)
        ));
    }
}
