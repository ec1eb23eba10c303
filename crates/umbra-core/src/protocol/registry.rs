// ============================================
// File: crates/umbra-core/src/protocol/registry.rs
// ============================================
//! # Command Registry
//!
//! ## Creation Reason
//! Maps opcodes to their parsers. Every command type registers itself once
//! at start-up; inbound commands are then parsed through the registry so a
//! single entry point decides what is understood and what is discarded.
//!
//! ## Main Functionality
//! - `CommandSpec`: opcode, name, parser and the status used to answer
//!   requests that fail to parse
//! - `CommandRegistry::standard()`: the built-in command set
//! - `CommandRegistry::process()`: parse or log-and-discard
//!
//! ## ⚠️ Important Note for Next Developer
//! - Registering an opcode twice is a configuration bug and fails start-up
//! - `process` never returns an error: malformed peer input is logged
//!   and dropped, it must not take the connection down
//!
//! ## Last Modified
//! v0.1.0 - Initial registry

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::protocol::command::{Command, Opcode, ReplyStatus};
use crate::protocol::messages::{
    ChatMessage, CloseChannel, CommandBody, CommandPayload, ContactRequest,
    ContactRequestStatus, OpenChannel,
};

// ============================================
// CommandSpec
// ============================================

/// Parser signature stored in the registry.
pub type ParseFn = fn(Bytes) -> Result<CommandBody>;

/// Registration entry for one opcode.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Opcode handled by this entry
    pub opcode: Opcode,
    /// Command name for logs
    pub name: &'static str,
    /// Payload parser
    pub parse: ParseFn,
    /// Status sent back when a request with this opcode fails to parse
    pub malformed_status: ReplyStatus,
}

impl CommandSpec {
    /// Builds the entry for a typed command body.
    #[must_use]
    pub fn of<T>(malformed_status: ReplyStatus) -> Self
    where
        T: CommandPayload + Into<CommandBody>,
    {
        Self {
            opcode: T::OPCODE,
            name: T::NAME,
            parse: parse_as::<T>,
            malformed_status,
        }
    }
}

fn parse_as<T>(payload: Bytes) -> Result<CommandBody>
where
    T: CommandPayload + Into<CommandBody>,
{
    T::parse(payload).map(Into::into)
}

// ============================================
// CommandRegistry
// ============================================

/// Opcode to parser table.
#[derive(Debug, Default, Clone)]
pub struct CommandRegistry {
    specs: HashMap<Opcode, CommandSpec>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in commands.
    ///
    /// # Errors
    /// Returns `DuplicateOpcode` if two built-ins share an opcode.
    pub fn standard() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(CommandSpec::of::<OpenChannel>(ReplyStatus::FAILED))?;
        registry.register(CommandSpec::of::<CloseChannel>(ReplyStatus::FAILED))?;
        registry.register(CommandSpec::of::<ChatMessage>(ReplyStatus::FAILED))?;
        registry.register(CommandSpec::of::<ContactRequest>(
            ContactRequestStatus::Error.as_reply_status(),
        ))?;
        Ok(registry)
    }

    /// Registers a command.
    ///
    /// # Errors
    /// Returns `DuplicateOpcode` if the opcode is already taken.
    pub fn register(&mut self, spec: CommandSpec) -> Result<()> {
        if let Some(existing) = self.specs.get(&spec.opcode) {
            return Err(CoreError::DuplicateOpcode {
                opcode: spec.opcode.as_byte(),
                existing: existing.name,
            });
        }
        debug!(opcode = %spec.opcode, name = spec.name, "Registered command");
        self.specs.insert(spec.opcode, spec);
        Ok(())
    }

    /// Looks up the entry for `opcode`.
    #[must_use]
    pub fn get(&self, opcode: Opcode) -> Option<&CommandSpec> {
        self.specs.get(&opcode)
    }

    /// Returns `true` if `opcode` is registered.
    #[must_use]
    pub fn contains(&self, opcode: Opcode) -> bool {
        self.specs.contains_key(&opcode)
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Status to answer an unparseable request with.
    #[must_use]
    pub fn malformed_status(&self, opcode: Opcode) -> ReplyStatus {
        self.get(opcode)
            .map_or(ReplyStatus::FAILED, |spec| spec.malformed_status)
    }

    /// Parses an inbound request.
    ///
    /// Returns `None` (after logging) for replies, unknown opcodes and
    /// payloads that fail to parse.
    #[must_use]
    pub fn process(&self, command: &Command) -> Option<CommandBody> {
        if command.is_reply() {
            debug!(opcode = %command.opcode, "Replies are not parsed by the registry");
            return None;
        }

        let Some(spec) = self.get(command.opcode) else {
            warn!(opcode = %command.opcode, "Discarding command with unknown opcode");
            return None;
        };

        match (spec.parse)(command.payload.clone()) {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(
                    command = spec.name,
                    identifier = command.identifier,
                    error = %e,
                    "Discarding malformed command"
                );
                None
            }
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::ChannelType;
    use umbra_common::ChannelId;

    #[test]
    fn test_standard_registry() {
        let registry = CommandRegistry::standard().unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.contains(Opcode::OPEN_CHANNEL));
        assert!(registry.contains(Opcode::CONTACT_REQUEST));
        assert!(!registry.contains(Opcode::new(0x99)));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = CommandRegistry::standard().unwrap();
        let result = registry.register(CommandSpec::of::<ChatMessage>(ReplyStatus::FAILED));
        match result {
            Err(CoreError::DuplicateOpcode { opcode, existing }) => {
                assert_eq!(opcode, 0x10);
                assert_eq!(existing, "ChatMessage");
            }
            other => panic!("expected DuplicateOpcode, got {other:?}"),
        }
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_process_parses_known_command() {
        let registry = CommandRegistry::standard().unwrap();
        let cmd = OpenChannel {
            channel_type: ChannelType::Chat,
            channel: ChannelId::new(5),
        }
        .to_command();

        match registry.process(&cmd) {
            Some(CommandBody::OpenChannel(open)) => {
                assert_eq!(open.channel, ChannelId::new(5));
                assert_eq!(open.channel_type, ChannelType::Chat);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_process_discards_bad_input() {
        let registry = CommandRegistry::standard().unwrap();

        let unknown = Command::request(Opcode::new(0x99), vec![1, 2, 3]);
        assert!(registry.process(&unknown).is_none());

        let malformed = Command::request(Opcode::CONTACT_REQUEST, vec![0, 9, b'x']);
        assert!(registry.process(&malformed).is_none());

        let reply = Command::reply(Opcode::CHAT_MESSAGE, 1, ReplyStatus::SUCCESS, Bytes::new());
        assert!(registry.process(&reply).is_none());
    }

    #[test]
    fn test_malformed_status() {
        let registry = CommandRegistry::standard().unwrap();
        assert_eq!(
            registry.malformed_status(Opcode::CONTACT_REQUEST),
            ContactRequestStatus::Error.as_reply_status()
        );
        assert_eq!(registry.malformed_status(Opcode::new(0x99)), ReplyStatus::FAILED);
    }
}
