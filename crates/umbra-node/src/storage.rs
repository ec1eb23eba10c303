// ============================================
// File: crates/umbra-node/src/storage.rs
// ============================================
//! # Settings Storage
//!
//! ## Creation Reason
//! Persistence port for per-identity settings. The request workflow
//! reads and writes through `SettingsStore` only, so tests run against
//! an in-memory store and the node against a JSON file.
//!
//! ## Main Functionality
//! - `SettingsStore`: read / write / undefine / keys over dotted paths
//! - `JsonSettings`: `serde_json::Value` tree, optionally file backed
//!
//! ## Key Layout
//! ```text
//! {
//!   "contactRequests": {
//!     "<service id>": { "nickname", "message", "requestDate", "lastRequestDate" }
//!   },
//!   "hostnameBlacklist": [ "<hostname>.onion", ... ]
//! }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every write goes to disk before returning; the file is replaced via
//!   a temporary file and rename
//! - A missing file is an empty store, a corrupt one is an error
//!
//! ## Last Modified
//! v0.1.0 - Initial settings storage

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{NodeError, Result};

// ============================================
// SettingsStore Trait
// ============================================

/// Hierarchical key/value store addressed by dotted keys
/// (`contactRequests.abcdefghijklmnop`).
pub trait SettingsStore: Send {
    /// Value at `key`, if defined.
    fn read(&self, key: &str) -> Option<Value>;

    /// Sets `key`, creating intermediate objects.
    ///
    /// # Errors
    /// Returns `Storage` if the change can't be persisted.
    fn write(&mut self, key: &str, value: Value) -> Result<()>;

    /// Removes `key`. Removing an undefined key is not an error.
    ///
    /// # Errors
    /// Returns `Storage` if the change can't be persisted.
    fn undefine(&mut self, key: &str) -> Result<()>;

    /// Child keys of the object at `prefix` (`""` for the root).
    fn keys(&self, prefix: &str) -> Vec<String>;
}

// ============================================
// JsonSettings
// ============================================

/// JSON settings tree.
#[derive(Debug, Clone)]
pub struct JsonSettings {
    root: Map<String, Value>,
    path: Option<PathBuf>,
}

impl JsonSettings {
    /// Store that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            root: Map::new(),
            path: None,
        }
    }

    /// Opens a file-backed store.
    ///
    /// # Errors
    /// Returns `Storage` if the file exists but can't be read or isn't a
    /// JSON object.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let context = path.display().to_string();

        let root = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Map::new(),
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(NodeError::storage(context, "root is not a JSON object")),
                Err(e) => return Err(NodeError::storage(context, e.to_string())),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %context, "Settings file not found, starting empty");
                Map::new()
            }
            Err(e) => return Err(NodeError::storage(context, e.to_string())),
        };

        Ok(Self {
            root,
            path: Some(path),
        })
    }

    /// Backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The whole tree.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let context = path.display().to_string();

        let content = serde_json::to_string_pretty(&self.root)
            .map_err(|e| NodeError::storage(&context, e.to_string()))?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, content).map_err(|e| NodeError::storage(&context, e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| NodeError::storage(&context, e.to_string()))?;

        debug!(path = %context, "Settings saved");
        Ok(())
    }

    /// Persists the tree, putting `previous` back if that fails so a
    /// failed change never reaches disk with a later write.
    fn commit(&mut self, previous: Option<Map<String, Value>>) -> Result<()> {
        let result = self.persist();
        if let (Err(e), Some(previous)) = (&result, previous) {
            warn!(error = %e, "Settings change not saved, rolled back");
            self.root = previous;
        }
        result
    }

    /// Copy of the tree to roll back to, only needed when backed by a file.
    fn snapshot(&self) -> Option<Map<String, Value>> {
        self.path.as_ref().map(|_| self.root.clone())
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        let mut parts = split_key(key);
        let first = parts.next()?;
        parts.try_fold(self.root.get(first)?, |node, part| node.as_object()?.get(part))
    }
}

impl SettingsStore for JsonSettings {
    fn read(&self, key: &str) -> Option<Value> {
        self.lookup(key).cloned()
    }

    fn write(&mut self, key: &str, value: Value) -> Result<()> {
        let parts: Vec<&str> = split_key(key).collect();
        let Some((leaf, parents)) = parts.split_last() else {
            return Err(NodeError::storage(key, "empty key"));
        };

        let previous = self.snapshot();
        let mut node = &mut self.root;
        for part in parents {
            let entry = node
                .entry((*part).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Some(map) = entry.as_object_mut() else {
                return Err(NodeError::storage(key, "parent is not an object"));
            };
            node = map;
        }
        node.insert((*leaf).to_string(), value);

        self.commit(previous)
    }

    fn undefine(&mut self, key: &str) -> Result<()> {
        let parts: Vec<&str> = split_key(key).collect();
        let Some((leaf, parents)) = parts.split_last() else {
            return Ok(());
        };

        let previous = self.snapshot();
        let mut node = &mut self.root;
        for part in parents {
            match node.get_mut(*part) {
                Some(Value::Object(map)) => node = map,
                _ => return Ok(()),
            }
        }
        if node.remove(*leaf).is_none() {
            return Ok(());
        }

        self.commit(previous)
    }

    fn keys(&self, prefix: &str) -> Vec<String> {
        let object = if split_key(prefix).next().is_none() {
            Some(&self.root)
        } else {
            self.lookup(prefix).and_then(Value::as_object)
        };
        object
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn split_key(key: &str) -> impl Iterator<Item = &str> {
    key.split('.').filter(|part| !part.is_empty())
}

// ============================================
// Tests
// ============================================
