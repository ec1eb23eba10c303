// ============================================
// File: crates/umbra-node/src/config.rs
// ============================================
//! # Node Configuration
//!
//! ## Creation Reason
//! Provides configuration management for an umbra node, loaded from a
//! TOML file.
//!
//! ## Main Functionality
//! - `NodeConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Configuration validation
//! - Default values for every field
//!
//! ## Configuration Sections
//! - `identity`: local hidden-service hostname, settings file
//! - `limits`: connection limits
//! - `logging`: log level
//!
//! ## Example Configuration
//! ```toml
//! [identity]
//! hostname = "abcdefghijklmnop.onion"
//! settings_path = "/var/lib/umbra/settings.json"
//!
//! [limits]
//! max_connections = 256
//!
//! [logging]
//! level = "info"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All config changes require a restart
//! - Validate config before node start-up
//! - `RUST_LOG` overrides `logging.level`
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use umbra_common::OnionHostname;

use crate::error::{NodeError, Result};

// ============================================
// NodeConfig
// ============================================

/// Main node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Local identity.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!(path = %path_str, "Loading configuration");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NodeError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| NodeError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    ///
    /// # Errors
    /// Returns error if the content cannot be parsed or validated.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| NodeError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `ConfigInvalid` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        self.identity.validate()?;
        self.limits.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Serializes configuration to TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Local hostnames, parsed.
    ///
    /// # Errors
    /// Returns `ConfigInvalid` if the hostname is not a valid address.
    pub fn local_hostnames(&self) -> Result<Vec<OnionHostname>> {
        self.identity
            .hostname
            .as_deref()
            .map(|h| {
                OnionHostname::parse(h)
                    .map_err(|e| NodeError::config_invalid("identity.hostname", e.to_string()))
            })
            .into_iter()
            .collect()
    }
}

// ============================================
// IdentityConfig
// ============================================

/// Identity configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Our own hidden-service hostname, if already published.
    #[serde(default)]
    pub hostname: Option<String>,

    /// JSON settings file. `None` keeps settings in memory only.
    #[serde(default = "default_settings_path")]
    pub settings_path: Option<PathBuf>,
}

#[allow(clippy::unnecessary_wraps)]
fn default_settings_path() -> Option<PathBuf> {
    Some(PathBuf::from("umbra-settings.json"))
}

impl IdentityConfig {
    fn validate(&self) -> Result<()> {
        if let Some(hostname) = &self.hostname {
            OnionHostname::parse(hostname)
                .map_err(|e| NodeError::config_invalid("identity.hostname", e.to_string()))?;
        }
        if let Some(path) = &self.settings_path {
            if path.as_os_str().is_empty() {
                return Err(NodeError::config_invalid(
                    "identity.settings_path",
                    "cannot be empty",
                ));
            }
        }
        Ok(())
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            settings_path: default_settings_path(),
        }
    }
}

// ============================================
// LimitsConfig
// ============================================

/// Resource limits configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    256
}

impl LimitsConfig {
    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(NodeError::config_invalid(
                "limits.max_connections",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(NodeError::config_invalid(
                "logging.level",
                format!("unknown level '{}'", self.level),
            ));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.max_connections, 256);
        assert!(config.local_hostnames().unwrap().is_empty());
    }

    #[test]
    fn test_full_config_format() {
        let toml = r#"
            [identity]
            hostname = "ABCDEFGHIJKLMNOP"
            settings_path = "/tmp/umbra.json"

            [limits]
            max_connections = 16

            [logging]
            level = "debug"
        "#;

        let config = NodeConfig::from_str(toml).unwrap();
        assert_eq!(config.limits.max_connections, 16);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.local_hostnames().unwrap(),
            vec![OnionHostname::parse("abcdefghijklmnop.onion").unwrap()]
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = NodeConfig::from_str("[limits]\nmax_connections = 4\n").unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.identity.settings_path.is_some());
    }

    #[test]
    fn test_invalid_values() {
        let err = NodeConfig::from_str("[limits]\nmax_connections = 0\n").unwrap_err();
        assert!(err.is_config_error());

        assert!(NodeConfig::from_str("[identity]\nhostname = \"example.com\"\n").is_err());
        assert!(NodeConfig::from_str("[logging]\nlevel = \"loud\"\n").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = NodeConfig::default();
        let reparsed = NodeConfig::from_str(&config.to_toml()).unwrap();
        assert_eq!(reparsed.limits.max_connections, config.limits.max_connections);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = NodeConfig::load("/nonexistent/umbra.toml").await.unwrap_err();
        assert!(matches!(err, NodeError::ConfigLoad { .. }));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("umbra.toml");
        std::fs::write(&path, "[limits]\nmax_connections = 8\n").unwrap();

        let config = NodeConfig::load(&path).await.unwrap();
        assert_eq!(config.limits.max_connections, 8);
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn test_load_absent_file_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = NodeConfig::load(dir.path().join("absent.toml"))
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
