// ============================================
// File: crates/umbra-node/src/logging.rs
// ============================================
//! # Logging Setup
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins over the
//! configured level. Calling it twice is harmless; the second call does
//! nothing.
//!
//! ## Last Modified
//! v0.1.0 - Initial logging setup

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes logging at `level` (trace, debug, info, warn, error).
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        init_logging("debug");
        init_logging("info");
        tracing::info!("logging initialized");
    }
}
