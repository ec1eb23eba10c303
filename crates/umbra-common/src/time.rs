// ============================================
// File: crates/umbra-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Request records persist absolute Unix timestamps, while the wire
//! protocol only ever carries relative ages ("sent N seconds ago"). This
//! module holds both representations and the conversions between them.
//!
//! ## Main Functionality
//! - `Timestamp`: Unix timestamp in whole seconds
//! - `Timestamp::age_at` / `Timestamp::from_age`: wire age conversions
//!
//! ## ⚠️ Important Note for Next Developer
//! - Ages are clamped to `u32`; timestamps in the future encode as age 0
//! - Never put absolute times on the wire, peers' clocks disagree
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================
// Timestamp
// ============================================

/// Unix timestamp in seconds.
///
/// # Example
/// ```
/// use umbra_common::time::Timestamp;
///
/// let now = Timestamp::from_secs(1_700_000_100);
/// let sent = Timestamp::from_secs(1_700_000_000);
/// assert_eq!(sent.age_at(now), 100);
/// assert_eq!(Timestamp::from_age(100, now), sent);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a new timestamp from Unix seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// Creates a timestamp for the current time.
    ///
    /// A system clock set before the Unix epoch reads as the epoch.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(secs)
    }

    /// Returns the Unix timestamp in seconds.
    #[must_use]
    pub const fn as_secs(&self) -> i64 {
        self.0
    }

    /// Seconds elapsed between this timestamp and `now`, clamped to `u32`.
    #[must_use]
    pub fn age_at(&self, now: Timestamp) -> u32 {
        let delta = now.0.saturating_sub(self.0);
        if delta <= 0 {
            0
        } else {
            u32::try_from(delta).unwrap_or(u32::MAX)
        }
    }

    /// Rebuilds the timestamp that was `age` seconds old at `now`.
    #[must_use]
    pub fn from_age(age: u32, now: Timestamp) -> Self {
        Self(now.0.saturating_sub(i64::from(age)))
    }
}

impl From<i64> for Timestamp {
    fn from(secs: i64) -> Self {
        Self(secs)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_now_is_after_2020() {
        assert!(Timestamp::now().as_secs() > 1_577_836_800);
    }

    #[test]
    fn test_age_roundtrip() {
        let now = Timestamp::from_secs(1_700_000_000);
        let sent = Timestamp::from_secs(1_699_999_000);
        let age = sent.age_at(now);
        assert_eq!(age, 1000);
        assert_eq!(Timestamp::from_age(age, now), sent);
    }

    #[test]
    fn test_future_timestamp_has_zero_age() {
        let now = Timestamp::from_secs(100);
        assert_eq!(Timestamp::from_secs(500).age_at(now), 0);
    }

    #[test]
    fn test_age_clamps_to_u32() {
        let now = Timestamp::from_secs(i64::MAX);
        assert_eq!(Timestamp::from_secs(0).age_at(now), u32::MAX);
    }

    #[test]
    fn test_serde_transparent() {
        let ts = Timestamp::from_secs(42);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "42");
        let back: Timestamp = serde_json::from_str("42").unwrap();
        assert_eq!(back, ts);
    }
}
