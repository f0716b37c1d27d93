//! Engine configuration
//!
//! Only the typed surface lives here; reading configuration files is left to
//! the embedding application.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default prefix of generated reverse foreign key names
pub const DEFAULT_REVERSE_PREFIX: &str = "rev_";

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Longest wait for resource locks; `None` waits until cancelled
    pub lock_timeout: Option<Duration>,
    /// How often a blocked statement re-checks its cancellation flag
    pub lock_poll_interval: Duration,
    /// Prefix of the reverse key created for a foreign key without an
    /// explicit reverse name
    pub default_reverse_prefix: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            lock_timeout: None,
            lock_poll_interval: Duration::from_millis(10),
            default_reverse_prefix: DEFAULT_REVERSE_PREFIX.to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lock timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Set the lock poll interval
    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    /// Parse a config; missing fields take their default
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reverse key name for foreign key `name`
    pub fn reverse_name(&self, name: &str) -> String {
        format!("{}{}", self.default_reverse_prefix, name)
    }
}
