use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::keyboard::OsType;

/// Tuning for the settings store and shortcut recorder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Platform used when naming modifier keys.
    #[serde(default)]
    pub os_type: OsType,
    /// Upper bound on a single backend call. `None` waits forever, in which
    /// case a hung call keeps its key marked as updating.
    #[serde(default)]
    pub command_timeout_ms: Option<u64>,
    /// Queue mutations of the same key behind each other.
    #[serde(default = "default_serialize_same_key")]
    pub serialize_same_key: bool,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_serialize_same_key() -> bool {
    true
}

fn default_event_capacity() -> usize {
    64
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            os_type: OsType::default(),
            command_timeout_ms: None,
            serialize_same_key: default_serialize_same_key(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl SyncConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("invalid sync configuration")
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}
