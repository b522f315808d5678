//! In-flight mutation bookkeeping.
//!
//! [`UpdateTracker`] answers "is this key being written right now?". Marking a
//! key returns an [`UpdateGuard`]; the mark is cleared when the guard drops,
//! so it is cleared on success, on failure, on panic and when the mutation
//! future is dropped mid-flight.
//!
//! [`KeyedQueue`] gives each key a single in-flight mutation; later callers
//! for the same key wait for the earlier one to finish.

use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Mutex as AsyncMutex, OwnedMutexGuard};

use crate::managers::settings_store::StoreEvent;

pub struct UpdateTracker {
    in_flight: Mutex<HashMap<String, usize>>,
    events: broadcast::Sender<StoreEvent>,
}

impl UpdateTracker {
    pub fn new(events: broadcast::Sender<StoreEvent>) -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Mark `key` as updating until the returned guard is dropped.
    pub fn begin(&self, key: &str) -> UpdateGuard<'_> {
        let first = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            let count = in_flight.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            self.notify(key, true);
        }
        UpdateGuard {
            tracker: self,
            key: key.to_string(),
        }
    }

    pub fn is_updating(&self, key: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .is_some_and(|count| *count > 0)
    }

    pub fn updating_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn finish(&self, key: &str) {
        let cleared = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match in_flight.get_mut(key) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    in_flight.remove(key);
                    true
                }
                None => false,
            }
        };
        if cleared {
            self.notify(key, false);
        }
    }

    fn notify(&self, key: &str, updating: bool) {
        debug!("update state for '{}': {}", key, updating);
        // No subscribers is fine.
        let _ = self.events.send(StoreEvent::UpdatingChanged {
            key: key.to_string(),
            updating,
        });
    }
}

pub struct UpdateGuard<'a> {
    tracker: &'a UpdateTracker,
    key: String,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.tracker.finish(&self.key);
    }
}

/// One async lock per key, created on first use.
pub struct KeyedQueue {
    enabled: bool,
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedQueue {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for this key's turn. Returns `None` when queueing is disabled.
    pub async fn enter(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        if !self.enabled {
            return None;
        }
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(key.to_string()).or_default().clone()
        };
        Some(slot.lock_owned().await)
    }
}
