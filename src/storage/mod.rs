//! Durable key-value persistence for entitlement state
//!
//! Records are stored as serialized JSON text under namespaced keys. Loading never
//! fails: absent or unparsable records fall back to defaults.

mod error;
mod json_file;
mod memory;
mod sqlite;

pub use error::StorageError;
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub const PROFILE_KEY: &str = "vip_tutor_profile";
pub const USAGE_KEY: &str = "vip_tutor_usage";
pub const NOTIFICATIONS_KEY: &str = "vip_tutor_notifications";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    /// Remove every key, including ones owned by other components
    fn clear(&self) -> Result<(), StorageError>;
}

/// Read and parse `key`, distinguishing absent from malformed.
pub fn load<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key)? {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::MalformedStoredState {
                key: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

/// Read `key`, substituting `None` for anything unreadable.
pub fn load_or_default<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    match load(store, key) {
        Ok(value) => value,
        Err(e) => {
            warn!(key, "Falling back to default: {}", e);
            None
        }
    }
}

/// Fire-and-forget writer with a one-shot suppression flag.
///
/// Once suppressed, every save is dropped for the rest of this persister's life so
/// that writers still in flight during a reset cannot bring cleared state back.
pub struct Persister {
    store: Arc<dyn KeyValueStore>,
    suppressed: AtomicBool,
}

impl Persister {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            suppressed: AtomicBool::new(false),
        }
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) {
        if self.is_suppressed() {
            debug!(key, "Persistence suppressed, dropping write");
            return;
        }

        let result = serde_json::to_string(value)
            .map_err(StorageError::from)
            .and_then(|json| self.store.set(key, &json));

        if let Err(e) = result {
            warn!(key, "Failed to persist record: {}", e);
        }
    }

    pub fn suppress(&self) {
        self.suppressed.store(true, Ordering::SeqCst);
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }
}
