//! In-app notifications
//!
//! The entitlement engine pushes a record on expiry, cancellation and successful
//! redemption. The inbox keeps them newest first and persists every change.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::AccountTier;
use crate::storage::{self, KeyValueStore, Persister, NOTIFICATIONS_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    System,
    Admin,
    Achievement,
    Tip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub category: NotificationCategory,
    pub timestamp: i64, // Unix timestamp in ms
    pub is_read: bool,
}

impl Notification {
    /// Unread system notification
    pub fn system(title: impl Into<String>, message: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            message: message.into(),
            category: NotificationCategory::System,
            timestamp,
            is_read: false,
        }
    }
}

/// Receives notifications emitted by lifecycle transitions
pub trait NotificationSink: Send + Sync {
    fn push(&self, notification: Notification);
}

/// Presents the blocking "your package expired" prompt
pub trait ExpiryPrompt: Send + Sync {
    fn show_expired(&self, lapsed_tier: AccountTier);
}

/// Prompt that only logs; used when no UI is attached
pub struct LogExpiryPrompt;

impl ExpiryPrompt for LogExpiryPrompt {
    fn show_expired(&self, lapsed_tier: AccountTier) {
        info!(tier = %lapsed_tier, "Package expired, renewal prompt requested");
    }
}

fn acquire_read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("Notification lock was poisoned on read, recovering inner value");
        poisoned.into_inner()
    })
}

fn acquire_write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("Notification lock was poisoned on write, recovering inner value");
        poisoned.into_inner()
    })
}

/// Persisted notification inbox
pub struct NotificationCenter {
    items: RwLock<Vec<Notification>>,
    persister: Persister,
}

impl NotificationCenter {
    /// Rehydrate from `store`; unreadable data starts an empty inbox
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let items: Vec<Notification> =
            storage::load_or_default(store.as_ref(), NOTIFICATIONS_KEY).unwrap_or_default();
        Self {
            items: RwLock::new(items),
            persister: Persister::new(store),
        }
    }

    pub fn list(&self) -> Vec<Notification> {
        acquire_read_lock(&self.items).clone()
    }

    pub fn unread_count(&self) -> usize {
        acquire_read_lock(&self.items)
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    /// Returns false if no notification has this id
    pub fn mark_read(&self, id: &str) -> bool {
        self.update(|items| match items.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.is_read = true;
                true
            }
            None => false,
        })
    }

    pub fn mark_all_read(&self) {
        self.update(|items| items.iter_mut().for_each(|n| n.is_read = true));
    }

    /// Returns false if no notification has this id
    pub fn delete(&self, id: &str) -> bool {
        self.update(|items| {
            let before = items.len();
            items.retain(|n| n.id != id);
            items.len() != before
        })
    }

    /// Stop persisting; used during a full reset
    pub fn suppress_persistence(&self) {
        self.persister.suppress();
    }

    fn update<R>(&self, f: impl FnOnce(&mut Vec<Notification>) -> R) -> R {
        let mut items = acquire_write_lock(&self.items);
        let result = f(&mut items);
        self.persister.save(NOTIFICATIONS_KEY, &*items);
        result
    }
}

impl NotificationSink for NotificationCenter {
    fn push(&self, notification: Notification) {
        self.update(|items| items.insert(0, notification));
    }
}
