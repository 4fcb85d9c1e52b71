//! Billing module for entitlement management and usage metering
//!
//! This module handles:
//! - Account tiers and their daily limits (Basic/Pro/Vip)
//! - Daily usage tracking per metered capability
//! - Activation code redemption
//! - Time-limited subscriptions and their expiry
//! - Limit enforcement before chat, test generation and games

pub mod clock;
mod codes;
mod limits;
mod subscription;
mod types;
mod usage;
mod watchdog;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codes::{
    catalog_size, lookup, normalize_code, redeem, CodeGrant, DurationClass, RedemptionError,
    RedemptionOutcome, SubscriptionPackage, LIFETIME_MONTHS, SUBSCRIPTION_PACKAGES,
};
pub use limits::LimitEnforcer;
pub use subscription::{ManagerHooks, SubscriptionManager};
pub use types::{
    AccountTier, DailyLimits, DailyUsage, LimitCheckResult, LimitDenialReason, RemainingQuota,
    SubscriptionInfo, SubscriptionState, UsageKind, UserProfile,
};
pub use usage::{effective_usage, record_usage};
pub use watchdog::{ExpiryWatchdog, DEFAULT_WATCHDOG_INTERVAL};

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::notifications::{ExpiryPrompt, NotificationCenter};
use crate::storage::KeyValueStore;

/// Everything one session needs: store, inbox, manager and its watchdog
pub struct BillingState {
    pub store: Arc<dyn KeyValueStore>,
    pub notifications: Arc<NotificationCenter>,
    pub subscription_manager: Arc<SubscriptionManager>,
    watchdog: Mutex<Option<ExpiryWatchdog>>,
    watchdog_interval: Duration,
}

impl BillingState {
    /// Rehydrate a session from `store`
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        expiry_prompt: Arc<dyn ExpiryPrompt>,
        upgrade_url: &str,
        watchdog_interval: Duration,
    ) -> Self {
        let notifications = Arc::new(NotificationCenter::load(store.clone()));
        let subscription_manager = Arc::new(SubscriptionManager::load(
            store.clone(),
            clock,
            LimitEnforcer::new(upgrade_url),
            ManagerHooks {
                notifications: notifications.clone(),
                expiry_prompt,
            },
        ));

        Self {
            store,
            notifications,
            subscription_manager,
            watchdog: Mutex::new(None),
            watchdog_interval,
        }
    }

    /// Start (or restart) the expiry watchdog. Requires a Tokio runtime.
    pub fn start_watchdog(&self) {
        let mut slot = self.watchdog.lock().unwrap_or_else(|poisoned| {
            warn!("Watchdog mutex was poisoned, recovering");
            poisoned.into_inner()
        });
        // Replacing the handle drops, and so stops, any previous task
        *slot = Some(ExpiryWatchdog::spawn(
            &self.subscription_manager,
            self.watchdog_interval,
        ));
    }

    pub fn stop_watchdog(&self) {
        let mut slot = self.watchdog.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(mut watchdog) = slot.take() {
            watchdog.stop();
        }
    }

    pub fn is_watchdog_running(&self) -> bool {
        self.watchdog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(ExpiryWatchdog::is_running)
            .unwrap_or(false)
    }

    /// Wipe all persisted state.
    ///
    /// Persistence is suppressed first so nothing still holding this session can
    /// write stale records back. The session is unusable afterwards; the owner
    /// builds a new one from the cleared store.
    pub fn reset(&self) -> Result<(), String> {
        self.subscription_manager.suppress_persistence();
        self.notifications.suppress_persistence();
        self.stop_watchdog();

        self.store
            .clear()
            .map_err(|e| format!("Failed to clear storage: {}", e))?;

        info!("Application state reset");
        Ok(())
    }
}

impl Drop for BillingState {
    fn drop(&mut self) {
        self.stop_watchdog();
    }
}
