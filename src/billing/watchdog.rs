//! Expiry watchdog
//!
//! Periodically asks the manager to expire a lapsed timed grant. The check runs
//! once as soon as the watchdog starts and then on a fixed interval. Whenever the
//! tier or expiry changes the interval is replaced by a fresh one, which also runs
//! an immediate check. The watchdog only detects; `SubscriptionManager::expire` does
//! the downgrade.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::debug;

use super::subscription::SubscriptionManager;

/// Default check period
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Handle to a running watchdog task. Dropping it stops the task.
pub struct ExpiryWatchdog {
    handle: Option<JoinHandle<()>>,
}

impl ExpiryWatchdog {
    /// Start watching `manager`. Must be called inside a Tokio runtime.
    ///
    /// The task holds only a weak reference, so it also ends once the manager is
    /// dropped.
    pub fn spawn(manager: &Arc<SubscriptionManager>, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let weak: Weak<SubscriptionManager> = Arc::downgrade(manager);
        let mut changes = manager.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = new_ticker(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(manager) = weak.upgrade() else { break };
                        if let Some(tier) = manager.expire() {
                            debug!(tier = %tier, "Watchdog expired subscription");
                        }
                    }
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *changes.borrow_and_update();
                        debug!(state = ?state, "Subscription changed, re-arming expiry watchdog");
                        ticker = new_ticker(period);
                    }
                }
            }
            debug!("Expiry watchdog stopped");
        });

        Self {
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for ExpiryWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
