//! Subscription lifecycle and usage metering state
//!
//! `SubscriptionManager` is the single writer for the profile and daily usage
//! records. Each transition takes the write lock once, computes the next record
//! from the current one and persists it before releasing, so no caller can observe
//! a half-applied change. Notifications and prompts are emitted after the lock is
//! released.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::codes::{self, RedemptionError, RedemptionOutcome};
use super::limits::LimitEnforcer;
use super::types::{
    AccountTier, DailyLimits, DailyUsage, LimitCheckResult, RemainingQuota, SubscriptionInfo,
    SubscriptionState, UsageKind, UserProfile,
};
use super::usage;
use crate::notifications::{ExpiryPrompt, Notification, NotificationSink};
use crate::storage::{self, KeyValueStore, Persister, PROFILE_KEY, USAGE_KEY};

/// Helper to acquire read lock with poison recovery
fn acquire_read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("RwLock was poisoned on read, recovering inner value");
        poisoned.into_inner()
    })
}

/// Helper to acquire write lock with poison recovery
fn acquire_write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("RwLock was poisoned on write, recovering inner value");
        poisoned.into_inner()
    })
}

/// Profile and usage held together so one lock covers both
#[derive(Debug, Clone)]
struct EntitlementRecord {
    profile: UserProfile,
    usage: DailyUsage,
}

/// Collaborators a manager reports to
pub struct ManagerHooks {
    pub notifications: Arc<dyn NotificationSink>,
    pub expiry_prompt: Arc<dyn ExpiryPrompt>,
}

pub struct SubscriptionManager {
    record: RwLock<EntitlementRecord>,
    persister: Persister,
    clock: Arc<dyn Clock>,
    enforcer: LimitEnforcer,
    hooks: ManagerHooks,
    state_tx: watch::Sender<SubscriptionState>,
}

impl SubscriptionManager {
    /// Rehydrate profile and usage from `store`.
    ///
    /// Missing or corrupt records become a fresh Basic profile and a zeroed ledger;
    /// a ledger dated before today is rolled over immediately.
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        enforcer: LimitEnforcer,
        hooks: ManagerHooks,
    ) -> Self {
        let profile = storage::load_or_default::<UserProfile>(store.as_ref(), PROFILE_KEY)
            .map(UserProfile::normalized)
            .unwrap_or_else(|| UserProfile::new(clock.now_millis()));

        let stored_usage = storage::load_or_default::<DailyUsage>(store.as_ref(), USAGE_KEY);
        let (usage, rolled) = usage::rollover_on_load(stored_usage, &clock.today());
        if rolled {
            debug!(date = %usage.date, "Started a fresh usage ledger at load");
        }

        let persister = Persister::new(store);
        persister.save(PROFILE_KEY, &profile);
        persister.save(USAGE_KEY, &usage);

        let (state_tx, _) = watch::channel(profile.subscription_state());

        info!(
            tier = %profile.account_tier,
            expiry = ?profile.subscription_expiry,
            "Loaded entitlement state"
        );

        Self {
            record: RwLock::new(EntitlementRecord { profile, usage }),
            persister,
            clock,
            enforcer,
            hooks,
            state_tx,
        }
    }

    /// Watch (tier, expiry) changes; used to re-arm the expiry watchdog
    pub fn subscribe(&self) -> watch::Receiver<SubscriptionState> {
        self.state_tx.subscribe()
    }

    pub fn profile(&self) -> UserProfile {
        acquire_read_lock(&self.record).profile.clone()
    }

    /// Raw ledger as stored; may carry a stale date until the next write
    pub fn usage(&self) -> DailyUsage {
        acquire_read_lock(&self.record).usage.clone()
    }

    pub fn state(&self) -> SubscriptionState {
        acquire_read_lock(&self.record).profile.subscription_state()
    }

    /// Whether `kind` may be performed right now
    pub fn check_limit(&self, kind: UsageKind) -> bool {
        self.evaluate(kind).is_allowed()
    }

    /// Detailed admission decision for `kind`
    pub fn evaluate(&self, kind: UsageKind) -> LimitCheckResult {
        let record = acquire_read_lock(&self.record);
        self.enforcer.check_limit(
            &record.profile.subscription_state(),
            &record.usage,
            kind,
            self.clock.now_millis(),
            &self.clock.today(),
        )
    }

    /// Count one `kind` action. Does not re-check the limit.
    pub fn record_usage(&self, kind: UsageKind) -> DailyUsage {
        let mut record = acquire_write_lock(&self.record);
        record.usage = usage::record_usage(&record.usage, kind, &self.clock.today());
        self.persister.save(USAGE_KEY, &record.usage);

        debug!(kind = %kind, count = record.usage.get_usage(kind), "Recorded usage");
        record.usage.clone()
    }

    /// Check and record in one turn.
    ///
    /// Usage is charged at admission, before the gated action runs, so a failure
    /// downstream still consumes quota.
    pub fn admit(&self, kind: UsageKind) -> LimitCheckResult {
        let mut record = acquire_write_lock(&self.record);
        let today = self.clock.today();
        let result = self.enforcer.check_limit(
            &record.profile.subscription_state(),
            &record.usage,
            kind,
            self.clock.now_millis(),
            &today,
        );

        if result.is_allowed() {
            record.usage = usage::record_usage(&record.usage, kind, &today);
            self.persister.save(USAGE_KEY, &record.usage);
            debug!(kind = %kind, count = record.usage.get_usage(kind), "Admitted and recorded");
        } else {
            debug!(kind = %kind, "Denied");
        }
        result
    }

    /// Redeem an activation code
    pub fn redeem(&self, code: &str) -> Result<RedemptionOutcome, RedemptionError> {
        let now = self.clock.now_millis();
        let outcome = {
            let mut record = acquire_write_lock(&self.record);
            let (next, outcome) = codes::redeem(&record.profile, code, now)?;
            record.profile = next;
            self.commit_profile(&record.profile);
            outcome
        };

        info!(outcome = ?outcome, "Activation code redeemed");
        self.hooks.notifications.push(Notification::system(
            "Package activated",
            outcome.message(),
            now,
        ));
        Ok(outcome)
    }

    /// Cancel the current package; always ends on Basic
    pub fn cancel(&self) -> SubscriptionState {
        let now = self.clock.now_millis();
        let previous = {
            let mut record = acquire_write_lock(&self.record);
            let previous = record.profile.subscription_state();
            record.profile.account_tier = AccountTier::Basic;
            record.profile.subscription_expiry = None;
            self.commit_profile(&record.profile);
            previous
        };

        info!(previous = ?previous, "Subscription cancelled");
        self.hooks.notifications.push(Notification::system(
            "Subscription cancelled",
            "Your package has been cancelled. The account is back on the Basic package.",
            now,
        ));
        previous
    }

    /// Downgrade a lapsed timed grant to Basic.
    ///
    /// This is the only path that ends a timed subscription. It does nothing unless
    /// the current state is a timed grant whose expiry has passed, so repeated calls
    /// fire at most once per lapse. Returns the tier that lapsed.
    pub fn expire(&self) -> Option<AccountTier> {
        let now = self.clock.now_millis();
        let lapsed = {
            let mut record = acquire_write_lock(&self.record);
            let state = record.profile.subscription_state();
            if !state.is_lapsed(now) {
                return None;
            }
            let lapsed = state.tier();
            record.profile.account_tier = AccountTier::Basic;
            record.profile.subscription_expiry = None;
            self.commit_profile(&record.profile);
            lapsed
        };

        info!(tier = %lapsed, "Subscription expired, downgraded to basic");
        self.hooks.expiry_prompt.show_expired(lapsed);
        self.hooks.notifications.push(Notification::system(
            "Package expired",
            format!(
                "Your {} package has run out. The account is back on the Basic package with limited features. Renew to keep using the advanced features.",
                lapsed.label()
            ),
            now,
        ));
        Some(lapsed)
    }

    /// Dashboard view: effective tier, limits, today's usage and what is left
    pub fn subscription_info(&self) -> SubscriptionInfo {
        let record = acquire_read_lock(&self.record);
        let state = record.profile.subscription_state();
        let effective_tier = state.effective_tier(self.clock.now_millis());
        let limits = DailyLimits::for_tier(effective_tier);
        let usage = usage::effective_usage(&record.usage, &self.clock.today());

        SubscriptionInfo {
            tier: record.profile.account_tier,
            effective_tier,
            state,
            subscription_expiry: record.profile.subscription_expiry,
            limits,
            remaining: RemainingQuota::compute(&limits, &usage),
            usage,
        }
    }

    /// Stop persisting for the rest of this manager's life
    pub fn suppress_persistence(&self) {
        self.persister.suppress();
    }

    fn commit_profile(&self, profile: &UserProfile) {
        self.persister.save(PROFILE_KEY, profile);
        let next = profile.subscription_state();
        self.state_tx.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::billing::clock::{local_day, ManualClock};
    use crate::notifications::LogExpiryPrompt;
    use crate::storage::MemoryStore;
    use crate::billing::LimitDenialReason;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub items: Mutex<Vec<Notification>>,
    }

    impl RecordingSink {
        pub fn count(&self) -> usize {
            self.items.lock().unwrap().len()
        }
    }

    impl NotificationSink for RecordingSink {
        fn push(&self, notification: Notification) {
            self.items.lock().unwrap().push(notification);
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingPrompt {
        pub shown: Mutex<Vec<AccountTier>>,
    }

    impl ExpiryPrompt for RecordingPrompt {
        fn show_expired(&self, lapsed_tier: AccountTier) {
            self.shown.lock().unwrap().push(lapsed_tier);
        }
    }

    pub(crate) struct Harness {
        pub store: Arc<MemoryStore>,
        pub clock: Arc<ManualClock>,
        pub sink: Arc<RecordingSink>,
        pub prompt: Arc<RecordingPrompt>,
        pub manager: SubscriptionManager,
    }

    pub(crate) fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap()
    }

    pub(crate) fn harness_with(profile: Option<&UserProfile>, usage: Option<&DailyUsage>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        if let Some(profile) = profile {
            store
                .set(PROFILE_KEY, &serde_json::to_string(profile).unwrap())
                .unwrap();
        }
        if let Some(usage) = usage {
            store
                .set(USAGE_KEY, &serde_json::to_string(usage).unwrap())
                .unwrap();
        }
        let clock = Arc::new(ManualClock::new(start()));
        let sink = Arc::new(RecordingSink::default());
        let prompt = Arc::new(RecordingPrompt::default());
        let manager = SubscriptionManager::load(
            store.clone(),
            clock.clone(),
            LimitEnforcer::new("tutor://upgrade"),
            ManagerHooks {
                notifications: sink.clone(),
                expiry_prompt: prompt.clone(),
            },
        );
        Harness {
            store,
            clock,
            sink,
            prompt,
            manager,
        }
    }

    pub(crate) fn profile_with(tier: AccountTier, expiry: Option<i64>) -> UserProfile {
        UserProfile {
            account_tier: tier,
            subscription_expiry: expiry,
            ..UserProfile::new(0)
        }
    }

    #[test]
    fn test_basic_message_limit() {
        let h = harness_with(None, None);
        for _ in 0..14 {
            h.manager.record_usage(UsageKind::Message);
        }
        assert!(h.manager.check_limit(UsageKind::Message));

        h.manager.record_usage(UsageKind::Message);
        assert!(!h.manager.check_limit(UsageKind::Message));
        assert_eq!(h.manager.usage().messages_count, 15);
    }

    #[test]
    fn test_daily_rollover() {
        let yesterday = local_day(start() - Duration::days(1));
        let stale = DailyUsage {
            date: yesterday.clone(),
            messages_count: 15,
            ..Default::default()
        };
        let h = harness_with(None, None);
        // Simulate a session left open overnight: the ledger is dated yesterday
        acquire_write_lock(&h.manager.record).usage = stale;

        assert!(h.manager.check_limit(UsageKind::Message));
        let usage = h.manager.record_usage(UsageKind::Message);
        assert_eq!(usage.date, h.clock.today());
        assert_eq!(usage.messages_count, 1);
        assert_eq!(usage.tests_generated, 0);
    }

    #[test]
    fn test_stale_ledger_rolled_at_load() {
        let stale = DailyUsage {
            date: "2001-01-01".to_string(),
            messages_count: 15,
            ..Default::default()
        };
        let h = harness_with(None, Some(&stale));
        assert_eq!(h.manager.usage(), DailyUsage::empty(h.clock.today()));

        let stored: DailyUsage =
            serde_json::from_str(&h.store.get(USAGE_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.date, h.clock.today());
    }

    #[test]
    fn test_midnight_passes_mid_session() {
        let h = harness_with(None, None);
        for _ in 0..15 {
            h.manager.record_usage(UsageKind::Message);
        }
        assert!(!h.manager.check_limit(UsageKind::Message));

        h.clock.advance(Duration::days(1));
        assert!(h.manager.check_limit(UsageKind::Message));
        assert_eq!(h.manager.subscription_info().usage.messages_count, 0);
        // Stored ledger keeps the old date until the next write
        assert_ne!(h.manager.usage().date, h.clock.today());
    }

    #[test]
    fn test_redeem_idempotent() {
        let h = harness_with(None, None);
        h.manager.redeem("PRO-AX7D9Q").unwrap();
        let after_first = h.manager.profile();
        assert_eq!(after_first.account_tier, AccountTier::Pro);
        assert!(after_first.used_codes.contains("PRO-AX7D9Q"));

        let err = h.manager.redeem("PRO-AX7D9Q").unwrap_err();
        assert_eq!(err, RedemptionError::AlreadyRedeemed("PRO-AX7D9Q".to_string()));
        let after_second = h.manager.profile();
        assert_eq!(after_second.account_tier, after_first.account_tier);
        assert_eq!(after_second.subscription_expiry, after_first.subscription_expiry);
        // Only the successful redemption notified
        assert_eq!(h.sink.count(), 1);
    }

    #[test]
    fn test_failed_redeem_does_not_persist() {
        let h = harness_with(None, None);
        let before = h.store.get(PROFILE_KEY).unwrap();
        assert!(h.manager.redeem("NOT-A-CODE").is_err());
        assert_eq!(h.store.get(PROFILE_KEY).unwrap(), before);
        assert_eq!(h.sink.count(), 0);
    }

    #[test]
    fn test_stacking_through_manager() {
        let now = start().timestamp_millis();
        let day = Duration::days(1).num_milliseconds();
        let profile = profile_with(AccountTier::Pro, Some(now + 10 * day));
        let h = harness_with(Some(&profile), None);

        h.manager.redeem("PRO-BN6P3T").unwrap();
        assert_eq!(
            h.manager.profile().subscription_expiry,
            Some(now + 10 * day + 30 * day)
        );
    }

    #[test]
    fn test_expire_fires_once() {
        let now = start().timestamp_millis();
        let profile = profile_with(AccountTier::Pro, Some(now - 1));
        let h = harness_with(Some(&profile), None);

        assert_eq!(h.manager.expire(), Some(AccountTier::Pro));
        assert_eq!(h.manager.expire(), None);

        let profile = h.manager.profile();
        assert_eq!(profile.account_tier, AccountTier::Basic);
        assert_eq!(profile.subscription_expiry, None);
        assert_eq!(h.sink.count(), 1);
        assert_eq!(*h.prompt.shown.lock().unwrap(), vec![AccountTier::Pro]);
        assert!(h.sink.items.lock().unwrap()[0].message.contains("PRO"));
    }

    #[test]
    fn test_expire_ignores_active_and_lifetime() {
        let now = start().timestamp_millis();
        let h = harness_with(Some(&profile_with(AccountTier::Pro, Some(now + 1))), None);
        assert_eq!(h.manager.expire(), None);

        let h = harness_with(Some(&profile_with(AccountTier::Vip, None)), None);
        h.clock.advance(Duration::days(10_000));
        assert_eq!(h.manager.expire(), None);
        assert_eq!(h.manager.profile().account_tier, AccountTier::Vip);
    }

    #[test]
    fn test_grace_after_lapse_before_watchdog() {
        let now = start().timestamp_millis();
        let profile = profile_with(AccountTier::Pro, Some(now + 1_000));
        let h = harness_with(Some(&profile), None);
        for _ in 0..20 {
            h.manager.record_usage(UsageKind::Message);
        }
        assert!(h.manager.check_limit(UsageKind::Message));
        assert!(h.manager.check_limit(UsageKind::Test));

        h.clock.advance(Duration::seconds(2));
        // Profile still says Pro, but admission is judged on Basic limits
        assert_eq!(h.manager.profile().account_tier, AccountTier::Pro);
        assert!(!h.manager.check_limit(UsageKind::Message));
        assert!(!h.manager.check_limit(UsageKind::Test));
        // Games are still under the Basic allowance, so they are admitted
        assert!(h.manager.check_limit(UsageKind::Game));
        assert_eq!(h.manager.subscription_info().effective_tier, AccountTier::Basic);
    }

    #[test]
    fn test_usage_charged_even_if_action_fails() {
        let h = harness_with(None, None);

        let admitted = h.manager.admit(UsageKind::Game);
        assert!(admitted.is_allowed());
        // The game failed to load; the play is still counted
        let downstream: Result<(), &str> = Err("model call failed");
        assert!(downstream.is_err());
        assert_eq!(h.manager.usage().games_played, 1);

        let denied = h.manager.admit(UsageKind::Game);
        assert!(!denied.is_allowed());
        assert_eq!(h.manager.usage().games_played, 1);
    }

    #[test]
    fn test_record_usage_does_not_check_limit() {
        let h = harness_with(None, None);
        for _ in 0..3 {
            h.manager.record_usage(UsageKind::Test);
        }
        assert_eq!(h.manager.usage().tests_generated, 3);
        assert!(!h.manager.check_limit(UsageKind::Test));
    }

    #[test]
    fn test_cancel_from_any_state() {
        for profile in [
            profile_with(AccountTier::Pro, Some(i64::MAX)),
            profile_with(AccountTier::Vip, None),
            profile_with(AccountTier::Basic, None),
        ] {
            let h = harness_with(Some(&profile), None);
            h.manager.cancel();
            assert_eq!(h.manager.state(), SubscriptionState::Basic);
            assert_eq!(h.sink.count(), 1);
        }
    }

    #[test]
    fn test_reserved_code_through_manager() {
        let h = harness_with(Some(&profile_with(AccountTier::Vip, None)), None);
        h.manager.redeem("PRO-AX7D9Q").unwrap();
        let codes_before = h.manager.profile().used_codes;

        let outcome = h.manager.redeem("basic").unwrap();
        assert_eq!(outcome, RedemptionOutcome::Reset);
        assert_eq!(h.manager.state(), SubscriptionState::Basic);
        assert_eq!(h.manager.profile().used_codes, codes_before);
    }

    #[test]
    fn test_reset_code_through_manager() {
        let now = start().timestamp_millis();
        let h = harness_with(Some(&profile_with(AccountTier::Pro, Some(now + 1_000_000))), None);
        h.manager.redeem("VIP-RS6Y3J").unwrap();
        let codes_before = h.manager.profile().used_codes;

        for _ in 0..2 {
            let outcome = h.manager.redeem("RESET").unwrap();
            assert_eq!(outcome, RedemptionOutcome::Reset);
            let profile = h.manager.profile();
            assert_eq!(profile.account_tier, AccountTier::Basic);
            assert_eq!(profile.subscription_expiry, None);
            assert_eq!(profile.used_codes, codes_before);
        }
        assert!(!h.manager.profile().used_codes.contains("RESET"));
    }

    #[test]
    fn test_redeem_on_lapsed_grant_starts_from_now() {
        let now = start().timestamp_millis();
        let day = Duration::days(1).num_milliseconds();
        let h = harness_with(Some(&profile_with(AccountTier::Pro, Some(now - 5 * day))), None);

        h.manager.redeem("PRO-AX7D9Q").unwrap();
        assert_eq!(
            h.manager.state(),
            SubscriptionState::TimedPremium {
                tier: AccountTier::Pro,
                expiry: now + 30 * day
            }
        );
        // The old lapse is gone, so there is nothing left to expire
        assert_eq!(h.manager.expire(), None);
        assert!(h.prompt.shown.lock().unwrap().is_empty());
        assert_eq!(h.sink.count(), 1);
    }

    #[test]
    fn test_grace_denied_when_basic_allowance_used() {
        let now = start().timestamp_millis();
        let profile = profile_with(AccountTier::Pro, Some(now - 1));
        let played = DailyUsage {
            games_played: 1,
            ..DailyUsage::empty(local_day(start()))
        };
        let h = harness_with(Some(&profile), Some(&played));

        assert_eq!(h.manager.profile().account_tier, AccountTier::Pro);
        assert!(!h.manager.check_limit(UsageKind::Game));
        assert!(matches!(
            h.manager.evaluate(UsageKind::Game).denial_reason(),
            Some(LimitDenialReason::DailyLimitExceeded {
                kind: UsageKind::Game,
                limit: 1,
                used: 1
            })
        ));
        // Admission through the one-turn path is refused and charges nothing
        assert!(!h.manager.admit(UsageKind::Game).is_allowed());
        assert_eq!(h.manager.usage().games_played, 1);
    }

    #[test]
    fn test_state_changes_are_published() {
        let h = harness_with(None, None);
        let mut rx = h.manager.subscribe();
        assert!(!rx.has_changed().unwrap());

        h.manager.record_usage(UsageKind::Message);
        assert!(!rx.has_changed().unwrap());

        h.manager.redeem("VIP-RS6Y3J").unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            *rx.borrow_and_update(),
            SubscriptionState::LifetimePremium {
                tier: AccountTier::Vip
            }
        );

        // Cancelling twice only publishes once
        h.manager.cancel();
        rx.borrow_and_update();
        h.manager.cancel();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_corrupt_profile_falls_back_to_basic() {
        let store = Arc::new(MemoryStore::new());
        store.set(PROFILE_KEY, "not json at all").unwrap();
        store.set(USAGE_KEY, "{\"date\": 12}").unwrap();

        let manager = SubscriptionManager::load(
            store,
            Arc::new(ManualClock::new(start())),
            LimitEnforcer::new("tutor://upgrade"),
            ManagerHooks {
                notifications: Arc::new(RecordingSink::default()),
                expiry_prompt: Arc::new(LogExpiryPrompt),
            },
        );
        assert_eq!(manager.state(), SubscriptionState::Basic);
        assert_eq!(manager.usage().messages_count, 0);
    }

    #[test]
    fn test_subscription_info() {
        let h = harness_with(Some(&profile_with(AccountTier::Pro, Some(i64::MAX))), None);
        h.manager.record_usage(UsageKind::Test);
        h.manager.record_usage(UsageKind::Message);

        let info = h.manager.subscription_info();
        assert_eq!(info.effective_tier, AccountTier::Pro);
        assert_eq!(info.remaining.tests, 4);
        assert_eq!(info.remaining.messages, 99);
        assert_eq!(info.remaining.games, 10);
    }
}
