//! Limit enforcement for metered actions
//!
//! Checks the effective tier and today's usage before a chat message, test
//! generation or game is admitted.

use super::types::{
    AccountTier, DailyLimits, DailyUsage, LimitCheckResult, LimitDenialReason, SubscriptionState,
    UsageKind,
};
use super::usage::effective_usage;

/// Limit enforcement service
pub struct LimitEnforcer {
    upgrade_url: String,
}

impl LimitEnforcer {
    /// Create a new limit enforcer
    pub fn new(upgrade_url: impl Into<String>) -> Self {
        Self {
            upgrade_url: upgrade_url.into(),
        }
    }

    /// Check if an action is allowed based on subscription state and usage
    ///
    /// A timed grant that has already lapsed is judged against Basic limits even if
    /// the watchdog has not downgraded it yet. Within the Basic allowance the action
    /// is still admitted (grace), it is not blocked outright.
    pub fn check_limit(
        &self,
        state: &SubscriptionState,
        usage: &DailyUsage,
        kind: UsageKind,
        now_ms: i64,
        today: &str,
    ) -> LimitCheckResult {
        let tier = state.effective_tier(now_ms);
        let limits = DailyLimits::for_tier(tier);
        let limit = limits.get_limit(kind);

        if limit == 0 {
            return LimitCheckResult::Denied {
                reason: LimitDenialReason::FeatureNotIncluded {
                    kind,
                    required_tier: Self::required_tier(kind),
                },
                upgrade_url: Some(self.upgrade_url.clone()),
            };
        }

        let used = effective_usage(usage, today).get_usage(kind);
        if used >= limit {
            return LimitCheckResult::Denied {
                reason: LimitDenialReason::DailyLimitExceeded { kind, limit, used },
                upgrade_url: if tier == AccountTier::Vip {
                    None
                } else {
                    Some(self.upgrade_url.clone())
                },
            };
        }

        LimitCheckResult::Allowed {
            remaining: limit - used,
        }
    }

    /// Lowest tier with a non-zero allowance for `kind`
    fn required_tier(kind: UsageKind) -> AccountTier {
        [AccountTier::Basic, AccountTier::Pro, AccountTier::Vip]
            .into_iter()
            .find(|tier| DailyLimits::for_tier(*tier).get_limit(kind) > 0)
            .unwrap_or(AccountTier::Vip)
    }
}
