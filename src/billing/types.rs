//! Billing data types

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Limits above this value are shown as unlimited
pub const UNLIMITED_THRESHOLD: u32 = 9000;

/// Account tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTier {
    #[default]
    Basic,
    Pro,
    Vip,
}

impl AccountTier {
    /// Uppercase label used in user-facing text ("PRO", "VIP")
    pub fn label(&self) -> &'static str {
        match self {
            Self::Basic => "BASIC",
            Self::Pro => "PRO",
            Self::Vip => "VIP",
        }
    }
}

impl std::fmt::Display for AccountTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Pro => write!(f, "pro"),
            Self::Vip => write!(f, "vip"),
        }
    }
}

impl std::str::FromStr for AccountTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "pro" => Ok(Self::Pro),
            "vip" => Ok(Self::Vip),
            other => Err(format!("Unknown tier: {}", other)),
        }
    }
}

/// A metered capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    Message,
    Test,
    Game,
}

impl UsageKind {
    pub const ALL: [UsageKind; 3] = [UsageKind::Message, UsageKind::Test, UsageKind::Game];
}

impl std::fmt::Display for UsageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message => write!(f, "message"),
            Self::Test => write!(f, "test"),
            Self::Game => write!(f, "game"),
        }
    }
}

impl std::str::FromStr for UsageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "message" | "messages" => Ok(Self::Message),
            "test" | "tests" => Ok(Self::Test),
            "game" | "games" => Ok(Self::Game),
            other => Err(format!("Unknown usage kind: {}", other)),
        }
    }
}

/// Tier-specific daily limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLimits {
    pub messages: u32,
    pub tests: u32,
    pub games: u32,
}

impl DailyLimits {
    /// Get limits for a given tier
    pub fn for_tier(tier: AccountTier) -> Self {
        match tier {
            AccountTier::Basic => Self {
                messages: 15,
                tests: 0, // Test generation is a paid feature
                games: 1,
            },
            AccountTier::Pro => Self {
                messages: 100,
                tests: 5,
                games: 10,
            },
            // Effectively unlimited
            AccountTier::Vip => Self {
                messages: 9999,
                tests: 9999,
                games: 9999,
            },
        }
    }

    /// Get limit for a specific kind
    pub fn get_limit(&self, kind: UsageKind) -> u32 {
        match kind {
            UsageKind::Message => self.messages,
            UsageKind::Test => self.tests,
            UsageKind::Game => self.games,
        }
    }

    pub fn is_unlimited(&self, kind: UsageKind) -> bool {
        self.get_limit(kind) > UNLIMITED_THRESHOLD
    }

    /// Display form of a limit ("15", "∞")
    pub fn display_limit(&self, kind: UsageKind) -> String {
        if self.is_unlimited(kind) {
            "∞".to_string()
        } else {
            self.get_limit(kind).to_string()
        }
    }
}

/// Daily usage counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: String, // "YYYY-MM-DD" in the user's local time zone
    pub messages_count: u32,
    pub tests_generated: u32,
    pub games_played: u32,
}

impl DailyUsage {
    /// Zeroed record for the given day
    pub fn empty(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            ..Default::default()
        }
    }

    /// Get usage for a specific kind
    pub fn get_usage(&self, kind: UsageKind) -> u32 {
        match kind {
            UsageKind::Message => self.messages_count,
            UsageKind::Test => self.tests_generated,
            UsageKind::Game => self.games_played,
        }
    }

    pub(crate) fn counter_mut(&mut self, kind: UsageKind) -> &mut u32 {
        match kind {
            UsageKind::Message => &mut self.messages_count,
            UsageKind::Test => &mut self.tests_generated,
            UsageKind::Game => &mut self.games_played,
        }
    }
}

/// Identity and entitlement state.
///
/// Timestamps are Unix milliseconds so the persisted record stays compatible with
/// profiles written by the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub join_date: i64,
    pub account_tier: AccountTier,
    /// `None` means no time limit: either Basic or a lifetime grant
    pub subscription_expiry: Option<i64>,
    pub used_codes: BTreeSet<String>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: "Student".to_string(),
            email: None,
            phone: None,
            target: None,
            avatar: None,
            join_date: Utc::now().timestamp_millis(),
            account_tier: AccountTier::Basic,
            subscription_expiry: None,
            used_codes: BTreeSet::new(),
        }
    }
}

impl UserProfile {
    /// Fresh Basic profile joined at `join_date`
    pub fn new(join_date: i64) -> Self {
        Self {
            join_date,
            ..Default::default()
        }
    }

    /// Restore invariants on a rehydrated record: Basic never carries an expiry.
    pub fn normalized(mut self) -> Self {
        if self.account_tier == AccountTier::Basic {
            self.subscription_expiry = None;
        }
        self
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        SubscriptionState::of(self.account_tier, self.subscription_expiry)
    }
}

/// Lifecycle state derived from tier + expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "state")]
pub enum SubscriptionState {
    #[serde(rename = "basic")]
    Basic,
    #[serde(rename = "timedPremium")]
    TimedPremium { tier: AccountTier, expiry: i64 },
    #[serde(rename = "lifetimePremium")]
    LifetimePremium { tier: AccountTier },
}

impl SubscriptionState {
    pub fn of(tier: AccountTier, expiry: Option<i64>) -> Self {
        match (tier, expiry) {
            (AccountTier::Basic, _) => Self::Basic,
            (tier, Some(expiry)) => Self::TimedPremium { tier, expiry },
            (tier, None) => Self::LifetimePremium { tier },
        }
    }

    pub fn tier(&self) -> AccountTier {
        match self {
            Self::Basic => AccountTier::Basic,
            Self::TimedPremium { tier, .. } | Self::LifetimePremium { tier } => *tier,
        }
    }

    pub fn expiry(&self) -> Option<i64> {
        match self {
            Self::TimedPremium { expiry, .. } => Some(*expiry),
            _ => None,
        }
    }

    /// True for a timed grant whose expiry is strictly before `now_ms`
    pub fn is_lapsed(&self, now_ms: i64) -> bool {
        matches!(self, Self::TimedPremium { expiry, .. } if now_ms > *expiry)
    }

    /// Tier used for admission: a lapsed timed grant counts as Basic
    pub fn effective_tier(&self, now_ms: i64) -> AccountTier {
        if self.is_lapsed(now_ms) {
            AccountTier::Basic
        } else {
            self.tier()
        }
    }
}

/// Result of a limit check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum LimitCheckResult {
    #[serde(rename = "allowed")]
    Allowed { remaining: u32 },
    #[serde(rename = "denied")]
    Denied {
        reason: LimitDenialReason,
        upgrade_url: Option<String>,
    },
}

impl LimitCheckResult {
    /// Check if the action is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Get the denial reason if denied
    pub fn denial_reason(&self) -> Option<&LimitDenialReason> {
        match self {
            Self::Denied { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Reason for denying an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum LimitDenialReason {
    /// The effective tier has no allowance at all for this kind
    #[serde(rename = "featureNotIncluded")]
    FeatureNotIncluded {
        kind: UsageKind,
        required_tier: AccountTier,
    },
    #[serde(rename = "dailyLimitExceeded")]
    DailyLimitExceeded {
        kind: UsageKind,
        limit: u32,
        used: u32,
    },
}

impl std::fmt::Display for LimitDenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FeatureNotIncluded {
                kind: UsageKind::Test,
                required_tier,
            } => {
                write!(
                    f,
                    "Test generation requires the {} package. Upgrade to unlock it!",
                    required_tier.label()
                )
            }
            Self::FeatureNotIncluded {
                kind,
                required_tier,
            } => {
                write!(f, "{}s require the {} package", kind, required_tier.label())
            }
            Self::DailyLimitExceeded {
                kind: UsageKind::Game,
                ..
            } => {
                write!(
                    f,
                    "You have used all of today's games. Upgrade your package to play more!"
                )
            }
            Self::DailyLimitExceeded { kind, limit, used } => {
                write!(
                    f,
                    "Daily {} limit reached: {}/{} used. Upgrade your package or come back tomorrow.",
                    kind, used, limit
                )
            }
        }
    }
}

/// Remaining allowance per kind for today
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingQuota {
    pub messages: u32,
    pub tests: u32,
    pub games: u32,
}

impl RemainingQuota {
    pub fn compute(limits: &DailyLimits, usage: &DailyUsage) -> Self {
        let left = |kind| limits.get_limit(kind).saturating_sub(usage.get_usage(kind));
        Self {
            messages: left(UsageKind::Message),
            tests: left(UsageKind::Test),
            games: left(UsageKind::Game),
        }
    }

    pub fn get(&self, kind: UsageKind) -> u32 {
        match kind {
            UsageKind::Message => self.messages,
            UsageKind::Test => self.tests,
            UsageKind::Game => self.games,
        }
    }
}

/// Response with subscription and usage info
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    /// Tier stored on the profile
    pub tier: AccountTier,
    /// Tier used for admission right now (Basic once a timed grant has lapsed)
    pub effective_tier: AccountTier,
    pub state: SubscriptionState,
    pub subscription_expiry: Option<i64>,
    pub limits: DailyLimits,
    pub usage: DailyUsage,
    pub remaining: RemainingQuota,
}
