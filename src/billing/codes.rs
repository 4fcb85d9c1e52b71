//! Activation code registry and redemption
//!
//! Codes are validated against a static table bundled with the app; no remote
//! service is involved. Redemption is a pure function from (profile, code, now) to
//! the next profile.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::types::{AccountTier, UserProfile};

/// Durations at or above this many months are lifetime grants
pub const LIFETIME_MONTHS: f64 = 900.0;

/// Length of one billed month
pub const MONTH_MILLIS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Codes that always switch the account back to Basic
const RESERVED_RESET_CODES: &[&str] = &["BASIC", "RESET"];

/// Catalog entry for an activation code
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CodeGrant {
    pub tier: AccountTier,
    /// Decimal months; `>= 900` means lifetime
    pub months: f64,
}

impl CodeGrant {
    pub fn is_lifetime(&self) -> bool {
        self.months >= LIFETIME_MONTHS
    }

    pub fn duration_millis(&self) -> i64 {
        (self.months * MONTH_MILLIS as f64).round() as i64
    }

    pub fn duration_class(&self) -> DurationClass {
        if self.is_lifetime() {
            DurationClass::Lifetime
        } else {
            DurationClass::Months(self.months)
        }
    }
}

/// How long a grant lasts, for confirmation text
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "months")]
pub enum DurationClass {
    Months(f64),
    Lifetime,
}

impl std::fmt::Display for DurationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Months(months) if *months == 1.0 => write!(f, "1 month"),
            Self::Months(months) => write!(f, "{} months", months),
            Self::Lifetime => write!(f, "lifetime"),
        }
    }
}

static ACTIVATION_CODES: Lazy<HashMap<String, CodeGrant>> = Lazy::new(|| {
    serde_json::from_str(include_str!("activation_codes.json")).unwrap_or_else(|e| {
        error!("Bundled activation code table is unreadable: {}", e);
        HashMap::new()
    })
});

/// Look up a normalized code in the bundled catalog
pub fn lookup(code: &str) -> Option<CodeGrant> {
    ACTIVATION_CODES.get(code).copied()
}

/// Number of codes in the bundled catalog
pub fn catalog_size() -> usize {
    ACTIVATION_CODES.len()
}

/// Trim and uppercase user input
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedemptionError {
    #[error("Please enter an activation code.")]
    EmptyCode,
    #[error("Code {0} is invalid or expired. Please contact support.")]
    InvalidCode(String),
    #[error("You have already used code {0}.")]
    AlreadyRedeemed(String),
}

/// What a successful redemption did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum RedemptionOutcome {
    /// A reserved code switched the account back to Basic
    #[serde(rename = "reset")]
    Reset,
    #[serde(rename = "granted")]
    Granted {
        code: String,
        tier: AccountTier,
        duration: DurationClass,
        subscription_expiry: Option<i64>,
    },
}

impl RedemptionOutcome {
    /// Human-readable confirmation
    pub fn message(&self) -> String {
        match self {
            Self::Reset => "Switched back to the BASIC package.".to_string(),
            Self::Granted { tier, duration, .. } => {
                format!("Activated {} package ({}).", tier.label(), duration)
            }
        }
    }
}

/// Redeem `code` against `profile` at `now_ms`.
///
/// Returns the updated profile and what happened; `profile` itself is never touched,
/// so every failure path leaves state unchanged.
pub fn redeem(
    profile: &UserProfile,
    code: &str,
    now_ms: i64,
) -> Result<(UserProfile, RedemptionOutcome), RedemptionError> {
    let code = normalize_code(code);
    if code.is_empty() {
        return Err(RedemptionError::EmptyCode);
    }

    if RESERVED_RESET_CODES.contains(&code.as_str()) {
        let mut next = profile.clone();
        next.account_tier = AccountTier::Basic;
        next.subscription_expiry = None;
        return Ok((next, RedemptionOutcome::Reset));
    }

    // Replay check comes before the catalog so a used code stays rejected
    if profile.used_codes.contains(&code) {
        return Err(RedemptionError::AlreadyRedeemed(code));
    }

    let grant = lookup(&code).ok_or_else(|| RedemptionError::InvalidCode(code.clone()))?;

    let new_expiry = if grant.is_lifetime() {
        None
    } else {
        // Extend from whichever is later: remaining entitlement or now
        let base = now_ms.max(profile.subscription_expiry.unwrap_or(now_ms));
        Some(base.saturating_add(grant.duration_millis()))
    };

    let mut next = profile.clone();
    next.account_tier = grant.tier;
    next.subscription_expiry = new_expiry;
    next.used_codes.insert(code.clone());

    Ok((
        next,
        RedemptionOutcome::Granted {
            code,
            tier: grant.tier,
            duration: grant.duration_class(),
            subscription_expiry: new_expiry,
        },
    ))
}

/// A sellable package shown on the pricing page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPackage {
    pub id: &'static str,
    pub name: &'static str,
    pub duration_months: u32,
    pub tier: AccountTier,
    pub price_vnd: u64,
    pub is_lifetime: bool,
    pub is_popular: bool,
}

pub const SUBSCRIPTION_PACKAGES: &[SubscriptionPackage] = &[
    SubscriptionPackage {
        id: "pack_basic",
        name: "Basic",
        duration_months: 0,
        tier: AccountTier::Basic,
        price_vnd: 0,
        is_lifetime: false,
        is_popular: false,
    },
    SubscriptionPackage {
        id: "pack_1_month",
        name: "1 Month",
        duration_months: 1,
        tier: AccountTier::Pro,
        price_vnd: 49_000,
        is_lifetime: false,
        is_popular: false,
    },
    SubscriptionPackage {
        id: "pack_5_months",
        name: "5 Months",
        duration_months: 5,
        tier: AccountTier::Pro,
        price_vnd: 199_000,
        is_lifetime: false,
        is_popular: true,
    },
    SubscriptionPackage {
        id: "pack_1_year",
        name: "1 Year",
        duration_months: 12,
        tier: AccountTier::Vip,
        price_vnd: 499_000,
        is_lifetime: false,
        is_popular: false,
    },
    SubscriptionPackage {
        id: "pack_lifetime",
        name: "Lifetime",
        duration_months: 999,
        tier: AccountTier::Vip,
        price_vnd: 999_000,
        is_lifetime: true,
        is_popular: false,
    },
];
