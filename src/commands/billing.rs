//! Commands for entitlement checks, metering and subscription management

use serde::Serialize;

use crate::billing::{
    BillingState, DailyUsage, LimitCheckResult, RedemptionOutcome, SubscriptionInfo,
    SubscriptionPackage, SubscriptionState, UsageKind, SUBSCRIPTION_PACKAGES,
};

/// Reply to a cancellation request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub cancelled: bool,
    pub previous: Option<SubscriptionState>,
    pub message: String,
}

/// Reply to a redemption
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub message: String,
    pub outcome: RedemptionOutcome,
}

fn parse_kind(kind: &str) -> Result<UsageKind, String> {
    kind.parse()
}

/// Get today's usage (zeroed if the stored ledger is from an earlier day)
pub fn get_daily_usage(billing: &BillingState) -> Result<DailyUsage, String> {
    Ok(billing.subscription_manager.subscription_info().usage)
}

/// Check if an action would be allowed
pub fn check_request_limit(billing: &BillingState, kind: &str) -> Result<bool, String> {
    let kind = parse_kind(kind)?;
    Ok(billing.subscription_manager.check_limit(kind))
}

/// Detailed admission decision, including the denial prompt
pub fn evaluate_request(billing: &BillingState, kind: &str) -> Result<LimitCheckResult, String> {
    let kind = parse_kind(kind)?;
    Ok(billing.subscription_manager.evaluate(kind))
}

/// Record usage after the gated action ran
pub fn record_usage(billing: &BillingState, kind: &str) -> Result<DailyUsage, String> {
    let kind = parse_kind(kind)?;
    Ok(billing.subscription_manager.record_usage(kind))
}

/// Check and record in one step
pub fn admit_action(billing: &BillingState, kind: &str) -> Result<LimitCheckResult, String> {
    let kind = parse_kind(kind)?;
    Ok(billing.subscription_manager.admit(kind))
}

/// Redeem an activation code
pub fn redeem_activation_code(
    billing: &BillingState,
    code: &str,
) -> Result<RedeemResponse, String> {
    let outcome = billing
        .subscription_manager
        .redeem(code)
        .map_err(|e| e.to_string())?;

    Ok(RedeemResponse {
        message: outcome.message(),
        outcome,
    })
}

/// Cancel the current package.
///
/// Nothing happens until the caller has confirmed; an unconfirmed request only
/// describes what would be lost.
pub fn cancel_subscription(
    billing: &BillingState,
    confirmed: bool,
) -> Result<CancelResponse, String> {
    if !confirmed {
        let state = billing.subscription_manager.state();
        return Ok(CancelResponse {
            cancelled: false,
            previous: None,
            message: format!(
                "Cancelling ends the {} package immediately. Confirm to continue.",
                state.tier().label()
            ),
        });
    }

    let previous = billing.subscription_manager.cancel();
    Ok(CancelResponse {
        cancelled: true,
        previous: Some(previous),
        message: "Switched back to the BASIC package.".to_string(),
    })
}

/// Get full subscription info with limits and usage
pub fn get_subscription_info(billing: &BillingState) -> Result<SubscriptionInfo, String> {
    Ok(billing.subscription_manager.subscription_info())
}

/// Sellable packages for the pricing page
pub fn list_packages() -> &'static [SubscriptionPackage] {
    SUBSCRIPTION_PACKAGES
}

/// Wipe all persisted state; the caller must rebuild its `BillingState`
pub fn reset_app(billing: &BillingState) -> Result<(), String> {
    billing.reset()
}
