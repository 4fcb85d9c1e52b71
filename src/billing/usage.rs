//! Daily usage ledger
//!
//! Pure transformations over [`DailyUsage`]. Rollover is lazy: a record dated before
//! today is treated as zero on read and replaced by a fresh record on the next write.
//! The caller is responsible for persisting the result.

use tracing::debug;

use super::types::{DailyUsage, UsageKind};

/// Apply one increment of `kind`, rolling the record over first if it is stale.
pub fn record_usage(current: &DailyUsage, kind: UsageKind, today: &str) -> DailyUsage {
    let mut next = if current.date == today {
        current.clone()
    } else {
        debug!(stale = %current.date, today, "Rolling over daily usage");
        DailyUsage::empty(today)
    };

    let counter = next.counter_mut(kind);
    *counter = counter.saturating_add(1);
    next
}

/// Usage as it stands for `today`; a stale record reads as zero.
pub fn effective_usage(current: &DailyUsage, today: &str) -> DailyUsage {
    if current.date == today {
        current.clone()
    } else {
        DailyUsage::empty(today)
    }
}

/// Roll a rehydrated record over at load time.
///
/// Returns the record to use and whether it differs from what was stored.
pub fn rollover_on_load(stored: Option<DailyUsage>, today: &str) -> (DailyUsage, bool) {
    match stored {
        Some(usage) if usage.date == today => (usage, false),
        _ => (DailyUsage::empty(today), true),
    }
}
