//! Commands for the notification inbox

use serde::Serialize;

use crate::billing::BillingState;
use crate::notifications::Notification;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxResponse {
    pub unread: usize,
    pub notifications: Vec<Notification>,
}

pub fn list_notifications(billing: &BillingState) -> Result<InboxResponse, String> {
    Ok(InboxResponse {
        unread: billing.notifications.unread_count(),
        notifications: billing.notifications.list(),
    })
}

pub fn mark_notification_read(billing: &BillingState, id: &str) -> Result<(), String> {
    if billing.notifications.mark_read(id) {
        Ok(())
    } else {
        Err(format!("Notification not found: {}", id))
    }
}

pub fn mark_all_notifications_read(billing: &BillingState) -> Result<(), String> {
    billing.notifications.mark_all_read();
    Ok(())
}

pub fn delete_notification(billing: &BillingState, id: &str) -> Result<(), String> {
    if billing.notifications.delete(id) {
        Ok(())
    } else {
        Err(format!("Notification not found: {}", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{SystemClock, DEFAULT_WATCHDOG_INTERVAL};
    use crate::notifications::LogExpiryPrompt;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_inbox_commands() {
        let billing = BillingState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            Arc::new(LogExpiryPrompt),
            "tutor://upgrade",
            DEFAULT_WATCHDOG_INTERVAL,
        );
        billing.subscription_manager.redeem("DEMO").unwrap();
        billing.subscription_manager.cancel();

        let inbox = list_notifications(&billing).unwrap();
        assert_eq!(inbox.unread, 2);
        assert_eq!(inbox.notifications[0].title, "Subscription cancelled");

        let id = inbox.notifications[0].id.clone();
        mark_notification_read(&billing, &id).unwrap();
        assert_eq!(list_notifications(&billing).unwrap().unread, 1);

        mark_all_notifications_read(&billing).unwrap();
        assert_eq!(list_notifications(&billing).unwrap().unread, 0);

        delete_notification(&billing, &id).unwrap();
        assert!(delete_notification(&billing, &id).is_err());
        assert!(mark_notification_read(&billing, "missing").is_err());
        assert_eq!(list_notifications(&billing).unwrap().notifications.len(), 1);
    }
}
