use crate::domain::notification::{Notification, NotificationLevel, Notifier};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

const MAX_NOTIFICATIONS: usize = 50;

/// Dismissible notices shown to the operator.
#[derive(Default)]
pub struct NotificationCenter {
    items: Mutex<Vec<Notification>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, notification: Notification) -> String {
        match notification.level {
            NotificationLevel::Error => warn!(message = %notification.message, "Operator notice"),
            _ => info!(level = %notification.level, message = %notification.message, "Operator notice"),
        }
        let id = notification.id.clone();
        let mut items = self.lock();
        items.push(notification);
        if items.len() > MAX_NOTIFICATIONS {
            items.remove(0);
        }
        id
    }

    pub fn dismiss(&self, id: &str) -> bool {
        let mut items = self.lock();
        let before = items.len();
        items.retain(|n| n.id != id);
        items.len() != before
    }

    pub fn list(&self) -> Vec<Notification> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Notifier for NotificationCenter {
    fn notify(&self, notification: Notification) {
        self.push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_dismiss() {
        let center = NotificationCenter::new();
        let id = center.push(Notification::error("Connection error: timeout"));
        center.notify(Notification::info("hello"));
        assert_eq!(center.list().len(), 2);
        assert!(center.dismiss(&id));
        assert!(!center.dismiss(&id));
        assert_eq!(center.list()[0].message, "hello");
    }
}
