//! Single-slot, auto-expiring user feedback.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub message: String,
    pub severity: Severity,
    pub shown_at: Instant,
}

#[derive(Default)]
struct Slot {
    current: Option<Notification>,
    next_id: u64,
}

/// Holds at most one notification. A push replaces whatever is showing; a
/// notification older than the ttl reads as dismissed.
pub struct NotificationQueue {
    ttl: Duration,
    slot: Mutex<Slot>,
}

impl NotificationQueue {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn push(&self, message: impl Into<String>, severity: Severity) -> Notification {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.next_id += 1;
        let n = Notification {
            id: slot.next_id,
            message: message.into(),
            severity,
            shown_at: Instant::now(),
        };
        tracing::debug!(id = n.id, ?severity, message = %n.message, "notification");
        slot.current = Some(n.clone());
        n
    }

    pub fn current_notification(&self) -> Option<Notification> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot
            .current
            .as_ref()
            .is_some_and(|n| n.shown_at.elapsed() >= self.ttl)
        {
            slot.current = None;
        }
        slot.current.clone()
    }

    pub fn dismiss(&self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current = None;
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn push_replaces_and_expires() {
        let q = NotificationQueue::new(Duration::from_secs(6));
        q.push("first", Severity::Info);
        let second = q.push("second", Severity::Error);
        assert_eq!(q.current_notification(), Some(second));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(q.current_notification().is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(q.current_notification().is_none());
    }

    #[test]
    fn dismiss_clears_slot() {
        let q = NotificationQueue::new(Duration::from_secs(60));
        q.push("hello", Severity::Success);
        q.dismiss();
        assert!(q.current_notification().is_none());
        q.dismiss();
    }
}
