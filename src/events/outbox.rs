use crate::events::{Event, EventSender};
use crate::notifications::{notify_best_effort, Notification, Notifier};
use tracing::debug;

/// Side effects collected while a unit of work is open and released only
/// after its transaction has committed.
///
/// A failed transaction simply drops the outbox, so nothing is announced for
/// work that never happened.
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<Event>,
    notifications: Vec<Notification>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn notify(
        &mut self,
        account_id: i32,
        title: impl Into<String>,
        content: impl Into<String>,
        url: Option<String>,
    ) {
        self.notifications.push(Notification {
            account_id,
            title: title.into(),
            content: content.into(),
            url,
        });
    }

    /// Appends everything collected by `other`, keeping its order.
    pub fn extend(&mut self, other: Outbox) {
        self.events.extend(other.events);
        self.notifications.extend(other.notifications);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.notifications.is_empty()
    }

    /// Publishes the collected events and sends the notifications.
    ///
    /// Failures are logged; the committed state is never affected.
    pub async fn deliver(self, sender: Option<&EventSender>, notifier: &dyn Notifier) {
        debug!(
            events = self.events.len(),
            notifications = self.notifications.len(),
            "Delivering post-commit side effects"
        );
        if let Some(sender) = sender {
            for event in self.events {
                sender.publish(event).await;
            }
        }
        for notification in self.notifications {
            notify_best_effort(notifier, notification).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entities::BookingStatus, notifications::NoopNotifier};

    #[tokio::test]
    async fn delivers_events_in_order() {
        let (sender, mut rx) = EventSender::channel(4);
        let mut outbox = Outbox::new();
        assert!(outbox.is_empty());

        let created = Event::BookingCreated {
            booking_id: 1,
            booking_code: "BKG-0000000001".into(),
        };
        let moved = Event::BookingStatusChanged {
            booking_id: 1,
            booking_code: "BKG-0000000001".into(),
            old_status: BookingStatus::Pending,
            new_status: BookingStatus::Planning,
        };
        outbox.event(created.clone());
        outbox.event(moved.clone());
        outbox.notify(3, "Title", "Body", None);
        assert!(!outbox.is_empty());

        outbox.deliver(Some(&sender), &NoopNotifier).await;

        assert_eq!(rx.recv().await.unwrap(), created);
        assert_eq!(rx.recv().await.unwrap(), moved);
    }
}
