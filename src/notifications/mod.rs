use crate::events::{Event, EventSender};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{instrument, warn};

/// A message addressed to one account.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Notification {
    pub account_id: i32,
    pub title: String,
    pub content: String,
    pub url: Option<String>,
}

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Outbound notification port.
///
/// Services call this only after their transaction has committed; a failed
/// delivery is logged and never undoes the state change.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(
        &self,
        account_id: i32,
        title: &str,
        content: &str,
        url: Option<&str>,
    ) -> Result<(), NotificationError>;
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Forwards notifications onto the in-process event channel.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    events: EventSender,
}

impl EventNotifier {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Notifier for EventNotifier {
    #[instrument(skip(self, content))]
    async fn send_notification(
        &self,
        account_id: i32,
        title: &str,
        content: &str,
        url: Option<&str>,
    ) -> Result<(), NotificationError> {
        self.events
            .send(Event::NotificationRequested {
                account_id,
                title: title.to_string(),
                content: content.to_string(),
                url: url.map(str::to_string),
            })
            .await
            .map_err(NotificationError::ChannelClosed)
    }
}

/// Discards everything. Useful for one-off runs with no delivery channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_notification(
        &self,
        _account_id: i32,
        _title: &str,
        _content: &str,
        _url: Option<&str>,
    ) -> Result<(), NotificationError> {
        Ok(())
    }
}

/// Sends a notification and logs a failure instead of returning it.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier
        .send_notification(
            notification.account_id,
            &notification.title,
            &notification.content,
            notification.url.as_deref(),
        )
        .await
    {
        warn!(
            account_id = notification.account_id,
            title = %notification.title,
            "Notification delivery failed: {}",
            e
        );
    }
}
