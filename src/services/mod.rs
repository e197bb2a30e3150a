use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    clock::SharedClock,
    config::BookingPolicy,
    events::{EventSender, Outbox},
    notifications::SharedNotifier,
};

// Money
pub mod settlement;
pub mod wallet;

// Booking lifecycle
pub mod booking_status;
pub mod bookings;
pub mod contracts;
pub mod quotations;

// Shared helpers
pub mod codes;
mod support;

// Service factory for dependency injection
pub mod factory;

pub use factory::ServiceFactory;

/// Dependencies every lifecycle service shares.
#[derive(Clone)]
pub struct ServiceContext {
    pub db: Arc<DatabaseConnection>,
    pub clock: SharedClock,
    pub notifier: SharedNotifier,
    pub event_sender: Option<Arc<EventSender>>,
    pub policy: Arc<BookingPolicy>,
}

impl ServiceContext {
    /// Releases side effects of a committed unit of work.
    pub(crate) async fn deliver(&self, outbox: Outbox) {
        outbox
            .deliver(self.event_sender.as_deref(), self.notifier.as_ref())
            .await;
    }
}
