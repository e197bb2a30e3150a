use crate::entities::{BookingStatus, TransactionType};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub mod outbox;

pub use outbox::Outbox;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of a bounded channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    ///
    /// Used after a transaction has committed, where the outcome must not change.
    pub async fn publish(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping domain event: {}", e);
        }
    }
}

// Domain events emitted after the owning transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Booking events
    BookingCreated {
        booking_id: i32,
        booking_code: String,
    },
    BookingStatusChanged {
        booking_id: i32,
        booking_code: String,
        old_status: BookingStatus,
        new_status: BookingStatus,
    },

    // Quotation events
    QuotationCreated {
        quotation_id: i32,
        booking_id: i32,
        total_cost: Decimal,
    },
    QuotationCanceled {
        quotation_id: i32,
        booking_id: i32,
    },

    // Contract events
    ContractCreated {
        contract_id: i32,
        contract_code: String,
    },
    ContractSigned {
        contract_id: i32,
        booking_id: i32,
    },
    ContractRejected {
        contract_id: i32,
        booking_id: i32,
    },
    ContractCanceled {
        contract_id: i32,
        booking_id: i32,
    },
    ContractTerminated {
        contract_id: i32,
        booking_id: i32,
        refunded: Decimal,
    },

    // Wallet events
    WalletMutated {
        account_id: i32,
        amount: Decimal,
        transaction_type: TransactionType,
        booking_id: Option<i32>,
    },

    // Outbound message for an account
    NotificationRequested {
        account_id: i32,
        title: String,
        content: String,
        url: Option<String>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::BookingCreated { .. } => "booking_created",
            Event::BookingStatusChanged { .. } => "booking_status_changed",
            Event::QuotationCreated { .. } => "quotation_created",
            Event::QuotationCanceled { .. } => "quotation_canceled",
            Event::ContractCreated { .. } => "contract_created",
            Event::ContractSigned { .. } => "contract_signed",
            Event::ContractRejected { .. } => "contract_rejected",
            Event::ContractCanceled { .. } => "contract_canceled",
            Event::ContractTerminated { .. } => "contract_terminated",
            Event::WalletMutated { .. } => "wallet_mutated",
            Event::NotificationRequested { .. } => "notification_requested",
        }
    }
}

// Define a trait for handling events. Handlers implementing this trait will process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Handler that writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::BookingStatusChanged {
                booking_code,
                old_status,
                new_status,
                ..
            } => {
                info!(
                    booking_code = %booking_code,
                    from = %old_status,
                    to = %new_status,
                    "Booking status changed"
                );
            }
            Event::WalletMutated {
                account_id,
                amount,
                transaction_type,
                ..
            } => {
                debug!(account_id, %amount, %transaction_type, "Wallet mutated");
            }
            Event::NotificationRequested {
                account_id, title, ..
            } => {
                info!(account_id, title = %title, "Notification requested");
            }
            other => {
                debug!(event = other.name(), "Domain event");
            }
        }
        Ok(())
    }
}

// Function to process incoming events and distribute them to registered event handlers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!("Failed to handle {} event: {}", event.name(), e);
            }
        }
    }

    info!("Event channel closed; event processing loop stopped");
}
