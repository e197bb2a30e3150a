use std::sync::Arc;

use crate::{
    clock::SharedClock,
    config::BookingPolicy,
    db::DbPool,
    events::EventSender,
    notifications::SharedNotifier,
    services::{
        bookings::BookingService, contracts::ContractService, quotations::QuotationService,
        wallet::WalletService, ServiceContext,
    },
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    ctx: ServiceContext,
}

impl ServiceFactory {
    /// Creates a new service factory with the given dependencies
    pub fn new(
        db_pool: Arc<DbPool>,
        clock: SharedClock,
        notifier: SharedNotifier,
        event_sender: Option<EventSender>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            ctx: ServiceContext {
                db: db_pool,
                clock,
                notifier,
                event_sender: event_sender.map(Arc::new),
                policy: Arc::new(policy),
            },
        }
    }

    pub fn wallet_service(&self) -> WalletService {
        WalletService::new(
            self.ctx.db.clone(),
            self.ctx.clock.clone(),
            self.ctx.event_sender.clone(),
        )
    }

    pub fn booking_service(&self) -> BookingService {
        BookingService::new(self.ctx.clone(), self.wallet_service())
    }

    pub fn quotation_service(&self) -> QuotationService {
        QuotationService::new(self.ctx.clone())
    }

    pub fn contract_service(&self) -> ContractService {
        ContractService::new(self.ctx.clone(), self.wallet_service())
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.ctx.db
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }
}
