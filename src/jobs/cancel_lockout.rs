use async_trait::async_trait;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use crate::{
    entities::booking::{self, BookingStatus},
    errors::ServiceError,
    jobs::{JobKind, JobReport, ScheduledJob},
    services::{
        bookings::{cancel_lockout_due, BookingService},
        ServiceContext,
    },
};

/// Closes the customer cancellation window of bookings past the lockout age.
pub struct CancelLockoutJob {
    ctx: ServiceContext,
    bookings: BookingService,
}

impl CancelLockoutJob {
    pub fn new(ctx: ServiceContext, bookings: BookingService) -> Self {
        Self { ctx, bookings }
    }
}

#[async_trait]
impl ScheduledJob for CancelLockoutJob {
    fn kind(&self) -> JobKind {
        JobKind::CancelLockout
    }

    async fn run_once(&self) -> Result<JobReport, ServiceError> {
        let now = self.ctx.clock.now();
        let lockout = self.ctx.policy.cancel_lockout();

        let candidates: Vec<booking::Model> = booking::Entity::find()
            .filter(booking::Column::CancelDisable.eq(false))
            .filter(booking::Column::Status.is_not_in(BookingStatus::TERMINAL))
            .filter(booking::Column::CreatedAt.lte(now - lockout))
            .order_by_asc(booking::Column::Id)
            .all(&*self.ctx.db)
            .await?
            .into_iter()
            .filter(|b| cancel_lockout_due(b, now, lockout))
            .collect();

        let mut report = JobReport::new(self.kind(), now, candidates.len());
        for candidate in candidates {
            let result = self.bookings.lock_cancellation(candidate.id).await;
            report.record(candidate.id, result);
        }
        Ok(report)
    }
}
