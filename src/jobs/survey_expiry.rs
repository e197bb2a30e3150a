use async_trait::async_trait;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};

use crate::{
    entities::{
        booking::{self, BookingStatus},
        time_slot,
    },
    errors::ServiceError,
    jobs::{JobKind, JobReport, ScheduledJob},
    services::{
        bookings::BookingService,
        ServiceContext,
    },
};

/// Cancels bookings still in `Planning` after their survey date.
pub struct SurveyExpiryJob {
    ctx: ServiceContext,
    bookings: BookingService,
}

impl SurveyExpiryJob {
    pub fn new(ctx: ServiceContext, bookings: BookingService) -> Self {
        Self { ctx, bookings }
    }
}

#[async_trait]
impl ScheduledJob for SurveyExpiryJob {
    fn kind(&self) -> JobKind {
        JobKind::SurveyExpiry
    }

    async fn run_once(&self) -> Result<JobReport, ServiceError> {
        let now = self.ctx.clock.now();
        let conn = &*self.ctx.db;

        let candidates: Vec<booking::Model> = booking::Entity::find()
            .inner_join(time_slot::Entity)
            .filter(booking::Column::Status.eq(BookingStatus::Planning))
            .filter(time_slot::Column::SurveyDate.lt(now))
            .distinct()
            .order_by_asc(booking::Column::Id)
            .all(conn)
            .await?;

        let mut report = JobReport::new(self.kind(), now, candidates.len());
        for candidate in candidates {
            let result = self
                .bookings
                .force_expire_survey(&candidate.booking_code)
                .await
                .map(|_| true)
                .or_else(|e| match e {
                    // moved out of Planning since the candidate query
                    ServiceError::InvalidState(_) => Ok(false),
                    other => Err(other),
                });
            report.record(candidate.id, result);
        }
        Ok(report)
    }
}
