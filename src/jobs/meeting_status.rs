use async_trait::async_trait;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use tracing::debug;

use crate::{
    entities::meeting::{self, MeetingStatus},
    errors::ServiceError,
    jobs::{JobKind, JobReport, ScheduledJob},
    services::ServiceContext,
};

/// Starts meetings whose start time has arrived and ends those past their
/// duration. Meetings are started before ends are checked, so an overdue
/// meeting goes from `Scheduled` to `Ended` in a single run.
pub struct MeetingStatusJob {
    ctx: ServiceContext,
}

impl MeetingStatusJob {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn advance(
        &self,
        meeting_id: i32,
        from: MeetingStatus,
        to: MeetingStatus,
    ) -> Result<bool, ServiceError> {
        let result = meeting::Entity::update_many()
            .col_expr(meeting::Column::Status, Expr::value(to))
            .filter(meeting::Column::Id.eq(meeting_id))
            .filter(meeting::Column::Status.eq(from))
            .exec(&*self.ctx.db)
            .await?;
        debug!(meeting_id, %from, %to, updated = result.rows_affected, "Meeting status sweep");
        Ok(result.rows_affected > 0)
    }

    async fn find(&self, status: MeetingStatus) -> Result<Vec<meeting::Model>, ServiceError> {
        Ok(meeting::Entity::find()
            .filter(meeting::Column::Status.eq(status))
            .order_by_asc(meeting::Column::Id)
            .all(&*self.ctx.db)
            .await?)
    }
}

#[async_trait]
impl ScheduledJob for MeetingStatusJob {
    fn kind(&self) -> JobKind {
        JobKind::MeetingStatus
    }

    async fn run_once(&self) -> Result<JobReport, ServiceError> {
        let now = self.ctx.clock.now();

        let to_start: Vec<meeting::Model> = self
            .find(MeetingStatus::Scheduled)
            .await?
            .into_iter()
            .filter(|m| m.start_time <= now)
            .collect();

        let mut report = JobReport::new(self.kind(), now, to_start.len());
        for candidate in &to_start {
            let result = self
                .advance(candidate.id, MeetingStatus::Scheduled, MeetingStatus::Started)
                .await;
            report.record(candidate.id, result);
        }

        let to_end: Vec<meeting::Model> = self
            .find(MeetingStatus::Started)
            .await?
            .into_iter()
            .filter(|m| m.end_time() <= now)
            .collect();

        report.candidates += to_end.len();
        for candidate in &to_end {
            let result = self
                .advance(candidate.id, MeetingStatus::Started, MeetingStatus::Ended)
                .await;
            report.record(candidate.id, result);
        }
        Ok(report)
    }
}
