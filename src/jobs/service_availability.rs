use async_trait::async_trait;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use tracing::info;

use crate::{
    entities::decor_service::{self, DecorServiceStatus},
    errors::ServiceError,
    jobs::{JobKind, JobReport, ScheduledJob},
    services::ServiceContext,
};

/// Publishes decor services whose start date is today.
pub struct ServiceAvailabilityJob {
    ctx: ServiceContext,
}

impl ServiceAvailabilityJob {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn make_available(&self, service_id: i32) -> Result<bool, ServiceError> {
        let result = decor_service::Entity::update_many()
            .col_expr(
                decor_service::Column::Status,
                Expr::value(DecorServiceStatus::Available),
            )
            .filter(decor_service::Column::Id.eq(service_id))
            .filter(decor_service::Column::Status.eq(DecorServiceStatus::NotAvailable))
            .exec(&*self.ctx.db)
            .await?;
        if result.rows_affected > 0 {
            info!(service_id, "Decor service is now available");
        }
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl ScheduledJob for ServiceAvailabilityJob {
    fn kind(&self) -> JobKind {
        JobKind::ServiceAvailability
    }

    async fn run_once(&self) -> Result<JobReport, ServiceError> {
        let now = self.ctx.clock.now();
        let today = now.date_naive();

        let candidates: Vec<decor_service::Model> = decor_service::Entity::find()
            .filter(decor_service::Column::Status.eq(DecorServiceStatus::NotAvailable))
            .order_by_asc(decor_service::Column::Id)
            .all(&*self.ctx.db)
            .await?
            .into_iter()
            .filter(|s| s.start_date == today)
            .collect();

        let mut report = JobReport::new(self.kind(), now, candidates.len());
        for candidate in candidates {
            let result = self.make_available(candidate.id).await;
            report.record(candidate.id, result);
        }
        Ok(report)
    }
}
