use async_trait::async_trait;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use crate::{
    entities::contract::{self, ContractStatus},
    errors::ServiceError,
    jobs::{JobKind, JobReport, ScheduledJob},
    services::{
        contracts::{signing_window_elapsed, terminability_elapsed, ContractService},
        ServiceContext,
    },
};

/// Rejects contracts left unsigned past the signing window and forfeits
/// their held commit deposits.
pub struct ContractAutoCancelJob {
    ctx: ServiceContext,
    contracts: ContractService,
}

impl ContractAutoCancelJob {
    pub fn new(ctx: ServiceContext, contracts: ContractService) -> Self {
        Self { ctx, contracts }
    }
}

#[async_trait]
impl ScheduledJob for ContractAutoCancelJob {
    fn kind(&self) -> JobKind {
        JobKind::ContractAutoCancel
    }

    async fn run_once(&self) -> Result<JobReport, ServiceError> {
        let now = self.ctx.clock.now();
        let window = self.ctx.policy.contract_signing_window();

        let candidates: Vec<contract::Model> = contract::Entity::find()
            .filter(
                contract::Column::Status
                    .is_in([ContractStatus::Pending, ContractStatus::PendingCancel]),
            )
            .filter(contract::Column::IsSigned.eq(false))
            .filter(contract::Column::CreatedAt.lte(now - window))
            .order_by_asc(contract::Column::Id)
            .all(&*self.ctx.db)
            .await?
            .into_iter()
            .filter(|c| signing_window_elapsed(c, now, window))
            .collect();

        let mut report = JobReport::new(self.kind(), now, candidates.len());
        for candidate in candidates {
            let result = self
                .contracts
                .auto_cancel_expired(candidate.id)
                .await
                .map(|outcome| outcome.is_some());
            report.record(candidate.id, result);
        }
        Ok(report)
    }
}

/// Closes the termination window of contracts signed too long ago.
pub struct ContractTerminabilityJob {
    ctx: ServiceContext,
    contracts: ContractService,
}

impl ContractTerminabilityJob {
    pub fn new(ctx: ServiceContext, contracts: ContractService) -> Self {
        Self { ctx, contracts }
    }
}

#[async_trait]
impl ScheduledJob for ContractTerminabilityJob {
    fn kind(&self) -> JobKind {
        JobKind::ContractTerminability
    }

    async fn run_once(&self) -> Result<JobReport, ServiceError> {
        let now = self.ctx.clock.now();
        let window = self.ctx.policy.terminability_window();

        let candidates: Vec<contract::Model> = contract::Entity::find()
            .filter(contract::Column::Status.eq(ContractStatus::Signed))
            .filter(contract::Column::IsTerminatable.eq(true))
            .filter(contract::Column::SignedDate.lt(now - window))
            .order_by_asc(contract::Column::Id)
            .all(&*self.ctx.db)
            .await?
            .into_iter()
            .filter(|c| terminability_elapsed(c, now, window))
            .collect();

        let mut report = JobReport::new(self.kind(), now, candidates.len());
        for candidate in candidates {
            let result = self.contracts.expire_terminability(candidate.id).await;
            report.record(candidate.id, result);
        }
        Ok(report)
    }
}
