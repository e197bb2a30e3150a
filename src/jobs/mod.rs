//! Periodic sweeps that push bookings, contracts, services and meetings
//! forward once their deadlines pass.
//!
//! Every job follows the same shape: query candidates, re-check the
//! deadline predicate, process each candidate in a transaction of its own
//! and collect per-record failures into a [`JobReport`]. A failing record
//! never stops the rest of the batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::JobSettings,
    errors::{ErrorCode, ServiceError},
    metrics,
    services::ServiceFactory,
};

pub mod cancel_lockout;
pub mod contract_expiry;
pub mod meeting_status;
pub mod service_availability;
pub mod survey_expiry;

pub use cancel_lockout::CancelLockoutJob;
pub use contract_expiry::{ContractAutoCancelJob, ContractTerminabilityJob};
pub use meeting_status::MeetingStatusJob;
pub use service_availability::ServiceAvailabilityJob;
pub use survey_expiry::SurveyExpiryJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    ContractAutoCancel,
    ContractTerminability,
    SurveyExpiry,
    CancelLockout,
    ServiceAvailability,
    MeetingStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub record_id: i32,
    pub code: ErrorCode,
    pub message: String,
}

/// Outcome of one run of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub run_id: Uuid,
    pub kind: JobKind,
    pub started_at: DateTime<Utc>,
    pub candidates: usize,
    pub processed: usize,
    /// Candidates that no longer matched when re-checked inside their transaction
    pub skipped: usize,
    pub failures: Vec<RecordFailure>,
}

impl JobReport {
    pub fn new(kind: JobKind, started_at: DateTime<Utc>, candidates: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            started_at,
            candidates,
            processed: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    /// Tallies the result of processing one candidate.
    pub fn record(&mut self, record_id: i32, result: Result<bool, ServiceError>) {
        match result {
            Ok(true) => self.processed += 1,
            Ok(false) => self.skipped += 1,
            Err(e) => {
                warn!(
                    job = %self.kind,
                    run_id = %self.run_id,
                    record_id,
                    error = %e,
                    "Failed to process record"
                );
                self.failures.push(RecordFailure {
                    record_id,
                    code: e.code(),
                    message: e.to_string(),
                });
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Runs one sweep. Only a failure to load candidates is returned as an
    /// error; per-record failures land in the report.
    async fn run_once(&self) -> Result<JobReport, ServiceError>;
}

/// Tracks which jobs are running so a job never overlaps with itself.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    running: Arc<DashSet<JobKind>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `kind` as running; `None` when a run is already in progress.
    pub fn try_acquire(&self, kind: JobKind) -> Option<JobGuard> {
        if self.running.insert(kind) {
            Some(JobGuard {
                running: self.running.clone(),
                kind,
            })
        } else {
            None
        }
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.running.contains(&kind)
    }
}

/// Releases the job's slot in the registry when dropped.
#[derive(Debug)]
pub struct JobGuard {
    running: Arc<DashSet<JobKind>>,
    kind: JobKind,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.running.remove(&self.kind);
    }
}

/// Runs `job` unless it is already running. Errors are logged, never raised.
pub async fn run_guarded(registry: &JobRegistry, job: &dyn ScheduledJob) -> Option<JobReport> {
    let kind = job.kind();
    let Some(_guard) = registry.try_acquire(kind) else {
        debug!(job = %kind, "Previous run still in progress; skipping");
        return None;
    };

    match job.run_once().await {
        Ok(report) => {
            metrics::record_job_run(&kind.to_string(), report.failures.len());
            if report.candidates == 0 {
                debug!(job = %kind, "No candidates");
            } else {
                info!(
                    job = %kind,
                    run_id = %report.run_id,
                    candidates = report.candidates,
                    processed = report.processed,
                    skipped = report.skipped,
                    failed = report.failures.len(),
                    "Job run finished"
                );
            }
            Some(report)
        }
        Err(e) => {
            metrics::record_job_run(&kind.to_string(), 0);
            error!(job = %kind, error = %e, "Job run failed");
            None
        }
    }
}

struct ScheduledEntry {
    job: Arc<dyn ScheduledJob>,
    interval: Duration,
}

/// Runs each registered job on its own fixed interval after a warm-up delay.
pub struct JobScheduler {
    registry: JobRegistry,
    warmup: Duration,
    entries: Vec<ScheduledEntry>,
}

impl JobScheduler {
    pub fn new(registry: JobRegistry, warmup: Duration) -> Self {
        Self {
            registry,
            warmup,
            entries: Vec::new(),
        }
    }

    /// A scheduler carrying every marketplace sweep.
    pub fn with_standard_jobs(
        factory: &ServiceFactory,
        settings: &JobSettings,
        registry: JobRegistry,
    ) -> Self {
        let ctx = factory.context().clone();
        let contracts = factory.contract_service();
        let bookings = factory.booking_service();

        let contract_every = Duration::from_secs(settings.contract_interval_secs);
        let booking_every = Duration::from_secs(settings.booking_interval_secs);

        let mut scheduler = Self::new(registry, Duration::from_secs(settings.warmup_secs));
        scheduler
            .register(
                Arc::new(ContractAutoCancelJob::new(ctx.clone(), contracts.clone())),
                contract_every,
            )
            .register(
                Arc::new(ContractTerminabilityJob::new(ctx.clone(), contracts)),
                contract_every,
            )
            .register(
                Arc::new(SurveyExpiryJob::new(ctx.clone(), bookings.clone())),
                booking_every,
            )
            .register(
                Arc::new(CancelLockoutJob::new(ctx.clone(), bookings)),
                booking_every,
            )
            .register(
                Arc::new(ServiceAvailabilityJob::new(ctx.clone())),
                Duration::from_secs(settings.service_interval_secs),
            )
            .register(
                Arc::new(MeetingStatusJob::new(ctx)),
                Duration::from_secs(settings.meeting_interval_secs),
            );
        scheduler
    }

    pub fn register(&mut self, job: Arc<dyn ScheduledJob>, interval: Duration) -> &mut Self {
        self.entries.push(ScheduledEntry { job, interval });
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Runs every job once, in registration order.
    pub async fn run_all_once(&self) -> Vec<JobReport> {
        let mut reports = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if let Some(report) = run_guarded(&self.registry, entry.job.as_ref()).await {
                reports.push(report);
            }
        }
        reports
    }

    /// Spawns one background task per job.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let Self {
            registry,
            warmup,
            entries,
        } = self;
        entries
            .into_iter()
            .map(|entry| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let kind = entry.job.kind();
                    info!(job = %kind, interval_secs = entry.interval.as_secs(), "Scheduling job");
                    sleep(warmup).await;
                    loop {
                        run_guarded(&registry, entry.job.as_ref()).await;
                        sleep(entry.interval).await;
                    }
                })
            })
            .collect()
    }
}
