/*!
 * # Metrics Module
 *
 * Prometheus counters for the marketplace core:
 *
 * - booking status transitions, labelled by target status
 * - wallet mutations, labelled by transaction type
 * - scheduled job runs and per-record failures, labelled by job
 *
 * Everything is registered in a crate-local registry and rendered in the
 * Prometheus text format by [`gather`].
 */

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to export metrics: {0}")]
    ExportError(String),
}

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    static ref BOOKING_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "booking_transitions_total",
            "Total number of booking status transitions"
        ),
        &["to_status"]
    )
    .expect("metric can be created");
    static ref WALLET_MUTATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "wallet_mutations_total",
            "Total number of wallet credits and debits"
        ),
        &["transaction_type", "direction"]
    )
    .expect("metric can be created");
    static ref JOB_RUNS: IntCounterVec = IntCounterVec::new(
        Opts::new("scheduled_job_runs_total", "Total number of scheduled job runs"),
        &["job"]
    )
    .expect("metric can be created");
    static ref JOB_RECORD_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "scheduled_job_record_failures_total",
            "Total number of candidate records a scheduled job failed to process"
        ),
        &["job"]
    )
    .expect("metric can be created");
}

fn ensure_registered() {
    use std::sync::Once;
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        let _ = REGISTRY.register(Box::new(BOOKING_TRANSITIONS.clone()));
        let _ = REGISTRY.register(Box::new(WALLET_MUTATIONS.clone()));
        let _ = REGISTRY.register(Box::new(JOB_RUNS.clone()));
        let _ = REGISTRY.register(Box::new(JOB_RECORD_FAILURES.clone()));
    });
}

pub fn record_booking_transition(to_status: &str) {
    ensure_registered();
    BOOKING_TRANSITIONS.with_label_values(&[to_status]).inc();
}

pub fn record_wallet_mutation(transaction_type: &str, credit: bool) {
    ensure_registered();
    let direction = if credit { "credit" } else { "debit" };
    WALLET_MUTATIONS
        .with_label_values(&[transaction_type, direction])
        .inc();
}

pub fn record_job_run(job: &str, failed_records: usize) {
    ensure_registered();
    JOB_RUNS.with_label_values(&[job]).inc();
    if failed_records > 0 {
        JOB_RECORD_FAILURES
            .with_label_values(&[job])
            .inc_by(failed_records as u64);
    }
}

pub fn booking_transitions(to_status: &str) -> u64 {
    BOOKING_TRANSITIONS.with_label_values(&[to_status]).get()
}

/// Renders every registered metric in the Prometheus text format.
pub fn gather() -> Result<String, MetricsError> {
    ensure_registered();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| MetricsError::ExportError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MetricsError::ExportError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_text_output() {
        let before = booking_transitions("Completed");
        record_booking_transition("Completed");
        assert_eq!(booking_transitions("Completed"), before + 1);

        record_wallet_mutation("Refund", true);
        record_job_run("survey_expiry", 2);

        let text = gather().unwrap();
        assert!(text.contains("booking_transitions_total"));
        assert!(text.contains("wallet_mutations_total"));
        assert!(text.contains("scheduled_job_record_failures_total"));
    }
}
