use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::AttemptResult;

/// Final counters for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// Addresses that were dispatched and reached a terminal result.
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Addresses that needed more than one attempt, whatever the outcome.
    pub retried: u64,
    /// Extra attempts spent across the run.
    pub retry_attempts: u64,
    pub skipped: u64,
    pub cancelled: u64,
    /// Successful records the sink could not write.
    pub persist_errors: u64,
    /// Percentage of `total` that succeeded.
    pub success_rate: f64,
    pub failures_by_kind: BTreeMap<String, u64>,
    /// Warning count per record field across all successes.
    pub field_warnings: BTreeMap<String, u64>,
}

/// Running tally of a batch, safe to share between tasks.
///
/// Counts are commutative, so the summary does not depend on the order
/// outcomes are observed in.
#[derive(Debug)]
pub struct Aggregator {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    retry_attempts: AtomicU64,
    skipped: AtomicU64,
    cancelled: AtomicU64,
    persist_errors: AtomicU64,
    failures_by_kind: Mutex<BTreeMap<String, u64>>,
    field_warnings: Mutex<BTreeMap<String, u64>>,
}

impl Aggregator {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            total: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            retry_attempts: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            persist_errors: AtomicU64::new(0),
            failures_by_kind: Mutex::new(BTreeMap::new()),
            field_warnings: Mutex::new(BTreeMap::new()),
        }
    }

    /// Fold one terminal result into the tally.
    pub fn observe(&self, address: &str, result: &AttemptResult) {
        self.total.fetch_add(1, Ordering::Relaxed);

        let attempts = u64::from(result.attempts());
        if attempts > 1 {
            self.retried.fetch_add(1, Ordering::Relaxed);
            self.retry_attempts
                .fetch_add(attempts - 1, Ordering::Relaxed);
        }

        match result {
            AttemptResult::Success { warnings, .. } => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                if !warnings.is_empty() {
                    let mut tally = self
                        .field_warnings
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    for warning in warnings {
                        *tally.entry(warning.field.clone()).or_insert(0) += 1;
                    }
                }
            }
            AttemptResult::Failure { error, .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let mut by_kind = self
                    .failures_by_kind
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                *by_kind.entry(error.kind.as_str().to_string()).or_insert(0) += 1;
                tracing::trace!(%address, kind = %error.kind, "Failure tallied");
            }
        }
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self, count: u64) {
        self.cancelled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_persist_error(&self) {
        self.persist_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Snapshot the tally into a summary stamped with the current time.
    pub fn finalize(&self) -> BatchSummary {
        self.finalize_at(Utc::now())
    }

    pub fn finalize_at(&self, finished_at: DateTime<Utc>) -> BatchSummary {
        let total = self.total.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let success_rate = if total > 0 {
            succeeded as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let duration_secs = (finished_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        BatchSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at,
            duration_secs,
            total,
            succeeded,
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            persist_errors: self.persist_errors.load(Ordering::Relaxed),
            success_rate,
            failures_by_kind: self
                .failures_by_kind
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            field_warnings: self
                .field_warnings
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}
