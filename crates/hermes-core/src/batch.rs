use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregate::{Aggregator, BatchSummary};
use crate::error::{AppError, FetchError};
use crate::job::{BatchConfig, BatchJob, ExistingOutputPolicy};
use crate::models::{Address, AttemptResult};
use crate::retry::AttemptRunner;
use crate::sink::FailureEntry;
use crate::throttle::{RateLimitedFetcher, RateLimiter};
use crate::traits::{Extractor, Fetcher, RecordSink};

/// Events emitted while a batch runs, for monitoring/logging.
#[derive(Debug, Clone)]
pub enum BatchEvent<'a> {
    Started {
        run_id: Uuid,
        dispatched: usize,
        skipped: usize,
        concurrency: usize,
    },
    Skipped {
        address: &'a str,
    },
    Completed {
        address: &'a str,
        attempts: u32,
        warnings: usize,
    },
    Failed {
        address: &'a str,
        error: &'a FetchError,
        attempts: u32,
    },
    PersistFailed {
        address: &'a str,
        error: &'a str,
    },
    Progress {
        processed: u64,
        total: u64,
        succeeded: u64,
        failed: u64,
        eta: Option<Duration>,
    },
    Cancelled {
        remaining: u64,
    },
    Finished {
        summary: &'a BatchSummary,
    },
}

/// Trait for receiving batch events (decoupled logging).
pub trait BatchReporter: Send + Sync {
    fn report(&self, event: BatchEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBatchReporter;

impl BatchReporter for TracingBatchReporter {
    fn report(&self, event: BatchEvent<'_>) {
        match event {
            BatchEvent::Started {
                run_id,
                dispatched,
                skipped,
                concurrency,
            } => {
                tracing::info!(%run_id, dispatched, skipped, concurrency, "Batch started");
            }
            BatchEvent::Skipped { address } => {
                tracing::debug!(%address, "Record exists, skipping");
            }
            BatchEvent::Completed {
                address,
                attempts,
                warnings,
            } => {
                tracing::info!(%address, attempts, warnings, "Record extracted");
            }
            BatchEvent::Failed {
                address,
                error,
                attempts,
            } => {
                tracing::warn!(%address, kind = %error.kind, attempts, error = %error.message, "Address failed");
            }
            BatchEvent::PersistFailed { address, error } => {
                tracing::error!(%address, %error, "Failed to persist record");
            }
            BatchEvent::Progress {
                processed,
                total,
                succeeded,
                failed,
                eta,
            } => {
                let eta_secs = eta.map(|d| d.as_secs());
                if processed % 10 == 0 || processed == total {
                    tracing::info!(processed, total, succeeded, failed, ?eta_secs, "Progress");
                } else {
                    tracing::debug!(processed, total, succeeded, failed, ?eta_secs, "Progress");
                }
            }
            BatchEvent::Cancelled { remaining } => {
                tracing::warn!(remaining, "Batch cancelled, remaining addresses not dispatched");
            }
            BatchEvent::Finished { summary } => {
                tracing::info!(
                    run_id = %summary.run_id,
                    total = summary.total,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    retried = summary.retried,
                    skipped = summary.skipped,
                    cancelled = summary.cancelled,
                    success_rate = summary.success_rate,
                    "Batch finished"
                );
            }
        }
    }
}

/// Outcomes stream plus the task driving the worker pool.
///
/// The task resolves to the number of addresses that were never dispatched
/// because the run was cancelled.
pub struct BatchHandle {
    pub results: mpsc::Receiver<(Address, AttemptResult)>,
    pub task: JoinHandle<u64>,
}

/// Drives a bounded pool of workers over one shared address queue.
pub struct BatchOrchestrator<F, E> {
    runner: AttemptRunner<RateLimitedFetcher<F>, E>,
    concurrency: usize,
}

impl<F, E> BatchOrchestrator<F, E>
where
    F: Fetcher + 'static,
    E: Extractor + 'static,
{
    /// Every fetch of the run goes through one shared rate limiter.
    pub fn new(fetcher: F, extractor: E, config: &BatchConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_interval);
        let fetcher = RateLimitedFetcher::new(fetcher, limiter);
        Self {
            runner: AttemptRunner::new(
                fetcher,
                extractor,
                config.retry_policy(),
                config.fetch_timeout,
            ),
            concurrency: config.concurrency_limit.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Start the worker pool.
    ///
    /// Each worker checks the cancellation token, pulls the next address and
    /// sends exactly one terminal result for it. Results arrive in completion
    /// order, not input order.
    pub fn run(&self, addresses: Vec<Address>, cancel: CancellationToken) -> BatchHandle {
        let (tx, rx) = mpsc::channel(self.concurrency * 2);
        let queue = Arc::new(Mutex::new(VecDeque::from(addresses)));

        let workers: Vec<JoinHandle<()>> = (0..self.concurrency)
            .map(|worker| {
                let runner = self.runner.clone();
                let queue = queue.clone();
                let tx = tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker, "Worker started");
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                        let Some(address) = next else { break };

                        // A panicking attempt still owes its address a result.
                        let attempt = tokio::spawn({
                            let runner = runner.clone();
                            let address = address.clone();
                            async move { runner.attempt(&address).await }
                        });
                        let result = match attempt.await {
                            Ok(result) => result,
                            Err(e) => {
                                tracing::error!(worker, %address, error = %e, "Attempt panicked");
                                AttemptResult::Failure {
                                    error: FetchError::malformed(
                                        &address,
                                        format!("attempt panicked: {e}"),
                                    ),
                                    attempts: 1,
                                }
                            }
                        };
                        if tx.send((address, result)).await.is_err() {
                            tracing::warn!(worker, "Result receiver dropped, stopping");
                            break;
                        }
                    }
                    tracing::debug!(worker, "Worker stopped");
                })
            })
            .collect();
        drop(tx);

        let task = tokio::spawn(async move {
            for handle in workers {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Worker task panicked");
                }
            }
            queue.lock().unwrap_or_else(|e| e.into_inner()).len() as u64
        });

        BatchHandle { results: rx, task }
    }
}

/// Final product of [`run_batch`].
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub failures: Vec<FailureEntry>,
}

/// Run a whole batch: apply the existing-output policy, drive the pool and
/// consume every outcome.
///
/// This task is the only writer to `sink`; records are persisted as they
/// arrive, before they are counted.
pub async fn run_batch<F, E, S, R>(
    orchestrator: &BatchOrchestrator<F, E>,
    job: &BatchJob,
    sink: &S,
    reporter: &R,
    cancel: CancellationToken,
) -> Result<BatchReport, AppError>
where
    F: Fetcher + 'static,
    E: Extractor + 'static,
    S: RecordSink,
    R: BatchReporter,
{
    let aggregator = Aggregator::new(job.id, job.created_at);

    let dispatch = match job.config.on_existing {
        ExistingOutputPolicy::Overwrite => job.addresses.clone(),
        ExistingOutputPolicy::Skip => {
            let mut existing = HashSet::new();
            for address in &job.addresses {
                if !existing.contains(address.as_str()) && sink.has_record(address).await? {
                    existing.insert(address.as_str());
                }
            }
            let mut dispatch = Vec::with_capacity(job.addresses.len());
            for address in &job.addresses {
                if existing.contains(address.as_str()) {
                    aggregator.record_skipped();
                    reporter.report(BatchEvent::Skipped { address });
                } else {
                    dispatch.push(address.clone());
                }
            }
            dispatch
        }
    };

    let total = dispatch.len() as u64;
    reporter.report(BatchEvent::Started {
        run_id: job.id,
        dispatched: dispatch.len(),
        skipped: job.addresses.len() - dispatch.len(),
        concurrency: orchestrator.concurrency(),
    });

    let started = Instant::now();
    let mut failures = Vec::new();
    let BatchHandle { mut results, task } = orchestrator.run(dispatch, cancel);

    while let Some((address, result)) = results.recv().await {
        match &result {
            AttemptResult::Success {
                record,
                warnings,
                attempts,
            } => {
                if let Err(e) = sink.save_record(&address, record).await {
                    aggregator.record_persist_error();
                    reporter.report(BatchEvent::PersistFailed {
                        address: &address,
                        error: &e.to_string(),
                    });
                }
                reporter.report(BatchEvent::Completed {
                    address: &address,
                    attempts: *attempts,
                    warnings: warnings.len(),
                });
            }
            AttemptResult::Failure { error, attempts } => {
                if let Err(e) = sink.record_failure(error, *attempts).await {
                    tracing::error!(%address, error = %e, "Failed to append failure log");
                }
                failures.push(FailureEntry::from_error(error, *attempts));
                reporter.report(BatchEvent::Failed {
                    address: &address,
                    error,
                    attempts: *attempts,
                });
            }
        }

        aggregator.observe(&address, &result);

        let processed = aggregator.processed();
        reporter.report(BatchEvent::Progress {
            processed,
            total,
            succeeded: aggregator.succeeded(),
            failed: aggregator.failed(),
            eta: estimate_remaining(started.elapsed(), processed, total),
        });
    }

    let remaining = match task.await {
        Ok(remaining) => remaining,
        Err(e) => {
            tracing::error!(error = %e, "Batch supervisor task failed");
            total.saturating_sub(aggregator.processed())
        }
    };
    if remaining > 0 {
        aggregator.record_cancelled(remaining);
        reporter.report(BatchEvent::Cancelled { remaining });
    }

    let summary = aggregator.finalize();
    reporter.report(BatchEvent::Finished { summary: &summary });

    Ok(BatchReport { summary, failures })
}

/// Linear projection of the time left from the average time per address.
pub fn estimate_remaining(elapsed: Duration, processed: u64, total: u64) -> Option<Duration> {
    if processed == 0 || processed > total {
        return None;
    }
    let per_item = elapsed.as_secs_f64() / processed as f64;
    Some(Duration::from_secs_f64(per_item * (total - processed) as f64))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::FetchErrorKind;
    use crate::models::{Document, FieldWarning, WarningKind};
    use crate::testutil::{MockExtractor, MockFetcher, MockReporter, MockSink};

    fn config(on_existing: ExistingOutputPolicy) -> BatchConfig {
        BatchConfig::new("unused", on_existing)
            .with_concurrency(3)
            .with_rate_limit(Duration::ZERO)
            .with_retry_backoff(Duration::ZERO)
            .with_max_retries(2)
            .with_fetch_timeout(Duration::from_secs(2))
    }

    fn job(addresses: &[&str], config: BatchConfig) -> BatchJob {
        BatchJob::new(addresses.iter().map(|a| a.to_string()).collect(), config).unwrap()
    }

    #[tokio::test]
    async fn test_every_address_yields_exactly_one_result() {
        let addresses: Vec<String> = (0..20).map(|i| format!("https://shop.test/{}", i % 7)).collect();
        let fetcher = MockFetcher::by_address(vec![
            ("https://shop.test/1", vec![Err(FetchErrorKind::Blocked)]),
            (
                "https://shop.test/2",
                vec![Err(FetchErrorKind::Timeout), Ok("late".into())],
            ),
        ]);
        let cfg = config(ExistingOutputPolicy::Overwrite).with_concurrency(4);
        let orchestrator = BatchOrchestrator::new(fetcher, MockExtractor::new(), &cfg);

        let BatchHandle { mut results, task } =
            orchestrator.run(addresses.clone(), CancellationToken::new());
        let mut seen: HashMap<String, usize> = HashMap::new();
        while let Some((address, _)) = results.recv().await {
            *seen.entry(address).or_default() += 1;
        }
        assert_eq!(task.await.unwrap(), 0);

        let mut expected: HashMap<String, usize> = HashMap::new();
        for a in addresses {
            *expected.entry(a).or_default() += 1;
        }
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_run_batch_persists_and_counts() {
        let fetcher = MockFetcher::by_address(vec![(
            "https://shop.test/2",
            vec![Err(FetchErrorKind::Blocked)],
        )]);
        let cfg = config(ExistingOutputPolicy::Overwrite);
        let orchestrator = BatchOrchestrator::new(fetcher.clone(), MockExtractor::new(), &cfg);
        let job = job(
            &["https://shop.test/1", "https://shop.test/2", "https://shop.test/3"],
            cfg,
        );
        let sink = MockSink::empty();
        let reporter = MockReporter::new();

        let report = run_batch(&orchestrator, &job, &sink, &reporter, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.retried, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].address, "https://shop.test/2");
        assert_eq!(report.failures[0].kind, FetchErrorKind::Blocked);

        let mut saved = sink.saved_addresses();
        saved.sort();
        assert_eq!(saved, vec!["https://shop.test/1", "https://shop.test/3"]);
        assert_eq!(sink.failures.lock().unwrap().len(), 1);
        assert_eq!(fetcher.call_count(), 3);

        assert_eq!(reporter.count("Started"), 1);
        assert_eq!(reporter.count("Completed"), 2);
        assert_eq!(reporter.count("Failed"), 1);
        assert_eq!(reporter.count("Progress"), 3);
        assert_eq!(reporter.count("Finished"), 1);
        assert_eq!(reporter.count("Cancelled"), 0);
    }

    #[tokio::test]
    async fn test_skip_policy_uses_existing_output() {
        let fetcher = MockFetcher::new("<html>x</html>");
        let cfg = config(ExistingOutputPolicy::Skip);
        let orchestrator = BatchOrchestrator::new(fetcher.clone(), MockExtractor::new(), &cfg);
        let job = job(
            &["https://shop.test/1", "https://shop.test/2", "https://shop.test/1"],
            cfg,
        );
        let sink = MockSink::with_existing(&["https://shop.test/1"]);
        let reporter = MockReporter::new();

        let report = run_batch(&orchestrator, &job, &sink, &reporter, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.summary.skipped, 2);
        assert_eq!(report.summary.total, 1);
        assert_eq!(sink.saved_addresses(), vec!["https://shop.test/2"]);
        assert_eq!(fetcher.call_count(), 1);
        assert_eq!(reporter.count("Skipped"), 2);
    }

    #[tokio::test]
    async fn test_overwrite_policy_refetches_existing() {
        let fetcher = MockFetcher::new("<html>x</html>");
        let cfg = config(ExistingOutputPolicy::Overwrite);
        let orchestrator = BatchOrchestrator::new(fetcher.clone(), MockExtractor::new(), &cfg);
        let job = job(&["https://shop.test/1"], cfg);
        let sink = MockSink::with_existing(&["https://shop.test/1"]);

        let report = run_batch(
            &orchestrator,
            &job,
            &sink,
            &MockReporter::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.summary.skipped, 0);
        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_persist_error_keeps_success() {
        let cfg = config(ExistingOutputPolicy::Overwrite);
        let orchestrator =
            BatchOrchestrator::new(MockFetcher::new("x"), MockExtractor::new(), &cfg);
        let job = job(&["https://shop.test/1"], cfg);
        let sink = MockSink::with_save_error(AppError::SinkError("disk full".into()));
        let reporter = MockReporter::new();

        let report = run_batch(&orchestrator, &job, &sink, &reporter, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(report.summary.persist_errors, 1);
        assert_eq!(reporter.count("PersistFailed"), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch_and_finishes_in_flight() {
        let fetcher = MockFetcher::new("x").with_delay(Duration::from_millis(100));
        let cfg = config(ExistingOutputPolicy::Overwrite).with_concurrency(1);
        let orchestrator = BatchOrchestrator::new(fetcher.clone(), MockExtractor::new(), &cfg);
        let job = job(
            &[
                "https://shop.test/1",
                "https://shop.test/2",
                "https://shop.test/3",
                "https://shop.test/4",
                "https://shop.test/5",
            ],
            cfg,
        );
        let sink = MockSink::empty();
        let reporter = MockReporter::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let report = run_batch(&orchestrator, &job, &sink, &reporter, cancel)
            .await
            .unwrap();

        let summary = &report.summary;
        assert!(summary.total >= 1);
        assert!(summary.cancelled >= 1);
        assert_eq!(summary.total + summary.cancelled, 5);
        assert_eq!(summary.succeeded, summary.total);
        assert_eq!(sink.saved_addresses().len() as u64, summary.total);
        assert_eq!(fetcher.call_count() as u64, summary.total);
        assert_eq!(reporter.count("Cancelled"), 1);
    }

    #[tokio::test]
    async fn test_all_failures_still_report() {
        let fetcher = MockFetcher::with_responses(vec![Err(FetchErrorKind::Malformed); 4]);
        let cfg = config(ExistingOutputPolicy::Overwrite);
        let orchestrator = BatchOrchestrator::new(fetcher, MockExtractor::new(), &cfg);
        let job = job(
            &["https://a/1", "https://a/2", "https://a/3", "https://a/4"],
            cfg,
        );

        let report = run_batch(
            &orchestrator,
            &job,
            &MockSink::empty(),
            &MockReporter::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.summary.failed, 4);
        assert_eq!(report.summary.success_rate, 0.0);
        assert_eq!(report.summary.failures_by_kind.get("malformed"), Some(&4));
    }

    #[tokio::test]
    async fn test_field_warnings_are_tallied_per_field() {
        let fetcher = MockFetcher::by_address(vec![(
            "https://shop.test/2",
            vec![Err(FetchErrorKind::Blocked)],
        )]);
        let extractor = MockExtractor::with_warnings(vec![
            FieldWarning::new("pricing.current_price", WarningKind::SelectorExhausted, "none"),
            FieldWarning::new("reviews_and_ratings.rating", WarningKind::TypeMismatch, "7.5"),
        ]);
        let cfg = config(ExistingOutputPolicy::Overwrite);
        let orchestrator = BatchOrchestrator::new(fetcher, extractor, &cfg);
        let job = job(
            &["https://shop.test/1", "https://shop.test/2", "https://shop.test/3"],
            cfg,
        );

        let report = run_batch(
            &orchestrator,
            &job,
            &MockSink::empty(),
            &MockReporter::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let tally = &report.summary.field_warnings;
        assert_eq!(tally.get("pricing.current_price"), Some(&2));
        assert_eq!(tally.get("reviews_and_ratings.rating"), Some(&2));
        assert_eq!(tally.len(), 2);
    }

    #[tokio::test]
    async fn test_workers_share_one_rate_limiter() {
        let fetcher = MockFetcher::new("x");
        let cfg = config(ExistingOutputPolicy::Overwrite)
            .with_concurrency(4)
            .with_rate_limit(Duration::from_millis(100));
        let orchestrator = BatchOrchestrator::new(fetcher.clone(), MockExtractor::new(), &cfg);
        let job = job(
            &[
                "https://shop.test/1",
                "https://shop.test/2",
                "https://shop.test/3",
                "https://shop.test/4",
                "https://shop.test/5",
            ],
            cfg,
        );

        let start = Instant::now();
        let report = run_batch(
            &orchestrator,
            &job,
            &MockSink::empty(),
            &MockReporter::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.summary.succeeded, 5);
        assert_eq!(fetcher.call_count(), 5);
        assert!(
            start.elapsed() >= Duration::from_millis(400),
            "five fetches through one 100ms limiter took {:?}",
            start.elapsed()
        );
    }

    /// Fetcher that panics on one address.
    #[derive(Clone)]
    struct PanicOn(&'static str);

    impl Fetcher for PanicOn {
        async fn fetch(&self, address: &str, _timeout: Duration) -> Result<Document, FetchError> {
            if address == self.0 {
                panic!("fetcher bug");
            }
            Ok(Document::new(address, "ok"))
        }
    }

    #[tokio::test]
    async fn test_panicking_attempt_is_counted_as_failure() {
        let cfg = config(ExistingOutputPolicy::Overwrite).with_concurrency(2);
        let orchestrator =
            BatchOrchestrator::new(PanicOn("https://shop.test/2"), MockExtractor::new(), &cfg);
        let job = job(
            &["https://shop.test/1", "https://shop.test/2", "https://shop.test/3"],
            cfg,
        );
        let sink = MockSink::empty();

        let reporter = MockReporter::new();

        let report = run_batch(&orchestrator, &job, &sink, &reporter, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.cancelled, 0);
        assert_eq!(report.failures[0].address, "https://shop.test/2");
        assert_eq!(report.failures[0].kind, FetchErrorKind::Malformed);
        assert_eq!(sink.saved_addresses().len(), 2);
    }

    #[test]
    fn test_estimate_remaining() {
        assert_eq!(estimate_remaining(Duration::from_secs(10), 0, 10), None);
        assert_eq!(
            estimate_remaining(Duration::from_secs(10), 5, 10),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            estimate_remaining(Duration::from_secs(4), 4, 4),
            Some(Duration::ZERO)
        );
    }
}
