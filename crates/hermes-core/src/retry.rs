use std::time::Duration;

use crate::models::AttemptResult;
use crate::throttle::jitter;
use crate::traits::{Extractor, Fetcher};

/// Bounded retry with linear, jittered backoff.
///
/// Delay before retry `n` (1-indexed): `backoff * n + jitter`, where the
/// jitter is drawn from `[0, backoff)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the wait before retry `n`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        self.backoff * retry.max(1)
    }

    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.base_delay(retry) + jitter(self.backoff)
    }

    /// Total tries allowed for one address.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Runs one address through fetch and extract, retrying transient failures.
#[derive(Clone)]
pub struct AttemptRunner<F, E> {
    fetcher: F,
    extractor: E,
    policy: RetryPolicy,
    fetch_timeout: Duration,
}

impl<F: Fetcher, E: Extractor> AttemptRunner<F, E> {
    pub fn new(fetcher: F, extractor: E, policy: RetryPolicy, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            extractor,
            policy,
            fetch_timeout,
        }
    }

    /// Produce the terminal result for an address.
    ///
    /// Only timeouts and network failures are retried; blocked and malformed
    /// responses fail on the spot. A fetched document always becomes a
    /// success, however little the extractor could resolve.
    pub async fn attempt(&self, address: &str) -> AttemptResult {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            tracing::debug!(%address, attempt, "Fetching");

            match self.fetcher.fetch(address, self.fetch_timeout).await {
                Ok(document) => {
                    let extraction = self.extractor.extract(&document);
                    if attempt > 1 {
                        tracing::info!(%address, attempts = attempt, "Succeeded after retry");
                    }
                    return AttemptResult::Success {
                        record: Box::new(extraction.record),
                        warnings: extraction.warnings,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    let error = e.with_attempt(attempt);
                    if !error.is_retryable() || attempt >= max_attempts {
                        tracing::warn!(
                            %address,
                            kind = %error.kind,
                            attempts = attempt,
                            error = %error.message,
                            "Giving up"
                        );
                        return AttemptResult::Failure {
                            error,
                            attempts: attempt,
                        };
                    }

                    let delay = self.policy.delay_for_retry(attempt);
                    tracing::info!(
                        %address,
                        kind = %error.kind,
                        attempt,
                        delay_ms = %delay.as_millis(),
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;
    use crate::testutil::{MockExtractor, MockFetcher, MockResponse};

    const ADDR: &str = "https://shop.test/item/1.html";

    fn runner(fetcher: MockFetcher, max_retries: u32) -> AttemptRunner<MockFetcher, MockExtractor> {
        AttemptRunner::new(
            fetcher,
            MockExtractor::new(),
            RetryPolicy {
                max_retries,
                backoff: Duration::ZERO,
            },
            Duration::from_secs(1),
        )
    }

    fn failures_then_success(k: usize) -> Vec<MockResponse> {
        let mut responses = vec![Err(FetchErrorKind::NetworkFailure); k];
        responses.push(Ok("Widget".into()));
        responses
    }

    #[test]
    fn test_delay_schedule_grows_linearly() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(300));

        for retry in 1..=3 {
            let delay = policy.delay_for_retry(retry);
            assert!(delay >= policy.base_delay(retry));
            assert!(delay < policy.base_delay(retry) + Duration::from_millis(100));
        }
    }

    #[test]
    fn test_zero_backoff_means_no_wait() {
        let policy = RetryPolicy {
            max_retries: 2,
            backoff: Duration::ZERO,
        };
        assert_eq!(policy.delay_for_retry(2), Duration::ZERO);
        assert_eq!(policy.max_attempts(), 3);
    }

    #[tokio::test]
    async fn test_first_try_success() {
        let runner = runner(MockFetcher::new("Widget"), 3);
        let result = runner.attempt(ADDR).await;

        match result {
            AttemptResult::Success {
                record, attempts, ..
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(record.basic_info.title.as_deref(), Some("Widget"));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_k_network_failures_then_success_within_budget() {
        let k = 2;
        let fetcher = MockFetcher::with_responses(failures_then_success(k));
        let runner = runner(fetcher.clone(), k as u32);

        let result = runner.attempt(ADDR).await;
        assert!(result.is_success());
        assert_eq!(result.attempts(), k as u32 + 1);
        assert_eq!(fetcher.call_count(), k + 1);
    }

    #[tokio::test]
    async fn test_k_network_failures_exceed_smaller_budget() {
        let k = 2;
        let fetcher = MockFetcher::with_responses(failures_then_success(k));
        let runner = runner(fetcher.clone(), k as u32 - 1);

        match runner.attempt(ADDR).await {
            AttemptResult::Failure { error, attempts } => {
                assert_eq!(attempts, k as u32);
                assert_eq!(error.kind, FetchErrorKind::NetworkFailure);
                assert_eq!(error.attempt, k as u32);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(fetcher.call_count(), k);
    }

    #[tokio::test]
    async fn test_blocked_is_not_retried() {
        let fetcher = MockFetcher::with_error(FetchErrorKind::Blocked);
        let runner = runner(fetcher.clone(), 5);

        let result = runner.attempt(ADDR).await;
        assert!(!result.is_success());
        assert_eq!(result.attempts(), 1);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_is_not_retried() {
        let fetcher = MockFetcher::with_error(FetchErrorKind::Malformed);
        let runner = runner(fetcher.clone(), 5);

        match runner.attempt(ADDR).await {
            AttemptResult::Failure { error, attempts } => {
                assert_eq!(attempts, 1);
                assert_eq!(error.kind, FetchErrorKind::Malformed);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeouts_are_retried() {
        let fetcher = MockFetcher::with_responses(vec![
            Err(FetchErrorKind::Timeout),
            Ok("Widget".into()),
        ]);
        let result = runner(fetcher, 1).attempt(ADDR).await;
        assert!(result.is_success());
        assert_eq!(result.attempts(), 2);
    }

    #[tokio::test]
    async fn test_empty_document_is_still_success() {
        let result = runner(MockFetcher::new("   "), 0).attempt(ADDR).await;
        match result {
            AttemptResult::Success { record, .. } => assert!(record.is_empty()),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
