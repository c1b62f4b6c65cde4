//! Eventual-Consistency Polling
//!
//! Re-reads rendered state until it matches an expected value or the retry
//! budget is exhausted. This replaces fixed sleeps: the backoff schedule
//! lives here and nowhere else.
//!
//! # Schedule
//!
//! ```text
//!   read#0 ── sleep(1·base) ── read#1 ── sleep(2·base) ── read#2 ... sleep(n·base) ── read#n ── final read
//! ```
//!
//! A budget of `n` attempts performs at most `n + 2` reads: the immediate
//! read, `n` retries, and one final read whose value goes into the failure.
//!
//! ## Toyota Way Application
//!
//! - **Muda**: Linear backoff tuned for short UI re-renders, not network congestion
//! - **Jidoka**: Exhaustion reports the real last observation, not "timed out"

use crate::coerce::Expectation;
use crate::report::{AssertionSink, TracingSink, Verdict};
use crate::result::{LockstepError, LockstepResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, Instrument};

// =============================================================================
// RETRY BUDGET
// =============================================================================

/// Bounded attempt count plus linear backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    /// Retries after the immediate read
    pub max_attempts: u32,
    /// Base delay; retry `n` waits `n * base_delay_ms`
    pub base_delay_ms: u64,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(5, 100)
    }
}

impl RetryBudget {
    /// Create a budget
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    /// Base delay as Duration
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay before retry `attempt` (1-based)
    #[must_use]
    pub const fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(attempt as u64))
    }

    /// Every delay in order
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).map(|n| self.delay_for(n)).collect()
    }

    /// Total time spent sleeping when the budget is exhausted, saturating at
    /// `u64::MAX` milliseconds
    #[must_use]
    pub const fn total_delay(&self) -> Duration {
        let n = self.max_attempts as u128;
        let total = self.base_delay_ms as u128 * (n * (n + 1) / 2);
        if total > u64::MAX as u128 {
            Duration::from_millis(u64::MAX)
        } else {
            Duration::from_millis(total as u64)
        }
    }
}

// =============================================================================
// POLL
// =============================================================================

/// One observation made by the poller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Reader returned a value
    Value(String),
    /// Reader failed transiently
    ReadFailed(String),
}

impl Observation {
    fn satisfies(&self, expected: &Expectation) -> bool {
        match self {
            Self::Value(v) => expected.matches(v),
            Self::ReadFailed(_) => false,
        }
    }
}

impl std::fmt::Display for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v:?}"),
            Self::ReadFailed(msg) => write!(f, "<read failed: {msg}>"),
        }
    }
}

/// Successful poll outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    /// Value that satisfied the expectation
    pub observed: String,
    /// Reads performed, including the matching one
    pub reads: u32,
    /// Total backoff slept
    pub backoff: Duration,
}

/// Polls readers until they converge on an expected value
#[derive(Debug, Clone)]
pub struct Poller {
    sink: Arc<dyn AssertionSink>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    /// Create a poller reporting to the tracing sink
    #[must_use]
    pub fn new() -> Self {
        Self {
            sink: Arc::new(TracingSink),
        }
    }

    /// Report verdicts to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AssertionSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Re-invoke `reader` until its value satisfies `expected`.
    ///
    /// Transient reader failures ([`LockstepError::is_transient`]) count as
    /// non-matching attempts. Any other reader error aborts the poll.
    ///
    /// # Errors
    ///
    /// [`LockstepError::PollExhausted`] with the final observation when the
    /// budget runs out.
    pub async fn poll_until<R, Fut>(
        &self,
        target: &str,
        reader: R,
        expected: &Expectation,
        budget: RetryBudget,
    ) -> LockstepResult<PollReport>
    where
        R: FnMut() -> Fut,
        Fut: Future<Output = LockstepResult<String>>,
    {
        let span = info_span!("poll", subject = target, expected = %expected);
        self.poll_inner(target, reader, expected, budget)
            .instrument(span)
            .await
    }

    async fn poll_inner<R, Fut>(
        &self,
        target: &str,
        mut reader: R,
        expected: &Expectation,
        budget: RetryBudget,
    ) -> LockstepResult<PollReport>
    where
        R: FnMut() -> Fut,
        Fut: Future<Output = LockstepResult<String>>,
    {
        let mut reads = 0u32;
        let mut backoff = Duration::ZERO;

        let mut observation = self.read(target, &mut reader, &mut reads).await?;
        let mut attempt = 0;
        while !observation.satisfies(expected) && attempt < budget.max_attempts {
            attempt += 1;
            let delay = budget.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, last = %observation, "retrying");
            tokio::time::sleep(delay).await;
            backoff = backoff.saturating_add(delay);
            observation = self.read(target, &mut reader, &mut reads).await?;
        }

        if !observation.satisfies(expected) {
            observation = self.read(target, &mut reader, &mut reads).await?;
        }

        if let Observation::Value(observed) = &observation {
            if expected.matches(observed) {
                self.sink.record(Verdict::pass(
                    target,
                    format!("{observed:?} after {reads} reads"),
                ));
                return Ok(PollReport {
                    observed: observed.clone(),
                    reads,
                    backoff,
                });
            }
        }

        let err = LockstepError::PollExhausted {
            target: target.to_string(),
            expected: expected.to_string(),
            last_observed: observation.to_string(),
            reads,
        };
        self.sink.record(Verdict::fail(
            target,
            format!("expected {expected}, last observed {observation}"),
        ));
        Err(err)
    }

    async fn read<R, Fut>(
        &self,
        target: &str,
        reader: &mut R,
        reads: &mut u32,
    ) -> LockstepResult<Observation>
    where
        R: FnMut() -> Fut,
        Fut: Future<Output = LockstepResult<String>>,
    {
        *reads += 1;
        match reader().await {
            Ok(value) => Ok(Observation::Value(value)),
            Err(err) if err.is_transient() => {
                debug!(read = *reads, error = %err, "transient read failure");
                Ok(Observation::ReadFailed(err.to_string()))
            }
            Err(err) => {
                self.sink.record(Verdict::fail(target, err.to_string()));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::report::SyncReporter;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reader that renders "N records", reaching `target` on read number `converge_at`
    fn converging_reader(
        calls: &AtomicU32,
        converge_at: u32,
        target: i64,
    ) -> impl FnMut() -> std::future::Ready<LockstepResult<String>> + '_ {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let value = if n >= converge_at { target } else { target - 1 };
            std::future::ready(Ok(format!("{value} records")))
        }
    }

    mod budget_tests {
        use super::*;

        #[test]
        fn test_default_budget() {
            let budget = RetryBudget::default();
            assert_eq!(budget.max_attempts, 5);
            assert_eq!(budget.base_delay(), Duration::from_millis(100));
        }

        #[test]
        fn test_linear_schedule() {
            let budget = RetryBudget::new(5, 300);
            assert_eq!(
                budget.schedule(),
                vec![
                    Duration::from_millis(300),
                    Duration::from_millis(600),
                    Duration::from_millis(900),
                    Duration::from_millis(1200),
                    Duration::from_millis(1500),
                ]
            );
            assert_eq!(budget.total_delay(), Duration::from_millis(4500));
        }

        #[test]
        fn test_zero_attempts() {
            let budget = RetryBudget::new(0, 100);
            assert!(budget.schedule().is_empty());
            assert_eq!(budget.total_delay(), Duration::ZERO);
        }

        #[test]
        fn test_delay_saturates() {
            let budget = RetryBudget::new(2, u64::MAX);
            assert_eq!(budget.delay_for(2), Duration::from_millis(u64::MAX));
        }

        #[test]
        fn test_total_delay_saturates() {
            let budget = RetryBudget::new(u32::MAX, u64::MAX);
            assert_eq!(budget.total_delay(), Duration::from_millis(u64::MAX));
            let budget = RetryBudget::new(3, u64::MAX / 2);
            assert_eq!(budget.total_delay(), Duration::from_millis(u64::MAX));
        }

        #[test]
        fn test_total_delay_matches_schedule() {
            let budget = RetryBudget::new(7, 33);
            let summed: Duration = budget.schedule().into_iter().sum();
            assert_eq!(budget.total_delay(), summed);
        }
    }

    mod poller_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_immediate_match_reads_once() {
            let calls = AtomicU32::new(0);
            let report = Poller::new()
                .poll_until(
                    "rows",
                    converging_reader(&calls, 1, 3),
                    &Expectation::integer(3),
                    RetryBudget::default(),
                )
                .await
                .unwrap();
            assert_eq!(report.reads, 1);
            assert_eq!(report.observed, "3 records");
            assert_eq!(report.backoff, Duration::ZERO);
        }

        #[tokio::test(start_paused = true)]
        async fn test_converges_after_retries() {
            let calls = AtomicU32::new(0);
            let start = tokio::time::Instant::now();
            let report = Poller::new()
                .poll_until(
                    "rows",
                    converging_reader(&calls, 3, 10),
                    &Expectation::integer(10),
                    RetryBudget::new(5, 100),
                )
                .await
                .unwrap();
            assert_eq!(report.reads, 3);
            assert_eq!(calls.load(Ordering::SeqCst), 3);
            // 100ms + 200ms
            assert_eq!(report.backoff, Duration::from_millis(300));
            assert_eq!(start.elapsed(), Duration::from_millis(300));
        }

        #[tokio::test(start_paused = true)]
        async fn test_final_read_can_still_converge() {
            let calls = AtomicU32::new(0);
            let budget = RetryBudget::new(2, 10);
            let report = Poller::new()
                .poll_until(
                    "rows",
                    converging_reader(&calls, 4, 1),
                    &Expectation::integer(1),
                    budget,
                )
                .await
                .unwrap();
            assert_eq!(report.reads, 4);
        }

        #[tokio::test(start_paused = true)]
        async fn test_exhaustion_reads_budget_plus_two() {
            let calls = AtomicU32::new(0);
            let reporter = Arc::new(SyncReporter::new());
            let start = tokio::time::Instant::now();
            let err = Poller::new()
                .with_sink(reporter.clone())
                .poll_until(
                    "grid pagination",
                    converging_reader(&calls, u32::MAX, 3),
                    &Expectation::integer(3),
                    RetryBudget::new(5, 100),
                )
                .await
                .unwrap_err();

            assert_eq!(calls.load(Ordering::SeqCst), 7);
            assert_eq!(start.elapsed(), Duration::from_millis(1500));
            match err {
                LockstepError::PollExhausted {
                    target,
                    expected,
                    last_observed,
                    reads,
                } => {
                    assert_eq!(target, "grid pagination");
                    assert_eq!(expected, "3");
                    assert_eq!(last_observed, "\"2 records\"");
                    assert_eq!(reads, 7);
                }
                other => panic!("expected PollExhausted, got {other:?}"),
            }
            assert_eq!(reporter.failed_count(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_transient_failures_count_as_attempts() {
            let calls = AtomicU32::new(0);
            let reader = || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                std::future::ready(if n < 3 {
                    Err(LockstepError::ElementNotFound {
                        selector: "[data-testid=\"grid-pagination\"]".into(),
                    })
                } else {
                    Ok("5 records".to_string())
                })
            };
            let report = Poller::new()
                .poll_until("rows", reader, &Expectation::integer(5), RetryBudget::new(5, 50))
                .await
                .unwrap();
            assert_eq!(report.reads, 3);
        }

        #[tokio::test(start_paused = true)]
        async fn test_terminal_read_failure_is_reported() {
            let reader = || std::future::ready(Err(LockstepError::transient("page transition")));
            let err = Poller::new()
                .poll_until("rows", reader, &Expectation::integer(1), RetryBudget::new(1, 10))
                .await
                .unwrap_err();
            match err {
                LockstepError::PollExhausted { last_observed, reads, .. } => {
                    assert!(last_observed.contains("page transition"));
                    assert_eq!(reads, 3);
                }
                other => panic!("expected PollExhausted, got {other:?}"),
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_fatal_read_error_aborts() {
            let calls = AtomicU32::new(0);
            let reader = || {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err(LockstepError::TransportClosed))
            };
            let err = Poller::new()
                .poll_until("rows", reader, &Expectation::integer(1), RetryBudget::new(5, 10))
                .await
                .unwrap_err();
            assert!(matches!(err, LockstepError::TransportClosed));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_delays_never_decrease() {
            let stamps = std::sync::Mutex::new(Vec::new());
            let reader = || {
                stamps.lock().unwrap().push(tokio::time::Instant::now());
                std::future::ready(Ok("0".to_string()))
            };
            let _ = Poller::new()
                .poll_until("rows", reader, &Expectation::integer(1), RetryBudget::new(4, 25))
                .await;
            let stamps = stamps.into_inner().unwrap();
            let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
            // retries 1..=4, then the final read immediately after the last retry
            assert_eq!(
                gaps,
                vec![
                    Duration::from_millis(25),
                    Duration::from_millis(50),
                    Duration::from_millis(75),
                    Duration::from_millis(100),
                    Duration::ZERO,
                ]
            );
            assert!(gaps[..4].windows(2).all(|w| w[1] >= w[0]));
        }

        #[tokio::test(start_paused = true)]
        async fn test_text_expectation() {
            let report = Poller::new()
                .poll_until(
                    "toast",
                    || std::future::ready(Ok("Copied to clipboard".to_string())),
                    &Expectation::text("Copied to clipboard"),
                    RetryBudget::default(),
                )
                .await
                .unwrap();
            assert_eq!(report.observed, "Copied to clipboard");
        }
    }

    proptest! {
        #[test]
        fn prop_reads_are_deterministic(max in 0u32..8, converge_at in 1u32..12) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let run = || {
                let calls = AtomicU32::new(0);
                let result = rt.block_on(Poller::new().poll_until(
                    "rows",
                    converging_reader(&calls, converge_at, 3),
                    &Expectation::integer(3),
                    RetryBudget::new(max, 10),
                ));
                (result.is_ok(), calls.load(Ordering::SeqCst))
            };
            let first = run();
            let second = run();
            prop_assert_eq!(first, second);

            let (ok, reads) = first;
            if converge_at <= max + 2 {
                prop_assert!(ok);
                prop_assert_eq!(reads, converge_at);
            } else {
                prop_assert!(!ok);
                prop_assert_eq!(reads, max + 2);
            }
        }
    }
}
