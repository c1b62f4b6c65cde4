//! Action-Response Correlation
//!
//! Pairs one simulated user action with the specific network exchange it
//! caused, among all the concurrent traffic on the session's tap.
//!
//! # Ordering
//!
//! ```text
//!   subscribe(tap) ──► poll(action) ─┬─► exchange #41  GET  /views/   (miss)
//!                                    ├─► exchange #42  POST /data/    (near miss: body differs)
//!                                    └─► exchange #43  POST /data/    (match) ──► resolve
//! ```
//!
//! The stream is armed before the action future is first polled, so a fast
//! backend cannot complete the exchange before observation starts.
//!
//! ## Toyota Way Application
//!
//! - **Jidoka**: A missing exchange fails loudly with the unsatisfied matcher
//! - **Poka-Yoke**: Near misses are counted, never resolved

use crate::network::{Exchange, HttpMethod, NetworkTap, UrlPattern};
use crate::report::{AssertionSink, TracingSink, Verdict};
use crate::result::{LockstepError, LockstepResult};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, Instrument};

/// Default global correlation timeout (30 seconds)
pub const DEFAULT_CORRELATION_TIMEOUT_MS: u64 = 30_000;

/// Longest near-miss body kept for diagnostics
const NEAR_MISS_BODY_LIMIT: usize = 512;

/// Predicate over a decoded JSON response body
pub type BodyPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

// =============================================================================
// MATCHER
// =============================================================================

/// How an exchange relates to a matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// URL or method differs
    Miss,
    /// URL and method match, body predicate fails (or body is not JSON)
    NearMiss,
    /// All three constraints hold
    Match,
}

/// Declarative predicate over an observed exchange
#[derive(Clone)]
pub struct ResponseMatcher {
    url: UrlPattern,
    methods: BTreeSet<HttpMethod>,
    body: Option<(String, BodyPredicate)>,
}

impl std::fmt::Debug for ResponseMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseMatcher")
            .field("url", &self.url)
            .field("methods", &self.methods)
            .field("body", &self.body.as_ref().map(|(desc, _)| desc))
            .finish()
    }
}

impl ResponseMatcher {
    /// Match exchanges whose URL contains `fragment`, any method, any body
    #[must_use]
    pub fn new(fragment: impl Into<String>) -> Self {
        Self::with_pattern(UrlPattern::contains(fragment))
    }

    /// Match exchanges whose URL matches `pattern`
    #[must_use]
    pub fn with_pattern(url: UrlPattern) -> Self {
        Self {
            url,
            methods: BTreeSet::new(),
            body: None,
        }
    }

    /// Accept one more HTTP method (no methods = any method)
    #[must_use]
    pub fn method(mut self, method: HttpMethod) -> Self {
        let _ = self.methods.insert(method);
        self
    }

    /// Accept a set of HTTP methods
    #[must_use]
    pub fn methods(mut self, methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        self.methods.extend(methods);
        self
    }

    /// Require the decoded JSON body to satisfy `predicate`
    #[must_use]
    pub fn body<F>(mut self, description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.body = Some((description.into(), Arc::new(predicate)));
        self
    }

    /// Classify an exchange
    #[must_use]
    pub fn evaluate(&self, exchange: &Exchange) -> MatchOutcome {
        if !self.url.matches(exchange.url()) {
            return MatchOutcome::Miss;
        }
        if !self.methods.is_empty() && !self.methods.contains(&exchange.method()) {
            return MatchOutcome::Miss;
        }
        let Some((_, predicate)) = &self.body else {
            return MatchOutcome::Match;
        };
        match exchange.response_json() {
            Some(body) if predicate(&body) => MatchOutcome::Match,
            _ => MatchOutcome::NearMiss,
        }
    }

    /// Whether an exchange fully matches
    #[must_use]
    pub fn matches(&self, exchange: &Exchange) -> bool {
        self.evaluate(exchange) == MatchOutcome::Match
    }
}

impl std::fmt::Display for ResponseMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.methods.is_empty() {
            f.write_str("ANY")?;
        } else {
            let methods: Vec<&str> = self.methods.iter().map(HttpMethod::as_str).collect();
            f.write_str(&methods.join("|"))?;
        }
        write!(f, " {}", self.url)?;
        if let Some((description, _)) = &self.body {
            write!(f, " where {description}")?;
        }
        Ok(())
    }
}

// =============================================================================
// CORRELATOR
// =============================================================================

#[derive(Debug, Default)]
struct NearMisses {
    count: usize,
    last_body: Option<String>,
}

impl NearMisses {
    fn record(&mut self, exchange: &Exchange) {
        self.count += 1;
        let mut body = exchange.response_text();
        if body.len() > NEAR_MISS_BODY_LIMIT {
            let mut cut = NEAR_MISS_BODY_LIMIT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push('…');
        }
        self.last_body = Some(body);
    }
}

/// Correlates a user action with the exchange it triggers
#[derive(Debug, Clone)]
pub struct Correlator {
    timeout: Duration,
    sink: Arc<dyn AssertionSink>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_CORRELATION_TIMEOUT_MS))
    }
}

impl Correlator {
    /// Create a correlator with a global timeout, reporting to the tracing sink
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sink: Arc::new(TracingSink),
        }
    }

    /// Report verdicts to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AssertionSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Correlation timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Trigger `action` and resolve with the first exchange satisfying `matcher`.
    ///
    /// The action future is polled exactly once to completion (or until the
    /// timeout), concurrently with observation. Resolution requires both the
    /// action to have completed and a matching exchange to have arrived.
    ///
    /// # Errors
    ///
    /// - [`LockstepError::CorrelationTimeout`] if no match arrives in time
    /// - the action's own error, if the action fails
    pub async fn correlate<A>(
        &self,
        tap: &NetworkTap,
        matcher: &ResponseMatcher,
        action: A,
    ) -> LockstepResult<Exchange>
    where
        A: Future<Output = LockstepResult<()>>,
    {
        let span = info_span!("correlate", matcher = %matcher);
        self.correlate_inner(tap, matcher, action)
            .instrument(span)
            .await
    }

    async fn correlate_inner<A>(
        &self,
        tap: &NetworkTap,
        matcher: &ResponseMatcher,
        action: A,
    ) -> LockstepResult<Exchange>
    where
        A: Future<Output = LockstepResult<()>>,
    {
        let mut stream = tap.subscribe();
        let mut near_misses = NearMisses::default();

        let observe = async {
            loop {
                let exchange = stream.next().await?;
                match matcher.evaluate(&exchange) {
                    MatchOutcome::Match => return Ok::<_, LockstepError>(exchange),
                    MatchOutcome::NearMiss => {
                        debug!(id = exchange.id, "near miss: body predicate failed");
                        near_misses.record(&exchange);
                    }
                    MatchOutcome::Miss => {}
                }
            }
        };

        let outcome = tokio::time::timeout(self.timeout, async {
            tokio::try_join!(action, observe)
        })
        .await;

        match outcome {
            Ok(Ok(((), exchange))) => {
                self.sink.record(Verdict::pass(
                    matcher.to_string(),
                    format!(
                        "exchange #{} {} {} -> {}",
                        exchange.id,
                        exchange.method(),
                        exchange.url(),
                        exchange.response.status
                    ),
                ));
                Ok(exchange)
            }
            Ok(Err(err)) => {
                self.sink.record(Verdict::fail(matcher.to_string(), err.to_string()));
                Err(err)
            }
            Err(_elapsed) => {
                let err = LockstepError::CorrelationTimeout {
                    matcher: matcher.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                    near_misses: near_misses.count,
                    last_near_miss: near_misses.last_body,
                };
                self.sink.record(Verdict::fail(matcher.to_string(), err.to_string()));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::coerce::field_equals;
    use crate::report::SyncReporter;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn data_exchange(method: HttpMethod, body: Value) -> Exchange {
        Exchange::new(method, "http://localhost:8080/api/v1/db/data/noco/p1/Country")
            .with_response_json(&body)
            .unwrap()
    }

    fn save_matcher(value: impl Into<Value>) -> ResponseMatcher {
        ResponseMatcher::new("api/v1/db/data/noco")
            .methods([HttpMethod::Patch, HttpMethod::Post])
            .body("Title == submitted", field_equals("Title", value))
    }

    mod matcher_tests {
        use super::*;

        #[test]
        fn test_evaluate_match() {
            let matcher = save_matcher(42);
            let exchange = data_exchange(HttpMethod::Patch, json!({"Title": "42"}));
            assert_eq!(matcher.evaluate(&exchange), MatchOutcome::Match);
        }

        #[test]
        fn test_evaluate_wrong_method_is_miss() {
            let matcher = save_matcher(42);
            let exchange = data_exchange(HttpMethod::Get, json!({"Title": "42"}));
            assert_eq!(matcher.evaluate(&exchange), MatchOutcome::Miss);
        }

        #[test]
        fn test_evaluate_wrong_url_is_miss() {
            let matcher = save_matcher(42);
            let exchange = Exchange::new(HttpMethod::Post, "http://h/api/v1/db/meta/columns")
                .with_response_json(&json!({"Title": "42"}))
                .unwrap();
            assert_eq!(matcher.evaluate(&exchange), MatchOutcome::Miss);
        }

        #[test]
        fn test_evaluate_body_mismatch_is_near_miss() {
            let matcher = save_matcher(42);
            let exchange = data_exchange(HttpMethod::Post, json!({"Title": "41"}));
            assert_eq!(matcher.evaluate(&exchange), MatchOutcome::NearMiss);
        }

        #[test]
        fn test_evaluate_non_json_body_is_near_miss() {
            let matcher = save_matcher(42);
            let exchange = Exchange::new(HttpMethod::Post, "http://h/api/v1/db/data/noco/x")
                .with_response_body("Bad Gateway");
            assert_eq!(matcher.evaluate(&exchange), MatchOutcome::NearMiss);
        }

        #[test]
        fn test_no_methods_and_no_body_accepts_any() {
            let matcher = ResponseMatcher::new("/views/");
            let exchange = Exchange::new(HttpMethod::Delete, "http://h/api/v1/views/1")
                .with_response_body("not json");
            assert!(matcher.matches(&exchange));
        }

        #[test]
        fn test_regex_pattern() {
            let matcher = ResponseMatcher::with_pattern(
                UrlPattern::regex(r"/api/v1/db/data/noco/\w+/Country$").unwrap(),
            )
            .method(HttpMethod::Post);
            let exchange = Exchange::new(
                HttpMethod::Post,
                "http://localhost:8080/api/v1/db/data/noco/p1/Country",
            );
            assert!(matcher.matches(&exchange));
            assert_eq!(
                matcher.to_string(),
                r"POST //api/v1/db/data/noco/\w+/Country$/"
            );
        }

        #[test]
        fn test_display() {
            let matcher = save_matcher(42);
            assert_eq!(
                matcher.to_string(),
                "POST|PATCH *api/v1/db/data/noco* where Title == submitted"
            );
            assert_eq!(ResponseMatcher::new("/views/").to_string(), "ANY */views/*");
        }

        #[test]
        fn test_debug_omits_closure() {
            let debug = format!("{:?}", save_matcher(1));
            assert!(debug.contains("Title == submitted"));
        }
    }

    mod correlator_tests {
        use super::*;

        #[tokio::test]
        async fn test_resolves_with_matching_exchange() {
            let tap = NetworkTap::new();
            let correlator = Correlator::new(Duration::from_secs(1));
            let triggers = AtomicUsize::new(0);

            let action = async {
                let _ = triggers.fetch_add(1, Ordering::SeqCst);
                let _ = tap.publish(data_exchange(HttpMethod::Get, json!({"list": []})));
                let _ = tap.publish(data_exchange(HttpMethod::Patch, json!({"Title": "42"})));
                Ok(())
            };

            let exchange = correlator
                .correlate(&tap, &save_matcher(42), action)
                .await
                .unwrap();
            assert_eq!(exchange.method(), HttpMethod::Patch);
            assert_eq!(triggers.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_exchange_published_synchronously_by_action_is_seen() {
            // The action completes its exchange before yielding once.
            let tap = NetworkTap::new();
            let correlator = Correlator::new(Duration::from_millis(200));
            let action = async {
                let _ = tap.publish(data_exchange(HttpMethod::Post, json!({"Title": 7})));
                Ok(())
            };
            let result = correlator.correlate(&tap, &save_matcher("7"), action).await;
            assert!(result.is_ok());
        }

        #[tokio::test]
        async fn test_exchange_before_arming_is_ignored() {
            let tap = NetworkTap::new();
            let _ = tap.publish(data_exchange(HttpMethod::Post, json!({"Title": "42"})));

            let correlator = Correlator::new(Duration::from_millis(50));
            let result = correlator
                .correlate(&tap, &save_matcher(42), async { Ok(()) })
                .await;
            assert!(matches!(
                result,
                Err(LockstepError::CorrelationTimeout { .. })
            ));
        }

        #[tokio::test]
        async fn test_first_match_wins() {
            let tap = NetworkTap::new();
            let correlator = Correlator::new(Duration::from_secs(1));
            let action = async {
                for id in [1, 2] {
                    let body = json!({"Title": "42", "Id": id});
                    let _ = tap.publish(data_exchange(HttpMethod::Post, body));
                }
                Ok(())
            };
            let exchange = correlator
                .correlate(&tap, &save_matcher(42), action)
                .await
                .unwrap();
            assert_eq!(exchange.response_json().unwrap()["Id"], 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_timeout_reports_near_misses_and_triggers_once() {
            let tap = NetworkTap::new();
            let reporter = Arc::new(SyncReporter::new());
            let correlator =
                Correlator::new(Duration::from_millis(500)).with_sink(reporter.clone());
            let triggers = AtomicUsize::new(0);

            let action = async {
                let _ = triggers.fetch_add(1, Ordering::SeqCst);
                let _ = tap.publish(data_exchange(HttpMethod::Patch, json!({"Title": "41"})));
                Ok(())
            };

            let err = correlator
                .correlate(&tap, &save_matcher(42), action)
                .await
                .unwrap_err();

            match err {
                LockstepError::CorrelationTimeout {
                    matcher,
                    timeout_ms,
                    near_misses,
                    last_near_miss,
                } => {
                    assert!(matcher.contains("Title == submitted"));
                    assert_eq!(timeout_ms, 500);
                    assert_eq!(near_misses, 1);
                    assert!(last_near_miss.unwrap().contains("41"));
                }
                other => panic!("expected CorrelationTimeout, got {other:?}"),
            }
            assert_eq!(triggers.load(Ordering::SeqCst), 1);
            assert_eq!(reporter.failed_count(), 1);
        }

        #[tokio::test]
        async fn test_action_error_propagates() {
            let tap = NetworkTap::new();
            let correlator = Correlator::new(Duration::from_secs(5));
            let result = correlator
                .correlate(&tap, &save_matcher(1), async {
                    Err(LockstepError::ElementNotFound {
                        selector: ".nc-grid-add-new-cell".into(),
                    })
                })
                .await;
            assert!(matches!(result, Err(LockstepError::ElementNotFound { .. })));
        }

        #[tokio::test]
        async fn test_exchange_arriving_after_action_completes() {
            let tap = NetworkTap::new();
            let correlator = Correlator::new(Duration::from_secs(1));
            let background = tap.clone();
            let action = async move {
                let _ = tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let exchange = data_exchange(HttpMethod::Post, json!({"Title": "x"}));
                    let _ = background.publish(exchange);
                });
                Ok(())
            };
            let exchange = correlator
                .correlate(&tap, &save_matcher("x"), action)
                .await
                .unwrap();
            assert_eq!(exchange.method(), HttpMethod::Post);
        }

        #[tokio::test]
        async fn test_pass_verdict_recorded() {
            let tap = NetworkTap::new();
            let reporter = Arc::new(SyncReporter::new());
            let correlator = Correlator::new(Duration::from_secs(1)).with_sink(reporter.clone());
            let action = async {
                let _ = tap.publish(data_exchange(HttpMethod::Post, json!({"Title": "a"})));
                Ok(())
            };
            let _ = correlator
                .correlate(&tap, &save_matcher("a"), action)
                .await
                .unwrap();
            assert_eq!(reporter.passed_count(), 1);
            assert!(reporter.verdicts()[0].detail.contains("POST"));
        }

        #[test]
        fn test_default_timeout() {
            assert_eq!(
                Correlator::default().timeout(),
                Duration::from_millis(DEFAULT_CORRELATION_TIMEOUT_MS)
            );
        }
    }

    mod near_miss_tests {
        use super::*;

        #[test]
        fn test_body_truncated_on_char_boundary() {
            let mut near = NearMisses::default();
            let long = "é".repeat(NEAR_MISS_BODY_LIMIT);
            near.record(&Exchange::new(HttpMethod::Post, "http://h/").with_response_body(long));
            let body = near.last_body.unwrap();
            assert!(body.ends_with('…'));
            assert!(body.len() <= NEAR_MISS_BODY_LIMIT + '…'.len_utf8());
        }
    }
}
