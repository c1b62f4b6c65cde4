//! Per-test session.
//!
//! A [`Session`] bundles everything one test case owns: the rendered
//! surface, its network observation scope, the clipboard side channel,
//! the verdict sink, and the timing configuration. Page objects receive a
//! session instead of reaching for globals, and nothing in it is shared
//! with other test cases.

use crate::clipboard::{retry_until_non_empty, Clipboard, ClipboardText};
use crate::coerce::Expectation;
use crate::config::SyncConfig;
use crate::correlate::{Correlator, ResponseMatcher};
use crate::network::{Exchange, NetworkTap};
use crate::poll::{PollReport, Poller, RetryBudget};
use crate::report::{AssertionSink, TracingSink};
use crate::result::LockstepResult;
use crate::surface::{ElementState, Selector, Surface};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{info_span, Instrument};
use uuid::Uuid;

/// Unique session identifier, recorded on every span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying uuid
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything one test case synchronizes against
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    surface: Arc<dyn Surface>,
    tap: NetworkTap,
    clipboard: Arc<dyn Clipboard>,
    sink: Arc<dyn AssertionSink>,
    config: SyncConfig,
    correlator: Correlator,
    poller: Poller,
    correlation_guard: tokio::sync::Mutex<()>,
}

impl Session {
    /// Create a session with default config and a tracing-only sink
    #[must_use]
    pub fn new(surface: Arc<dyn Surface>, tap: NetworkTap, clipboard: Arc<dyn Clipboard>) -> Self {
        let config = SyncConfig::default();
        let sink: Arc<dyn AssertionSink> = Arc::new(TracingSink);
        Self {
            id: SessionId::new(),
            correlator: Correlator::new(config.correlation_timeout()).with_sink(Arc::clone(&sink)),
            poller: Poller::new().with_sink(Arc::clone(&sink)),
            surface,
            tap,
            clipboard,
            sink,
            config,
            correlation_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Use `config` for every wait
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.correlator =
            Correlator::new(config.correlation_timeout()).with_sink(Arc::clone(&self.sink));
        self.config = config;
        self
    }

    /// Report verdicts to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AssertionSink>) -> Self {
        self.correlator = self.correlator.with_sink(Arc::clone(&sink));
        self.poller = self.poller.with_sink(Arc::clone(&sink));
        self.sink = sink;
        self
    }

    /// Session identifier
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Rendered surface
    #[must_use]
    pub fn surface(&self) -> &dyn Surface {
        self.surface.as_ref()
    }

    /// Network observation scope
    #[must_use]
    pub const fn tap(&self) -> &NetworkTap {
        &self.tap
    }

    /// Clipboard side channel
    #[must_use]
    pub fn clipboard(&self) -> &dyn Clipboard {
        self.clipboard.as_ref()
    }

    /// Verdict sink
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn AssertionSink> {
        &self.sink
    }

    /// Timing configuration
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Trigger `action` and wait for the exchange it causes.
    ///
    /// Only one correlation runs per session at a time; a second caller
    /// waits for the first to resolve before arming its own observation.
    ///
    /// # Errors
    ///
    /// See [`Correlator::correlate`].
    pub async fn correlate<A>(
        &self,
        matcher: &ResponseMatcher,
        action: A,
    ) -> LockstepResult<Exchange>
    where
        A: Future<Output = LockstepResult<()>>,
    {
        let _guard = self.correlation_guard.lock().await;
        self.correlator
            .correlate(&self.tap, matcher, action)
            .instrument(info_span!("session", id = %self.id))
            .await
    }

    /// Poll `reader` until it satisfies `expected`.
    ///
    /// # Errors
    ///
    /// See [`Poller::poll_until`].
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
        self.poller
            .poll_until(target, reader, expected, budget)
            .instrument(info_span!("session", id = %self.id))
            .await
    }

    /// Re-run `trigger_and_read` until the clipboard is non-empty, up to
    /// the configured attempt count.
    ///
    /// # Errors
    ///
    /// Propagates errors raised by `trigger_and_read`.
    pub async fn copy_until_non_empty<F, Fut>(
        &self,
        trigger_and_read: F,
    ) -> LockstepResult<ClipboardText>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LockstepResult<String>>,
    {
        retry_until_non_empty(trigger_and_read, self.config.clipboard_attempts)
            .instrument(info_span!("clipboard", id = %self.id))
            .await
    }

    /// Wait for `selector` to reach `state` within the element timeout
    ///
    /// # Errors
    ///
    /// [`crate::LockstepError::WaitTimeout`] when the bound expires
    pub async fn wait_for(&self, selector: &Selector, state: ElementState) -> LockstepResult<()> {
        self.surface
            .wait_for(selector, state, self.config.element_timeout())
            .await
    }

    /// Sleep for the configured settle delay
    pub async fn settle(&self) {
        tokio::time::sleep(self.config.settle_delay()).await;
    }
}
