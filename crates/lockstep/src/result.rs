//! Result and error types for Lockstep.

use thiserror::Error;

/// Result type for Lockstep operations
pub type LockstepResult<T> = Result<T, LockstepError>;

/// Errors that can occur while synchronizing a test with the system under test
#[derive(Debug, Error)]
pub enum LockstepError {
    /// No exchange satisfied the matcher before the correlation budget ran out
    #[error(
        "No exchange matching {matcher} within {timeout_ms}ms ({near_misses} near misses{})",
        near_miss_suffix(.last_near_miss)
    )]
    CorrelationTimeout {
        /// Human-readable description of the matcher
        matcher: String,
        /// Correlation budget in milliseconds
        timeout_ms: u64,
        /// Exchanges that matched URL and method but failed the body predicate
        near_misses: usize,
        /// Response body of the last near miss
        last_near_miss: Option<String>,
    },

    /// Poll target never reached its expected value
    #[error("{target}: expected {expected}, last observed {last_observed} after {reads} reads")]
    PollExhausted {
        /// What was being polled
        target: String,
        /// Expected value
        expected: String,
        /// Last observed value (or read failure)
        last_observed: String,
        /// Total number of reads performed
        reads: u32,
    },

    /// A reader failed during a poll attempt (element not present yet, page in transition)
    #[error("Transient read failure: {message}")]
    TransientRead {
        /// Error message
        message: String,
    },

    /// Element lookup failed
    #[error("Element not found: {selector}")]
    ElementNotFound {
        /// Selector that matched nothing
        selector: String,
    },

    /// Element never reached the awaited state
    #[error("Timed out after {timeout_ms}ms waiting for {selector} to be {state}")]
    WaitTimeout {
        /// Selector being waited on
        selector: String,
        /// Awaited state
        state: String,
        /// Wait budget in milliseconds
        timeout_ms: u64,
    },

    /// Simulated user action failed
    #[error("{gesture} on {selector} failed: {message}")]
    ActionFailed {
        /// Gesture that was attempted
        gesture: String,
        /// Target selector
        selector: String,
        /// Error message
        message: String,
    },

    /// An exchange stream outlived every handle to its network tap
    #[error("Network observation scope closed")]
    TransportClosed,

    /// Assertion failed
    #[error("Assertion failed: {message}")]
    AssertionFailed {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

fn near_miss_suffix(body: &Option<String>) -> String {
    body.as_ref()
        .map(|body| format!(", last near-miss body: {body}"))
        .unwrap_or_default()
}

impl LockstepError {
    /// Build a transient read failure
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientRead {
            message: message.into(),
        }
    }

    /// Whether the poller may absorb this error and keep retrying
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientRead { .. } | Self::ElementNotFound { .. } | Self::WaitTimeout { .. }
        )
    }
}
