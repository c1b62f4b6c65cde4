//! Verdict reporting for synchronization primitives.
//!
//! Every correlation and poll reports exactly one [`Verdict`] to the
//! session's [`AssertionSink`] before returning. Failures carry the
//! predicate that was never satisfied and the last observed value.

use crate::result::{LockstepError, LockstepResult};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};

/// Final outcome of one correlation or poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// What was synchronized on (matcher or poll target description)
    pub subject: String,
    /// Whether the wait resolved
    pub passed: bool,
    /// Resolution detail, or the expected/observed diff on failure
    pub detail: String,
}

impl Verdict {
    /// Create a passing verdict
    #[must_use]
    pub fn pass(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            passed: true,
            detail: detail.into(),
        }
    }

    /// Create a failing verdict
    #[must_use]
    pub fn fail(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            passed: false,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "[{status}] {}: {}", self.subject, self.detail)
    }
}

/// Receives final pass/fail verdicts
pub trait AssertionSink: std::fmt::Debug + Send + Sync {
    /// Record one verdict
    fn record(&self, verdict: Verdict);
}

/// Sink that only logs verdicts
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AssertionSink for TracingSink {
    fn record(&self, verdict: Verdict) {
        if verdict.passed {
            info!(subject = %verdict.subject, detail = %verdict.detail, "sync resolved");
        } else {
            warn!(subject = %verdict.subject, detail = %verdict.detail, "sync failed");
        }
    }
}

/// Sink that logs and keeps every verdict for end-of-test inspection
#[derive(Debug, Default)]
pub struct SyncReporter {
    verdicts: Mutex<Vec<Verdict>>,
}

impl SyncReporter {
    /// Create an empty reporter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded verdicts in order
    #[must_use]
    pub fn verdicts(&self) -> Vec<Verdict> {
        self.verdicts.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Number of passing verdicts
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.verdicts().iter().filter(|v| v.passed).count()
    }

    /// Number of failing verdicts
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.verdicts().iter().filter(|v| !v.passed).count()
    }

    /// Failing verdicts
    #[must_use]
    pub fn failures(&self) -> Vec<Verdict> {
        self.verdicts().into_iter().filter(|v| !v.passed).collect()
    }

    /// Summary line
    #[must_use]
    pub fn summary(&self) -> String {
        let total = self.verdicts().len();
        format!(
            "sync: {}/{} resolved, {} failed",
            self.passed_count(),
            total,
            self.failed_count()
        )
    }

    /// Fail if any verdict failed
    pub fn assert_all_passed(&self) -> LockstepResult<()> {
        let failures = self.failures();
        if failures.is_empty() {
            return Ok(());
        }
        let lines: Vec<String> = failures.iter().map(ToString::to_string).collect();
        Err(LockstepError::AssertionFailed {
            message: lines.join("\n"),
        })
    }
}

impl AssertionSink for SyncReporter {
    fn record(&self, verdict: Verdict) {
        TracingSink.record(verdict.clone());
        if let Ok(mut verdicts) = self.verdicts.lock() {
            verdicts.push(verdict);
        }
    }
}
