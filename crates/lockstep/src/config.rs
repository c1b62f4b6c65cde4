//! Synchronization Configuration
//!
//! Timeouts and retry budgets for every wait in a session. Loaded from
//! defaults, a YAML file, then environment overrides.
//!
//! ```yaml
//! correlation_timeout_ms: 30000
//! row_count_budget: { max_attempts: 5, base_delay_ms: 100 }
//! pagination_budget: { max_attempts: 5, base_delay_ms: 300 }
//! clipboard_attempts: 5
//! settle_delay_ms: 300
//! element_timeout_ms: 30000
//! ```

use crate::clipboard::DEFAULT_CLIPBOARD_ATTEMPTS;
use crate::correlate::DEFAULT_CORRELATION_TIMEOUT_MS;
use crate::poll::RetryBudget;
use crate::result::{LockstepError, LockstepResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the correlation timeout
pub const ENV_CORRELATION_TIMEOUT_MS: &str = "LOCKSTEP_CORRELATION_TIMEOUT_MS";
/// Environment variable overriding the clipboard attempt count
pub const ENV_CLIPBOARD_ATTEMPTS: &str = "LOCKSTEP_CLIPBOARD_ATTEMPTS";

/// Default pause after an unvalidated save
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 300;

/// Default bound on a single element-state wait
pub const DEFAULT_ELEMENT_TIMEOUT_MS: u64 = 30_000;

/// Longest total backoff a retry budget may sleep (one hour)
pub const MAX_BUDGET_DELAY_MS: u64 = 3_600_000;

/// Timeouts and retry budgets for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Budget for a single correlation
    pub correlation_timeout_ms: u64,
    /// Budget for total-row-count convergence
    pub row_count_budget: RetryBudget,
    /// Budget for pagination text convergence
    pub pagination_budget: RetryBudget,
    /// Trigger-and-read attempts for clipboard copies
    pub clipboard_attempts: u32,
    /// Pause after saving without network validation
    pub settle_delay_ms: u64,
    /// Bound on waiting for an element to reach a state
    pub element_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            correlation_timeout_ms: DEFAULT_CORRELATION_TIMEOUT_MS,
            row_count_budget: RetryBudget::new(5, 100),
            pagination_budget: RetryBudget::new(5, 300),
            clipboard_attempts: DEFAULT_CLIPBOARD_ATTEMPTS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            element_timeout_ms: DEFAULT_ELEMENT_TIMEOUT_MS,
        }
    }
}

impl SyncConfig {
    /// Create config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse YAML; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns error if YAML is malformed or the result fails validation
    pub fn from_yaml_str(yaml: &str) -> LockstepResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_yaml_file(path: impl AsRef<Path>) -> LockstepResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Apply `LOCKSTEP_*` environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if a set variable does not parse
    pub fn with_env_overrides(self) -> LockstepResult<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> LockstepResult<Self> {
        if let Some(raw) = lookup(ENV_CORRELATION_TIMEOUT_MS) {
            self.correlation_timeout_ms = parse_env(ENV_CORRELATION_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CLIPBOARD_ATTEMPTS) {
            self.clipboard_attempts = parse_env(ENV_CLIPBOARD_ATTEMPTS, &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject budgets that would make a wait meaningless
    ///
    /// # Errors
    ///
    /// Returns `Config` error naming the offending field
    pub fn validate(&self) -> LockstepResult<()> {
        if self.correlation_timeout_ms == 0 {
            return Err(LockstepError::Config {
                message: "correlation_timeout_ms must be greater than zero".to_string(),
            });
        }
        if self.element_timeout_ms == 0 {
            return Err(LockstepError::Config {
                message: "element_timeout_ms must be greater than zero".to_string(),
            });
        }
        if self.clipboard_attempts == 0 {
            return Err(LockstepError::Config {
                message: "clipboard_attempts must be greater than zero".to_string(),
            });
        }
        check_budget("row_count_budget", self.row_count_budget)?;
        check_budget("pagination_budget", self.pagination_budget)
    }

    /// Correlation timeout as Duration
    #[must_use]
    pub const fn correlation_timeout(&self) -> Duration {
        Duration::from_millis(self.correlation_timeout_ms)
    }

    /// Settle delay as Duration
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Element wait bound as Duration
    #[must_use]
    pub const fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    /// Set element wait bound
    #[must_use]
    pub const fn with_element_timeout_ms(mut self, ms: u64) -> Self {
        self.element_timeout_ms = ms;
        self
    }

    /// Set correlation timeout
    #[must_use]
    pub const fn with_correlation_timeout_ms(mut self, ms: u64) -> Self {
        self.correlation_timeout_ms = ms;
        self
    }

    /// Set row-count budget
    #[must_use]
    pub const fn with_row_count_budget(mut self, budget: RetryBudget) -> Self {
        self.row_count_budget = budget;
        self
    }

    /// Set pagination budget
    #[must_use]
    pub const fn with_pagination_budget(mut self, budget: RetryBudget) -> Self {
        self.pagination_budget = budget;
        self
    }

    /// Set clipboard attempts
    #[must_use]
    pub const fn with_clipboard_attempts(mut self, attempts: u32) -> Self {
        self.clipboard_attempts = attempts;
        self
    }

    /// Set settle delay
    #[must_use]
    pub const fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }
}

fn check_budget(name: &str, budget: RetryBudget) -> LockstepResult<()> {
    let total = budget.total_delay();
    if total > Duration::from_millis(MAX_BUDGET_DELAY_MS) {
        return Err(LockstepError::Config {
            message: format!(
                "{name} sleeps {}ms in total, more than {MAX_BUDGET_DELAY_MS}ms",
                total.as_millis()
            ),
        });
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> LockstepResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| LockstepError::Config {
        message: format!("{key}={raw:?}: {e}"),
    })
}
