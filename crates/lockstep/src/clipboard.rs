//! Clipboard retry loop.
//!
//! The OS clipboard lags the copy gesture and sometimes never populates
//! unless the gesture is repeated. Each attempt therefore re-runs the whole
//! trigger-and-read sequence, unlike [`crate::poll`] where only the reader
//! is re-invoked.
//!
//! An empty clipboard after every attempt is returned as-is. Callers decide
//! whether that is acceptable via [`ClipboardText::is_empty`].

use crate::result::LockstepResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, warn};

/// Default number of trigger-and-read attempts
pub const DEFAULT_CLIPBOARD_ATTEMPTS: u32 = 5;

/// Host platform, used to pick the copy key chord
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    /// macOS (Meta modifier)
    MacOs,
    /// Linux, Windows and everything else (Control modifier)
    Other,
}

impl Platform {
    /// Platform of the current process
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Other
        }
    }

    /// Key chord that copies the current selection
    #[must_use]
    pub const fn copy_chord(self) -> &'static str {
        match self {
            Self::MacOs => "Meta+C",
            Self::Other => "Control+C",
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

/// Text read from the clipboard, possibly empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardText {
    text: String,
    attempts: u32,
}

impl ClipboardText {
    /// Wrap a read value
    #[must_use]
    pub fn new(text: impl Into<String>, attempts: u32) -> Self {
        Self {
            text: text.into(),
            attempts,
        }
    }

    /// Clipboard contents
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consume into the contents
    #[must_use]
    pub fn into_string(self) -> String {
        self.text
    }

    /// Whether every attempt read an empty clipboard
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Trigger-and-read attempts performed
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl std::fmt::Display for ClipboardText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq<&str> for ClipboardText {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

/// Side-channel read access to the OS clipboard
#[async_trait]
pub trait Clipboard: std::fmt::Debug + Send + Sync {
    /// Current textual clipboard contents
    async fn read_text(&self) -> LockstepResult<String>;
}

/// Run `trigger_and_read` until it yields non-empty text, at most
/// `max_attempts` times.
///
/// # Errors
///
/// Propagates the first error raised by `trigger_and_read`. Exhausting the
/// attempts with an empty clipboard is not an error.
pub async fn retry_until_non_empty<F, Fut>(
    mut trigger_and_read: F,
    max_attempts: u32,
) -> LockstepResult<ClipboardText>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LockstepResult<String>>,
{
    let mut text = String::new();
    let mut attempts = 0;
    while attempts < max_attempts {
        attempts += 1;
        text = trigger_and_read().await?;
        if !text.is_empty() {
            debug!(attempts, "clipboard populated");
            return Ok(ClipboardText::new(text, attempts));
        }
        debug!(attempt = attempts, "clipboard empty");
    }
    warn!(attempts, "clipboard still empty");
    Ok(ClipboardText::new(text, attempts))
}
