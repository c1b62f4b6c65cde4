//! Network Observation
//!
//! Per-session observation scope for request/response exchanges.
//!
//! The session provider's transport hook calls [`NetworkTap::publish`] for every
//! completed exchange. Waiters call [`NetworkTap::subscribe`] to arm an
//! [`ExchangeStream`]: a stream only sees exchanges published *after* it was armed.
//!
//! ## Toyota Way Application
//!
//! - **Poka-Yoke**: Typed methods and URL patterns instead of raw strings
//! - **Genchi Genbutsu**: Every exchange is kept in a bounded history for post-mortems

use crate::result::{LockstepError, LockstepResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Broadcast capacity per tap; slow subscribers beyond this lag and skip exchanges
pub const DEFAULT_TAP_CAPACITY: usize = 256;

/// Number of exchanges kept in the tap history
pub const DEFAULT_HISTORY_LIMIT: usize = 512;

// =============================================================================
// HTTP METHOD
// =============================================================================

/// HTTP methods for request matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HttpMethod {
    /// GET request
    Get,
    /// POST request
    Post,
    /// PUT request
    Put,
    /// PATCH request
    Patch,
    /// DELETE request
    Delete,
    /// HEAD request
    Head,
    /// OPTIONS request
    Options,
}

impl HttpMethod {
    /// Parse from string (case-insensitive)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            "HEAD" => Some(Self::Head),
            "OPTIONS" => Some(Self::Options),
            _ => None,
        }
    }

    /// Convert to string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// URL PATTERN
// =============================================================================

/// Pattern for matching request URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UrlPattern {
    /// Contains substring
    Contains(String),
    /// Exact URL match
    Exact(String),
    /// Prefix match
    Prefix(String),
    /// Glob pattern (e.g., "**/api/v1/db/data/*")
    Glob(String),
    /// Regex match
    Regex(UrlRegex),
}

impl UrlPattern {
    /// Substring pattern, the common case for API path fragments
    #[must_use]
    pub fn contains(fragment: impl Into<String>) -> Self {
        Self::Contains(fragment.into())
    }

    /// Regex pattern, compiled up front
    ///
    /// # Errors
    ///
    /// Returns `Config` if `pattern` is not a valid regex
    pub fn regex(pattern: &str) -> LockstepResult<Self> {
        UrlRegex::new(pattern).map(Self::Regex)
    }

    /// Check if a URL matches this pattern
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Contains(pattern) => url.contains(pattern.as_str()),
            Self::Exact(pattern) => url == pattern,
            Self::Prefix(pattern) => url.starts_with(pattern.as_str()),
            Self::Glob(pattern) => glob_matches(pattern, url),
            Self::Regex(re) => re.is_match(url),
        }
    }
}

impl std::fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contains(s) => write!(f, "*{s}*"),
            Self::Exact(s) | Self::Glob(s) => f.write_str(s),
            Self::Prefix(s) => write!(f, "{s}*"),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// Compiled URL regex; serializes as its source text
#[derive(Debug, Clone)]
pub struct UrlRegex(regex::Regex);

impl UrlRegex {
    /// Compile `pattern`
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the pattern if it does not compile
    pub fn new(pattern: &str) -> LockstepResult<Self> {
        regex::Regex::new(pattern)
            .map(Self)
            .map_err(|e| LockstepError::Config {
                message: format!("invalid URL regex {pattern:?}: {e}"),
            })
    }

    /// Source text
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Whether `url` matches
    #[must_use]
    pub fn is_match(&self, url: &str) -> bool {
        self.0.is_match(url)
    }
}

impl Serialize for UrlRegex {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UrlRegex {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Self::new(&pattern).map_err(serde::de::Error::custom)
    }
}

/// `*` matches any run of characters. The first segment is anchored at the
/// start, the last at the end, and the middle ones are taken leftmost.
fn glob_matches(pattern: &str, url: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, last) = match parts.as_slice() {
        [only] => return *only == url,
        [first, .., last] => (*first, *last),
        [] => return url.is_empty(),
    };

    let Some(rest) = url.strip_prefix(first) else {
        return false;
    };
    let Some(mut middle) = rest.strip_suffix(last) else {
        return false;
    };
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match middle.find(part) {
            Some(found) => middle = &middle[found + part.len()..],
            None => return false,
        }
    }
    true
}

// =============================================================================
// EXCHANGE
// =============================================================================

/// Outgoing half of an exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Request URL
    pub url: String,
    /// HTTP method
    pub method: HttpMethod,
    /// Request body
    pub body: Option<Vec<u8>>,
}

/// Incoming half of an exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

/// One observed request/response pair on a session's network scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    /// Sequence number assigned by the tap (0 until published)
    pub id: u64,
    /// Request
    pub request: RequestRecord,
    /// Response
    pub response: ResponseRecord,
}

impl Exchange {
    /// Create an exchange with an empty request body and a 200 response
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            id: 0,
            request: RequestRecord {
                url: url.into(),
                method,
                body: None,
            },
            response: ResponseRecord {
                status: 200,
                body: Vec::new(),
            },
        }
    }

    /// Set the request body
    #[must_use]
    pub fn with_request_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    /// Set the response status
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.response.status = status;
        self
    }

    /// Set the response body
    #[must_use]
    pub fn with_response_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.response.body = body.into();
        self
    }

    /// Set a JSON response body
    pub fn with_response_json<T: Serialize>(mut self, data: &T) -> LockstepResult<Self> {
        self.response.body = serde_json::to_vec(data)?;
        Ok(self)
    }

    /// Request URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.request.url
    }

    /// Request method
    #[must_use]
    pub const fn method(&self) -> HttpMethod {
        self.request.method
    }

    /// Decode the response body as JSON; `None` when the body is not JSON
    #[must_use]
    pub fn response_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.response.body).ok()
    }

    /// Response body as lossy UTF-8
    #[must_use]
    pub fn response_text(&self) -> String {
        String::from_utf8_lossy(&self.response.body).into_owned()
    }
}

// =============================================================================
// TAP
// =============================================================================

/// Network observation scope owned by one test session
///
/// Cloning a tap yields another handle to the same scope.
#[derive(Debug, Clone)]
pub struct NetworkTap {
    sender: broadcast::Sender<Exchange>,
    history: Arc<Mutex<VecDeque<Exchange>>>,
    next_id: Arc<AtomicU64>,
    history_limit: usize,
}

impl Default for NetworkTap {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkTap {
    /// Create a tap with default capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TAP_CAPACITY, DEFAULT_HISTORY_LIMIT)
    }

    /// Create a tap with explicit broadcast capacity and history limit
    #[must_use]
    pub fn with_capacity(capacity: usize, history_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            history: Arc::new(Mutex::new(VecDeque::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            history_limit,
        }
    }

    /// Arm a new observation stream. Only exchanges published after this call are seen.
    #[must_use]
    pub fn subscribe(&self) -> ExchangeStream {
        ExchangeStream {
            receiver: self.sender.subscribe(),
        }
    }

    /// Publish a completed exchange to every armed stream; returns its assigned id
    pub fn publish(&self, mut exchange: Exchange) -> u64 {
        exchange.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = exchange.id;
        debug!(
            id,
            method = %exchange.method(),
            url = exchange.url(),
            status = exchange.response.status,
            "exchange observed"
        );

        if let Ok(mut history) = self.history.lock() {
            if history.len() == self.history_limit {
                let _ = history.pop_front();
            }
            if self.history_limit > 0 {
                history.push_back(exchange.clone());
            }
        }

        // No armed stream is fine; the exchange still lands in history.
        let _ = self.sender.send(exchange);
        id
    }

    /// Number of currently armed streams
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// All exchanges still in history, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<Exchange> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Exchanges in history whose URL matches a pattern
    #[must_use]
    pub fn requests_matching(&self, pattern: &UrlPattern) -> Vec<Exchange> {
        self.history()
            .into_iter()
            .filter(|e| pattern.matches(e.url()))
            .collect()
    }

    /// Assert that at least one exchange in history matches a pattern
    pub fn assert_requested(&self, pattern: &UrlPattern) -> LockstepResult<()> {
        if self.requests_matching(pattern).is_empty() {
            return Err(LockstepError::AssertionFailed {
                message: format!("Expected request matching {pattern}, but none found"),
            });
        }
        Ok(())
    }

    /// Assert that no exchange in history matches a pattern
    pub fn assert_not_requested(&self, pattern: &UrlPattern) -> LockstepResult<()> {
        let found = self.requests_matching(pattern).len();
        if found > 0 {
            return Err(LockstepError::AssertionFailed {
                message: format!("Expected no requests matching {pattern}, but found {found}"),
            });
        }
        Ok(())
    }

    /// Clear history
    pub fn clear_history(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }
}

/// An armed subscription to a [`NetworkTap`]
#[derive(Debug)]
pub struct ExchangeStream {
    receiver: broadcast::Receiver<Exchange>,
}

impl ExchangeStream {
    /// Wait for the next exchange
    ///
    /// Returns `TransportClosed` once every handle to the tap has been
    /// dropped and the buffer is drained. Exchanges skipped because this stream lagged behind the broadcast buffer
    /// are logged and dropped; the stream resumes with the oldest retained one.
    pub async fn next(&mut self) -> LockstepResult<Exchange> {
        loop {
            match self.receiver.recv().await {
                Ok(exchange) => return Ok(exchange),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "exchange stream lagged; exchanges dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(LockstepError::TransportClosed)
                }
            }
        }
    }
}
