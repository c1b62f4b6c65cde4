//! Lockstep: action/response synchronization for end-to-end UI tests
//!
//! Clicking a button and asserting right away is flaky against a live,
//! asynchronous backend. Lockstep ties each simulated user action to the
//! outcome it causes and waits for exactly that outcome, within a bound.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    LOCKSTEP Architecture                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌─────────────────┐    ┌────────────┐       │
//! │   │ Page       │    │ Correlator      │◄───│ NetworkTap │       │
//! │   │ Objects    │───►│ Poller          │◄───│ Surface    │       │
//! │   │ (Grid...)  │    │ Clipboard retry │◄───│ Clipboard  │       │
//! │   └────────────┘    └────────┬────────┘    └────────────┘       │
//! │                              ▼                                   │
//! │                       AssertionSink                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`Correlator`] arms network observation, runs the action, and resolves
//!   with the first exchange that satisfies a [`ResponseMatcher`].
//! - [`Poller`] re-reads rendered state with linear backoff until it matches
//!   an [`Expectation`].
//! - [`retry_until_non_empty`] re-triggers a copy until the clipboard fills.

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

pub mod clipboard;
pub mod coerce;
pub mod config;
pub mod correlate;
pub mod logging;
pub mod mock;
pub mod network;
pub mod pages;
pub mod poll;
pub mod report;
mod result;
pub mod session;
pub mod surface;

pub use clipboard::{retry_until_non_empty, Clipboard, ClipboardText, Platform};
pub use coerce::{field_equals, field_truthy, js_string, js_truthy, leading_int, Expectation};
pub use config::SyncConfig;
pub use correlate::{BodyPredicate, Correlator, MatchOutcome, ResponseMatcher};
pub use logging::{init_json_logging, init_logging};
pub use mock::{MockClipboard, MockSurface};
pub use network::{
    Exchange, ExchangeStream, HttpMethod, NetworkTap, RequestRecord, ResponseRecord, UrlPattern,
};
pub use pages::{
    AddRowOptions, CellRef, DashboardPage, EditRowOptions, GridPage, PageObject, PaginationTarget,
};
pub use poll::{Observation, PollReport, Poller, RetryBudget};
pub use report::{AssertionSink, SyncReporter, TracingSink, Verdict};
pub use result::{LockstepError, LockstepResult};
pub use session::{Session, SessionId};
pub use surface::{ElementHandle, ElementState, Gesture, Selector, Surface};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::clipboard::*;
    pub use super::coerce::*;
    pub use super::config::*;
    pub use super::correlate::*;
    pub use super::network::*;
    pub use super::pages::*;
    pub use super::poll::*;
    pub use super::report::*;
    pub use super::result::*;
    pub use super::session::*;
    pub use super::surface::*;
}
