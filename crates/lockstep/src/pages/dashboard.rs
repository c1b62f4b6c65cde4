use super::PageObject;
use crate::result::LockstepResult;
use crate::session::Session;
use crate::surface::{ElementState, Selector};

/// Toast shown after a successful copy
pub const COPIED_TOAST: &str = "Copied to clipboard";

/// The dashboard shell around every view
#[derive(Debug, Clone, Copy)]
pub struct DashboardPage<'a> {
    session: &'a Session,
}

impl<'a> DashboardPage<'a> {
    /// Bind to a session
    #[must_use]
    pub const fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Owning session
    #[must_use]
    pub const fn session(&self) -> &'a Session {
        self.session
    }

    /// Global loading indicator
    #[must_use]
    pub fn loader() -> Selector {
        Selector::test_id("nc-loading")
    }

    /// Toast notification carrying `message`
    #[must_use]
    pub fn toast(message: &str) -> Selector {
        Selector::css_with_text(".ant-message .ant-message-notice-content", message)
    }

    /// Wait until the loading indicator is hidden
    ///
    /// # Errors
    ///
    /// `WaitTimeout` if it stays visible past the element timeout
    pub async fn wait_for_loader_to_disappear(&self) -> LockstepResult<()> {
        self.session
            .wait_for(&Self::loader(), ElementState::Hidden)
            .await
    }

    /// Wait until a toast with `message` is visible
    ///
    /// # Errors
    ///
    /// `WaitTimeout` if no such toast appears
    pub async fn verify_toast(&self, message: &str) -> LockstepResult<()> {
        self.session
            .wait_for(&Self::toast(message).last(), ElementState::Visible)
            .await
    }
}

impl PageObject for DashboardPage<'_> {
    fn root(&self) -> Selector {
        Selector::css(".nc-dashboard")
    }

    fn page_name(&self) -> &str {
        "dashboard"
    }
}
