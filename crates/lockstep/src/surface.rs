//! Rendered Surface - Abstract Interaction Trait
//!
//! The simulated browser session the harness drives. Page objects only talk
//! to it through [`Surface`], so the same page object runs against a real
//! browser provider or [`crate::mock::MockSurface`].
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  Surface (Abstract Trait)                                      │
//! ├───────────────────────────────────────────────────────────────┤
//! │  find / count        element lookup by Selector                │
//! │  act                 Gesture on an ElementHandle               │
//! │  read_text           rendered text (poller readers)            │
//! │  wait_for            bounded element-state wait                │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Toyota Principles Applied
//!
//! - **Genchi Genbutsu**: Readers observe what is actually rendered
//! - **Poka-Yoke**: Selectors are typed, not ad-hoc strings

use crate::clipboard::Platform;
use crate::result::LockstepResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Element selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// CSS selector (e.g., ".nc-grid-row")
    Css(String),
    /// Test ID selector (data-testid attribute)
    TestId(String),
    /// Text content selector
    Text(String),
    /// CSS selector filtered by contained text
    CssWithText {
        /// Base CSS selector
        css: String,
        /// Text content to match
        text: String,
    },
    /// The `index`-th match of `base`; negative counts from the end
    Nth {
        /// Selector being indexed
        base: Box<Selector>,
        /// Zero-based index, -1 for last
        index: i32,
    },
    /// `child` searched inside `parent`
    Within {
        /// Scope
        parent: Box<Selector>,
        /// Selector resolved inside the scope
        child: Box<Selector>,
    },
}

impl Selector {
    /// Create a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create a test ID selector
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    /// Create a text selector
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a CSS selector filtered by text
    #[must_use]
    pub fn css_with_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Self::CssWithText {
            css: css.into(),
            text: text.into(),
        }
    }

    /// Select the `index`-th match
    #[must_use]
    pub fn nth(self, index: i32) -> Self {
        Self::Nth {
            base: Box::new(self),
            index,
        }
    }

    /// Select the first match
    #[must_use]
    pub fn first(self) -> Self {
        self.nth(0)
    }

    /// Select the last match
    #[must_use]
    pub fn last(self) -> Self {
        self.nth(-1)
    }

    /// Resolve `child` inside this selector
    #[must_use]
    pub fn locate(self, child: Self) -> Self {
        Self::Within {
            parent: Box::new(self),
            child: Box::new(child),
        }
    }
}

/// Renders in the chained `>>` selector syntax browser providers accept
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => f.write_str(s),
            Self::TestId(id) => write!(f, "[data-testid=\"{id}\"]"),
            Self::Text(t) => write!(f, "text={t}"),
            Self::CssWithText { css, text } => write!(f, "{css}:has-text({text:?})"),
            Self::Nth { base, index } => write!(f, "{base} >> nth={index}"),
            Self::Within { parent, child } => write!(f, "{parent} >> {child}"),
        }
    }
}

/// Resolved element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Provider-assigned identifier
    pub id: String,
    /// Selector the element was resolved from
    pub selector: Selector,
}

impl ElementHandle {
    /// Create a handle whose id is the rendered selector
    #[must_use]
    pub fn new(selector: Selector) -> Self {
        Self {
            id: selector.to_string(),
            selector,
        }
    }
}

/// Simulated user gesture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gesture {
    /// Left click
    Click,
    /// Right click (context menu)
    RightClick,
    /// Double click (enter edit mode)
    DoubleClick,
    /// Move the pointer over the element
    Hover,
    /// Replace the element's input value
    Fill(String),
    /// Press a key chord with the element focused
    Press(String),
    /// Tick a checkbox
    Check,
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Click => f.write_str("click"),
            Self::RightClick => f.write_str("right-click"),
            Self::DoubleClick => f.write_str("double-click"),
            Self::Hover => f.write_str("hover"),
            Self::Fill(_) => f.write_str("fill"),
            Self::Press(chord) => write!(f, "press {chord}"),
            Self::Check => f.write_str("check"),
        }
    }
}

/// Element state to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementState {
    /// Present in the DOM
    Attached,
    /// Absent from the DOM
    Detached,
    /// Present and visible
    Visible,
    /// Absent or not visible
    Hidden,
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Attached => "attached",
            Self::Detached => "detached",
            Self::Visible => "visible",
            Self::Hidden => "hidden",
        })
    }
}

/// Simulated browser session
///
/// Implementations:
/// - browser providers (outside this crate)
/// - [`crate::mock::MockSurface`] for tests
#[async_trait]
pub trait Surface: fmt::Debug + Send + Sync {
    /// Resolve a selector to one element
    ///
    /// # Errors
    ///
    /// [`crate::LockstepError::ElementNotFound`] if nothing matches
    async fn find(&self, selector: &Selector) -> LockstepResult<ElementHandle>;

    /// Number of elements matching a selector
    async fn count(&self, selector: &Selector) -> LockstepResult<usize>;

    /// Perform a gesture on an element
    async fn act(&self, element: &ElementHandle, gesture: Gesture) -> LockstepResult<()>;

    /// Rendered inner text of an element
    async fn read_text(&self, element: &ElementHandle) -> LockstepResult<String>;

    /// Attribute value, `None` if unset
    async fn attribute(&self, element: &ElementHandle, name: &str)
        -> LockstepResult<Option<String>>;

    /// Wait until the selector reaches `state`, at most `timeout`
    ///
    /// # Errors
    ///
    /// [`crate::LockstepError::WaitTimeout`] when the bound expires
    async fn wait_for(
        &self,
        selector: &Selector,
        state: ElementState,
        timeout: Duration,
    ) -> LockstepResult<()>;

    /// Host platform of the session
    fn platform(&self) -> Platform;

    /// Find then act
    async fn perform(&self, selector: &Selector, gesture: Gesture) -> LockstepResult<()> {
        let element = self.find(selector).await?;
        self.act(&element, gesture).await
    }

    /// Find then read text
    async fn text_of(&self, selector: &Selector) -> LockstepResult<String> {
        let element = self.find(selector).await?;
        self.read_text(&element).await
    }
}
