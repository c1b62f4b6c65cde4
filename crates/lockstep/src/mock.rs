//! Scripted in-memory collaborators for tests.
//!
//! [`MockSurface`] keeps a table of elements keyed by rendered selector,
//! records every call, and runs registered hooks after gestures so a test
//! can make a click publish a network exchange or change a row count the
//! way the real application would.

use crate::clipboard::{Clipboard, Platform};
use crate::result::{LockstepError, LockstepResult};
use crate::surface::{ElementHandle, ElementState, Gesture, Selector, Surface};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Hook run after a matching gesture
pub type GestureHook = Arc<dyn Fn(&MockSurface) + Send + Sync>;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One scripted element
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    /// Successive texts; the last one sticks
    pub texts: VecDeque<String>,
    /// Whether the element is visible
    pub visible: bool,
    /// Attributes
    pub attributes: HashMap<String, String>,
    /// Last filled value
    pub value: Option<String>,
}

impl MockElement {
    fn shown(text: impl Into<String>) -> Self {
        Self {
            texts: VecDeque::from([text.into()]),
            visible: true,
            ..Self::default()
        }
    }

    fn next_text(&mut self) -> String {
        if self.texts.len() > 1 {
            self.texts.pop_front().unwrap_or_default()
        } else {
            self.texts.front().cloned().unwrap_or_default()
        }
    }
}

#[derive(Default)]
struct MockState {
    elements: HashMap<String, MockElement>,
    counts: HashMap<String, usize>,
    hooks: Vec<(String, String, GestureHook)>,
    call_history: Vec<String>,
}

/// Mock surface for unit and integration testing
pub struct MockSurface {
    state: Mutex<MockState>,
    platform: Platform,
}

impl std::fmt::Debug for MockSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockSurface")
            .field("elements", &state.elements)
            .field("counts", &state.counts)
            .field("hooks", &state.hooks.len())
            .field("platform", &self.platform)
            .finish()
    }
}

impl Default for MockSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSurface {
    /// Create an empty mock surface on the host platform
    #[must_use]
    pub fn new() -> Self {
        Self::with_platform(Platform::current())
    }

    /// Create an empty mock surface reporting `platform`
    #[must_use]
    pub fn with_platform(platform: Platform) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            platform,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Add a visible element with text
    pub fn add_element(&self, selector: &Selector, text: impl Into<String>) {
        let _ = self
            .lock()
            .elements
            .insert(selector.to_string(), MockElement::shown(text));
    }

    /// Add an attached but invisible element
    pub fn add_hidden_element(&self, selector: &Selector) {
        let _ = self
            .lock()
            .elements
            .insert(selector.to_string(), MockElement::default());
    }

    /// Remove an element
    pub fn remove_element(&self, selector: &Selector) {
        let _ = self.lock().elements.remove(&selector.to_string());
    }

    /// Toggle visibility
    pub fn set_visible(&self, selector: &Selector, visible: bool) {
        if let Some(element) = self.lock().elements.get_mut(&selector.to_string()) {
            element.visible = visible;
        }
    }

    /// Replace an element's text
    pub fn set_text(&self, selector: &Selector, text: impl Into<String>) {
        self.script_texts(selector, [text.into()]);
    }

    /// Make successive reads return `texts` in order; the last one sticks
    pub fn script_texts(&self, selector: &Selector, texts: impl IntoIterator<Item = String>) {
        let mut state = self.lock();
        let element = state
            .elements
            .entry(selector.to_string())
            .or_insert_with(|| MockElement::shown(""));
        element.texts = texts.into_iter().collect();
    }

    /// Set an attribute
    pub fn set_attribute(&self, selector: &Selector, name: &str, value: impl Into<String>) {
        let mut state = self.lock();
        let element = state
            .elements
            .entry(selector.to_string())
            .or_insert_with(|| MockElement::shown(""));
        let _ = element.attributes.insert(name.to_string(), value.into());
    }

    /// Set how many elements match a selector
    pub fn set_count(&self, selector: &Selector, count: usize) {
        let _ = self.lock().counts.insert(selector.to_string(), count);
    }

    /// Current scripted count
    #[must_use]
    pub fn count_of(&self, selector: &Selector) -> usize {
        Self::count_in(&self.lock(), &selector.to_string())
    }

    fn count_in(state: &MockState, key: &str) -> usize {
        state
            .counts
            .get(key)
            .copied()
            .unwrap_or_else(|| usize::from(state.elements.contains_key(key)))
    }

    /// Run `hook` after every `gesture` on `selector`
    pub fn on<F>(&self, selector: &Selector, gesture: &Gesture, hook: F)
    where
        F: Fn(&Self) + Send + Sync + 'static,
    {
        let hook: GestureHook = Arc::new(hook);
        self.lock()
            .hooks
            .push((selector.to_string(), gesture.to_string(), hook));
    }

    /// Last value filled into an element
    #[must_use]
    pub fn value_of(&self, selector: &Selector) -> Option<String> {
        self.lock()
            .elements
            .get(&selector.to_string())
            .and_then(|e| e.value.clone())
    }

    /// Get call history
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().call_history.clone()
    }

    /// Check if a call with this prefix was made
    #[must_use]
    pub fn was_called(&self, prefix: &str) -> bool {
        self.lock().call_history.iter().any(|c| c.starts_with(prefix))
    }

    /// Number of calls exactly equal to `call`
    #[must_use]
    pub fn call_count(&self, call: &str) -> usize {
        self.lock().call_history.iter().filter(|c| *c == call).count()
    }

    fn state_reached(&self, key: &str, state: ElementState) -> bool {
        let guard = self.lock();
        let element = guard.elements.get(key);
        let attached = element.is_some() || guard.counts.get(key).is_some_and(|n| *n > 0);
        let visible = element.is_some_and(|e| e.visible);
        match state {
            ElementState::Attached => attached,
            ElementState::Detached => !attached,
            ElementState::Visible => visible,
            ElementState::Hidden => !visible,
        }
    }
}

#[async_trait]
impl Surface for MockSurface {
    async fn find(&self, selector: &Selector) -> LockstepResult<ElementHandle> {
        let key = selector.to_string();
        let mut state = self.lock();
        state.call_history.push(format!("find:{key}"));
        if state.elements.contains_key(&key) || Self::count_in(&state, &key) > 0 {
            Ok(ElementHandle::new(selector.clone()))
        } else {
            Err(LockstepError::ElementNotFound { selector: key })
        }
    }

    async fn count(&self, selector: &Selector) -> LockstepResult<usize> {
        let key = selector.to_string();
        let mut state = self.lock();
        state.call_history.push(format!("count:{key}"));
        Ok(Self::count_in(&state, &key))
    }

    async fn act(&self, element: &ElementHandle, gesture: Gesture) -> LockstepResult<()> {
        let label = gesture.to_string();
        let hooks: Vec<GestureHook> = {
            let mut state = self.lock();
            state.call_history.push(format!("{label}:{}", element.id));
            if let Gesture::Fill(value) = &gesture {
                let entry = state
                    .elements
                    .entry(element.id.clone())
                    .or_insert_with(|| MockElement::shown(""));
                entry.value = Some(value.clone());
            }
            state
                .hooks
                .iter()
                .filter(|(selector, hook_label, _)| *selector == element.id && *hook_label == label)
                .map(|(_, _, hook)| Arc::clone(hook))
                .collect()
        };
        for hook in hooks {
            hook(self);
        }
        Ok(())
    }

    async fn read_text(&self, element: &ElementHandle) -> LockstepResult<String> {
        let mut state = self.lock();
        state.call_history.push(format!("read:{}", element.id));
        state
            .elements
            .get_mut(&element.id)
            .map(MockElement::next_text)
            .ok_or_else(|| LockstepError::ElementNotFound {
                selector: element.id.clone(),
            })
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> LockstepResult<Option<String>> {
        let state = self.lock();
        state
            .elements
            .get(&element.id)
            .map(|e| e.attributes.get(name).cloned())
            .ok_or_else(|| LockstepError::ElementNotFound {
                selector: element.id.clone(),
            })
    }

    async fn wait_for(
        &self,
        selector: &Selector,
        state: ElementState,
        timeout: Duration,
    ) -> LockstepResult<()> {
        let key = selector.to_string();
        self.lock().call_history.push(format!("wait:{state}:{key}"));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.state_reached(&key, state) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LockstepError::WaitTimeout {
                    selector: key,
                    state: state.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    fn platform(&self) -> Platform {
        self.platform
    }
}

/// Mock clipboard with scripted reads
#[derive(Debug, Default)]
pub struct MockClipboard {
    scripted: Mutex<VecDeque<String>>,
    contents: Mutex<String>,
    reads: Mutex<u32>,
}

impl MockClipboard {
    /// Create an empty clipboard
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the contents
    pub fn set_text(&self, text: impl Into<String>) {
        if let Ok(mut contents) = self.contents.lock() {
            *contents = text.into();
        }
    }

    /// Queue values returned by the next reads, before falling back to the contents
    pub fn script_reads(&self, reads: impl IntoIterator<Item = String>) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.extend(reads);
        }
    }

    /// Reads performed so far
    #[must_use]
    pub fn read_count(&self) -> u32 {
        self.reads.lock().map(|n| *n).unwrap_or_default()
    }
}

#[async_trait]
impl Clipboard for MockClipboard {
    async fn read_text(&self) -> LockstepResult<String> {
        if let Ok(mut reads) = self.reads.lock() {
            *reads += 1;
        }
        if let Some(next) = self.scripted.lock().ok().and_then(|mut s| s.pop_front()) {
            return Ok(next);
        }
        Ok(self.contents.lock().map(|c| c.clone()).unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    mod surface_tests {
        use super::*;

        #[tokio::test]
        async fn test_find_missing_element() {
            let surface = MockSurface::new();
            let err = surface.find(&Selector::css(".absent")).await.unwrap_err();
            assert!(matches!(err, LockstepError::ElementNotFound { .. }));
            assert!(surface.was_called("find:.absent"));
        }

        #[tokio::test]
        async fn test_scripted_texts_stick_on_last() {
            let surface = MockSurface::new();
            let pagination = Selector::test_id("grid-pagination");
            surface.script_texts(&pagination, ["1 record".to_string(), "2 records".to_string()]);
            assert_eq!(surface.text_of(&pagination).await.unwrap(), "1 record");
            assert_eq!(surface.text_of(&pagination).await.unwrap(), "2 records");
            assert_eq!(surface.text_of(&pagination).await.unwrap(), "2 records");
        }

        #[tokio::test]
        async fn test_count_defaults_to_presence() {
            let surface = MockSurface::new();
            let row = Selector::css(".nc-grid-row");
            assert_eq!(surface.count(&row).await.unwrap(), 0);
            surface.add_element(&row, "");
            assert_eq!(surface.count(&row).await.unwrap(), 1);
            surface.set_count(&row, 4);
            assert_eq!(surface.count(&row).await.unwrap(), 4);
        }

        #[tokio::test]
        async fn test_hooks_run_after_gesture() {
            let surface = MockSurface::new();
            let button = Selector::css(".nc-grid-add-new-cell");
            let row = Selector::css(".nc-grid-row");
            surface.add_element(&button, "+");
            let hook_row = row.clone();
            surface.on(&button, &Gesture::Click, move |s| {
                let n = s.count_of(&hook_row);
                s.set_count(&hook_row, n + 1);
            });

            surface.perform(&button, Gesture::Click).await.unwrap();
            surface.perform(&button, Gesture::Click).await.unwrap();
            surface.perform(&button, Gesture::Hover).await.unwrap();
            assert_eq!(surface.count_of(&row), 2);
            assert_eq!(surface.call_count("click:.nc-grid-add-new-cell"), 2);
        }

        #[tokio::test]
        async fn test_fill_records_value() {
            let surface = MockSurface::new();
            let input = Selector::css("input");
            surface.add_element(&input, "");
            surface
                .perform(&input, Gesture::Fill("Row 0".into()))
                .await
                .unwrap();
            assert_eq!(surface.value_of(&input).as_deref(), Some("Row 0"));
        }

        #[tokio::test]
        async fn test_attribute() {
            let surface = MockSurface::new();
            let item = Selector::css(".ant-pagination-item-2");
            surface.set_attribute(&item, "class", "ant-pagination-item-active");
            let handle = surface.find(&item).await.unwrap();
            assert_eq!(
                surface.attribute(&handle, "class").await.unwrap().as_deref(),
                Some("ant-pagination-item-active")
            );
            assert_eq!(surface.attribute(&handle, "title").await.unwrap(), None);
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_for_states() {
            let surface = MockSurface::new();
            let loader = Selector::test_id("nc-loading");
            surface
                .wait_for(&loader, ElementState::Hidden, Duration::from_millis(50))
                .await
                .unwrap();
            surface.add_element(&loader, "");
            let err = surface
                .wait_for(&loader, ElementState::Hidden, Duration::from_millis(50))
                .await
                .unwrap_err();
            assert!(matches!(err, LockstepError::WaitTimeout { timeout_ms: 50, .. }));
            surface
                .wait_for(&loader, ElementState::Attached, Duration::from_millis(50))
                .await
                .unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_for_observes_later_change() {
            let surface = Arc::new(MockSurface::new());
            let spinner = Selector::test_id("grid-load-spinner");
            surface.add_element(&spinner, "");

            let remote = Arc::clone(&surface);
            let target = spinner.clone();
            let _ = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                remote.set_visible(&target, false);
            });

            surface
                .wait_for(&spinner, ElementState::Hidden, Duration::from_secs(1))
                .await
                .unwrap();
        }

        #[test]
        fn test_platform() {
            assert_eq!(
                MockSurface::with_platform(Platform::MacOs).platform(),
                Platform::MacOs
            );
        }
    }

    mod clipboard_tests {
        use super::*;

        #[tokio::test]
        async fn test_scripted_then_contents() {
            let clipboard = MockClipboard::new();
            clipboard.script_reads([String::new(), String::new()]);
            clipboard.set_text("Row 1");
            assert_eq!(clipboard.read_text().await.unwrap(), "");
            assert_eq!(clipboard.read_text().await.unwrap(), "");
            assert_eq!(clipboard.read_text().await.unwrap(), "Row 1");
            assert_eq!(clipboard.read_count(), 3);
        }

        #[tokio::test]
        async fn test_hook_populates_clipboard() {
            let surface = MockSurface::new();
            let clipboard = Arc::new(MockClipboard::new());
            let grid = Selector::test_id("nc-grid-wrapper");
            surface.add_element(&grid, "");
            let presses = Arc::new(AtomicU32::new(0));
            let (cb, counter) = (Arc::clone(&clipboard), Arc::clone(&presses));
            surface.on(&grid, &Gesture::Press("Control+C".into()), move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) >= 1 {
                    cb.set_text("copied");
                }
            });

            surface
                .perform(&grid, Gesture::Press("Control+C".into()))
                .await
                .unwrap();
            assert_eq!(clipboard.read_text().await.unwrap(), "");
            surface
                .perform(&grid, Gesture::Press("Control+C".into()))
                .await
                .unwrap();
            assert_eq!(clipboard.read_text().await.unwrap(), "copied");
        }
    }
}
