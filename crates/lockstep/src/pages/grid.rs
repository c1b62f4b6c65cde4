use super::dashboard::{DashboardPage, COPIED_TOAST};
use super::PageObject;
use crate::clipboard::ClipboardText;
use crate::coerce::{field_equals, field_truthy, Expectation};
use crate::correlate::ResponseMatcher;
use crate::network::{Exchange, HttpMethod};
use crate::poll::{PollReport, RetryBudget};
use crate::result::{LockstepError, LockstepResult};
use crate::session::Session;
use crate::surface::{ElementState, Gesture, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Data API path shared by row inserts and updates
pub const DATA_API_PATH: &str = "api/v1/db/data/noco";

const VIEWS_API_PATH: &str = "/views/";
const DEFAULT_COLUMN: &str = "Title";

/// Options for [`GridPage::add_new_row`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRowOptions {
    /// Row index the new row lands on
    pub index: usize,
    /// Column to fill
    pub column_header: String,
    /// Value to fill; `Row {index}` when unset
    pub value: Option<String>,
    /// Correlate the save with its network response
    pub network_validation: bool,
}

impl Default for AddRowOptions {
    fn default() -> Self {
        Self {
            index: 0,
            column_header: DEFAULT_COLUMN.to_string(),
            value: None,
            network_validation: true,
        }
    }
}

impl AddRowOptions {
    /// Defaults: index 0, column "Title", value "Row 0", validated
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set row index
    #[must_use]
    pub const fn index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Set column
    #[must_use]
    pub fn column_header(mut self, column: impl Into<String>) -> Self {
        self.column_header = column.into();
        self
    }

    /// Set value
    #[must_use]
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Toggle network validation
    #[must_use]
    pub const fn network_validation(mut self, enabled: bool) -> Self {
        self.network_validation = enabled;
        self
    }

    /// Value that will be filled
    #[must_use]
    pub fn resolved_value(&self) -> String {
        self.value
            .clone()
            .unwrap_or_else(|| format!("Row {}", self.index))
    }
}

/// Options for [`GridPage::edit_row`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRowOptions {
    /// Row index
    pub index: usize,
    /// Column to edit
    pub column_header: String,
    /// New value
    pub value: String,
    /// Correlate the save with its network response
    pub network_validation: bool,
}

impl EditRowOptions {
    /// Edit row 0's "Title" to `value`, validated
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            index: 0,
            column_header: DEFAULT_COLUMN.to_string(),
            value: value.into(),
            network_validation: true,
        }
    }

    /// Set row index
    #[must_use]
    pub const fn index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Set column
    #[must_use]
    pub fn column_header(mut self, column: impl Into<String>) -> Self {
        self.column_header = column.into();
        self
    }

    /// Toggle network validation
    #[must_use]
    pub const fn network_validation(mut self, enabled: bool) -> Self {
        self.network_validation = enabled;
        self
    }
}

/// A grid cell by row index and column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRef {
    /// Row index
    pub index: usize,
    /// Column header
    pub column_header: String,
}

impl CellRef {
    /// Create a cell reference
    #[must_use]
    pub fn new(index: usize, column_header: impl Into<String>) -> Self {
        Self {
            index,
            column_header: column_header.into(),
        }
    }
}

/// Pagination control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaginationTarget {
    /// Previous-page arrow
    Previous,
    /// Next-page arrow
    Next,
    /// Numbered page
    Page(u32),
}

impl std::str::FromStr for PaginationTarget {
    type Err = LockstepError;

    /// Accepts `<`, `>` or a page number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "<" => Ok(Self::Previous),
            ">" => Ok(Self::Next),
            other => other
                .parse()
                .map(Self::Page)
                .map_err(|_| LockstepError::AssertionFailed {
                    message: format!("unknown pagination target {other:?}"),
                }),
        }
    }
}

impl std::fmt::Display for PaginationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Previous => f.write_str("<"),
            Self::Next => f.write_str(">"),
            Self::Page(n) => write!(f, "{n}"),
        }
    }
}

/// Grid view
#[derive(Debug, Clone, Copy)]
pub struct GridPage<'a> {
    session: &'a Session,
    dashboard: DashboardPage<'a>,
}

impl PageObject for GridPage<'_> {
    fn root(&self) -> Selector {
        Self::wrapper()
    }

    fn page_name(&self) -> &str {
        "grid"
    }
}

// Selectors
impl GridPage<'_> {
    /// Grid wrapper
    #[must_use]
    pub fn wrapper() -> Selector {
        Selector::test_id("nc-grid-wrapper")
    }

    /// Every rendered row
    #[must_use]
    pub fn rows() -> Selector {
        Self::wrapper().locate(Selector::css(".nc-grid-row"))
    }

    /// Row by index
    #[must_use]
    pub fn row(index: usize) -> Selector {
        Self::wrapper().locate(Selector::css(format!(
            "tr[data-testid=\"grid-row-{index}\"]"
        )))
    }

    /// Cell by index and column
    #[must_use]
    pub fn cell(index: usize, column_header: &str) -> Selector {
        Self::wrapper().locate(Selector::css(format!(
            "td[data-testid=\"cell-{column_header}-{index}\"]"
        )))
    }

    /// Editor input inside a cell
    #[must_use]
    pub fn cell_input(index: usize, column_header: &str) -> Selector {
        Self::cell(index, column_header).locate(Selector::css("input"))
    }

    /// "Add new row" cell below the last row
    #[must_use]
    pub fn add_new_cell() -> Selector {
        Self::wrapper().locate(Selector::css(".nc-grid-add-new-cell"))
    }

    /// Column header; clicking it commits the edited cell
    #[must_use]
    pub fn column_header(column_header: &str) -> Selector {
        Self::wrapper()
            .locate(Selector::css(format!("[data-title=\"{column_header}\"]")))
            .locate(Selector::css(format!("div[title=\"{column_header}\"]")))
    }

    /// Pagination bar
    #[must_use]
    pub fn pagination_bar() -> Selector {
        Self::wrapper().locate(Selector::css(".nc-pagination"))
    }

    /// Record-count text ("N records")
    #[must_use]
    pub fn pagination_text() -> Selector {
        Self::wrapper().locate(Selector::test_id("grid-pagination"))
    }

    /// Pagination control
    #[must_use]
    pub fn pagination_item(target: PaginationTarget) -> Selector {
        let css = match target {
            PaginationTarget::Previous => ".nc-pagination > .ant-pagination-prev".to_string(),
            PaginationTarget::Next => ".nc-pagination > .ant-pagination-next".to_string(),
            PaginationTarget::Page(n) => {
                format!(".nc-pagination > .ant-pagination-item.ant-pagination-item-{n}")
            }
        };
        Self::wrapper().locate(Selector::css(css))
    }

    /// Grid loading spinner
    #[must_use]
    pub fn load_spinner() -> Selector {
        Selector::test_id("grid-load-spinner")
    }

    /// Context-menu entry by label
    #[must_use]
    pub fn context_menu_item(label: &str) -> Selector {
        Selector::text(label)
    }

    /// Context-menu "Copy" entry
    #[must_use]
    pub fn copy_menu_item() -> Selector {
        Selector::test_id("context-menu-item-copy")
    }

    /// Open context dropdown
    #[must_use]
    pub fn context_dropdown() -> Selector {
        Selector::css("span.ant-dropdown-menu-title-content > nc-project-menu-item")
    }
}

impl<'a> GridPage<'a> {
    /// Bind to a session
    #[must_use]
    pub const fn new(session: &'a Session) -> Self {
        Self {
            session,
            dashboard: DashboardPage::new(session),
        }
    }

    /// Enclosing dashboard
    #[must_use]
    pub const fn dashboard(&self) -> DashboardPage<'a> {
        self.dashboard
    }

    /// Number of rendered rows
    ///
    /// # Errors
    ///
    /// Propagates surface failures
    pub async fn row_count(&self) -> LockstepResult<usize> {
        self.session.surface().count(&Self::rows()).await
    }

    /// Poll until exactly `count` rows are rendered
    ///
    /// # Errors
    ///
    /// `PollExhausted` with the last observed count
    pub async fn verify_row_count(&self, count: usize) -> LockstepResult<PollReport> {
        let surface = self.session.surface();
        let rows = Self::rows();
        let rows = &rows;
        self.session
            .poll_until(
                "grid row count",
                move || async move {
                    let count = surface.count(rows).await?;
                    Ok::<_, LockstepError>(count.to_string())
                },
                &Expectation::integer(as_i64(count)),
                self.session.config().row_count_budget,
            )
            .await
    }

    /// Append a row, fill one cell, and save it.
    ///
    /// With network validation the save click is correlated with the `POST`
    /// whose response carries the filled value; otherwise the save is
    /// followed by the configured settle delay.
    ///
    /// # Errors
    ///
    /// Row-count, correlation, or surface failures
    pub async fn add_new_row(&self, options: AddRowOptions) -> LockstepResult<Option<Exchange>> {
        let value = options.resolved_value();
        if options.index != 0 {
            self.session
                .wait_for(&Self::rows().first(), ElementState::Attached)
                .await?;
        }
        self.session
            .wait_for(&Self::add_new_cell(), ElementState::Visible)
            .await?;

        let before = self.row_count().await?;
        self.session
            .surface()
            .perform(&Self::add_new_cell(), Gesture::Click)
            .await?;
        let _ = self.verify_row_count(before + 1).await?;

        self.fill_cell(options.index, &options.column_header, &value)
            .await?;
        let exchange = self
            .save(
                &options.column_header,
                &value,
                [HttpMethod::Post],
                options.network_validation,
            )
            .await?;
        self.dashboard.wait_for_loader_to_disappear().await?;
        Ok(exchange)
    }

    /// Overwrite one cell and save it.
    ///
    /// Saving an empty row issues a `POST` rather than a `PATCH`, so both
    /// methods are accepted.
    ///
    /// # Errors
    ///
    /// Correlation or surface failures
    pub async fn edit_row(&self, options: EditRowOptions) -> LockstepResult<Option<Exchange>> {
        self.fill_cell(options.index, &options.column_header, &options.value)
            .await?;
        let exchange = self
            .save(
                &options.column_header,
                &options.value,
                [HttpMethod::Patch, HttpMethod::Post],
                options.network_validation,
            )
            .await?;
        self.dashboard.wait_for_loader_to_disappear().await?;
        Ok(exchange)
    }

    async fn fill_cell(
        &self,
        index: usize,
        column_header: &str,
        value: &str,
    ) -> LockstepResult<()> {
        let surface = self.session.surface();
        let cell = Self::cell(index, column_header);
        self.session.wait_for(&cell, ElementState::Visible).await?;
        surface.perform(&cell, Gesture::DoubleClick).await?;
        surface
            .perform(
                &Self::cell_input(index, column_header),
                Gesture::Fill(value.to_string()),
            )
            .await
    }

    async fn save(
        &self,
        column_header: &str,
        value: &str,
        methods: impl IntoIterator<Item = HttpMethod>,
        network_validation: bool,
    ) -> LockstepResult<Option<Exchange>> {
        let header = Self::column_header(column_header);
        let click = self.session.surface().perform(&header, Gesture::Click);
        if !network_validation {
            click.await?;
            self.session.settle().await;
            return Ok(None);
        }

        // Numeric columns come back as JSON numbers
        let matcher = ResponseMatcher::new(DATA_API_PATH).methods(methods).body(
            format!("{column_header} == {value:?}"),
            field_equals(column_header, value),
        );
        self.session.correlate(&matcher, click).await.map(Some)
    }

    /// Assert row `index` is rendered exactly once
    ///
    /// # Errors
    ///
    /// `WaitTimeout` if never visible, `AssertionFailed` on duplicates
    pub async fn verify_row(&self, index: usize) -> LockstepResult<()> {
        let cell = Self::cell(index, DEFAULT_COLUMN);
        self.session.wait_for(&cell, ElementState::Visible).await?;
        self.expect_count(&cell, 1).await
    }

    /// Assert row `index` is gone
    ///
    /// # Errors
    ///
    /// `WaitTimeout` if it stays visible, `AssertionFailed` if still attached
    pub async fn verify_row_does_not_exist(&self, index: usize) -> LockstepResult<()> {
        let cell = Self::cell(index, DEFAULT_COLUMN);
        self.session.wait_for(&cell, ElementState::Hidden).await?;
        self.expect_count(&cell, 0).await
    }

    async fn expect_count(&self, selector: &Selector, expected: usize) -> LockstepResult<()> {
        let actual = self.session.surface().count(selector).await?;
        if actual == expected {
            Ok(())
        } else {
            Err(LockstepError::AssertionFailed {
                message: format!("{selector}: expected {expected} matches, found {actual}"),
            })
        }
    }

    /// Delete a row through its context menu
    ///
    /// # Errors
    ///
    /// Surface failures or a context menu that never closes
    pub async fn delete_row(&self, index: usize, column_header: &str) -> LockstepResult<()> {
        let surface = self.session.surface();
        surface
            .perform(&Self::cell(index, column_header), Gesture::RightClick)
            .await?;
        surface
            .perform(&Self::context_menu_item("Delete Row"), Gesture::Click)
            .await?;
        self.session
            .wait_for(&Self::context_dropdown(), ElementState::Hidden)
            .await?;
        self.session.settle().await;
        self.dashboard.wait_for_loader_to_disappear().await
    }

    /// Insert a row through the context menu of row `index`
    ///
    /// # Errors
    ///
    /// `PollExhausted` if the row count does not grow by one
    pub async fn add_row_right_click_menu(
        &self,
        index: usize,
        column_header: &str,
    ) -> LockstepResult<()> {
        let surface = self.session.surface();
        let before = self.row_count().await?;
        let cell = Self::cell(index, column_header).last();
        surface.perform(&cell, Gesture::Click).await?;
        surface.perform(&cell, Gesture::RightClick).await?;
        surface
            .perform(&Self::context_menu_item("Insert New Row"), Gesture::Click)
            .await?;
        self.verify_row_count(before + 1).await.map(|_| ())
    }

    /// Poll the record-count text until it reads `count`
    ///
    /// # Errors
    ///
    /// `PollExhausted` with the last rendered text
    pub async fn verify_total_row_count(&self, count: i64) -> LockstepResult<PollReport> {
        self.poll_record_count(
            "grid total row count",
            Self::pagination_bar(),
            count,
            self.session.config().row_count_budget,
        )
        .await
    }

    /// Poll the record-count text, with the slower pagination budget
    ///
    /// # Errors
    ///
    /// `PollExhausted` with the last rendered text
    pub async fn verify_pagination_count(&self, count: i64) -> LockstepResult<PollReport> {
        self.poll_record_count(
            "grid pagination count",
            Self::pagination_bar().first(),
            count,
            self.session.config().pagination_budget,
        )
        .await
    }

    async fn poll_record_count(
        &self,
        target: &str,
        bar: Selector,
        count: i64,
        budget: RetryBudget,
    ) -> LockstepResult<PollReport> {
        let session = self.session;
        let text = Self::pagination_text();
        let (bar, text) = (&bar, &text);
        session
            .poll_until(
                target,
                move || async move {
                    session.wait_for(bar, ElementState::Attached).await?;
                    session.surface().text_of(text).await
                },
                &Expectation::integer(count),
                budget,
            )
            .await
    }

    /// Click a pagination control and wait for the grid to reload.
    ///
    /// With `skip_wait` the click is correlated with the view reload
    /// (`GET` under `/views/` with a truthy `pageInfo`) before the spinner
    /// check.
    ///
    /// # Errors
    ///
    /// Correlation or wait failures
    pub async fn click_pagination(
        &self,
        target: PaginationTarget,
        skip_wait: bool,
    ) -> LockstepResult<Option<Exchange>> {
        self.session
            .wait_for(&Self::pagination_bar(), ElementState::Attached)
            .await?;
        let item = Self::pagination_item(target);
        let click = self.session.surface().perform(&item, Gesture::Click);

        let exchange = if skip_wait {
            let matcher = ResponseMatcher::new(VIEWS_API_PATH)
                .method(HttpMethod::Get)
                .body("pageInfo", field_truthy("pageInfo"));
            Some(self.session.correlate(&matcher, click).await?)
        } else {
            click.await?;
            None
        };
        self.wait_loading().await?;
        Ok(exchange)
    }

    /// Assert a pagination control is the active page
    ///
    /// # Errors
    ///
    /// `AssertionFailed` if the active class is missing
    pub async fn verify_active_page(&self, target: PaginationTarget) -> LockstepResult<()> {
        let surface = self.session.surface();
        let item = surface.find(&Self::pagination_item(target)).await?;
        let class = surface.attribute(&item, "class").await?.unwrap_or_default();
        if class
            .split_whitespace()
            .any(|c| c == "ant-pagination-item-active")
        {
            Ok(())
        } else {
            Err(LockstepError::AssertionFailed {
                message: format!("page {target} is not active (class {class:?})"),
            })
        }
    }

    /// Wait for the grid spinner to hide
    ///
    /// # Errors
    ///
    /// `WaitTimeout` if it stays visible
    pub async fn wait_loading(&self) -> LockstepResult<()> {
        self.session
            .wait_for(&Self::load_spinner(), ElementState::Hidden)
            .await
    }

    /// Copy the selection with the platform key chord.
    ///
    /// Every attempt re-presses the chord; the result may be empty.
    ///
    /// # Errors
    ///
    /// Surface failures or a missing toast
    pub async fn copy_with_keyboard(&self) -> LockstepResult<ClipboardText> {
        let session = self.session;
        let dashboard = self.dashboard;
        let wrapper = Self::wrapper();
        let wrapper = &wrapper;
        let chord = session.surface().platform().copy_chord();
        debug!(chord, "copy with keyboard");
        session
            .copy_until_non_empty(move || async move {
                session
                    .surface()
                    .perform(wrapper, Gesture::Press(chord.to_string()))
                    .await?;
                dashboard.verify_toast(COPIED_TOAST).await?;
                session.clipboard().read_text().await
            })
            .await
    }

    /// Copy a cell through its context menu.
    ///
    /// # Errors
    ///
    /// Surface failures or a missing toast
    pub async fn copy_with_mouse(&self, cell: &CellRef) -> LockstepResult<ClipboardText> {
        let session = self.session;
        let dashboard = self.dashboard;
        let target = Self::cell(cell.index, &cell.column_header);
        let copy_item = Self::copy_menu_item();
        let (target, copy_item) = (&target, &copy_item);
        session
            .copy_until_non_empty(move || async move {
                let surface = session.surface();
                surface.perform(target, Gesture::RightClick).await?;
                surface.perform(copy_item, Gesture::Click).await?;
                dashboard.verify_toast(COPIED_TOAST).await?;
                session.clipboard().read_text().await
            })
            .await
    }
}

fn as_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    mod options_tests {
        use super::*;

        #[test]
        fn test_add_row_defaults() {
            let options = AddRowOptions::new();
            assert_eq!(options.index, 0);
            assert_eq!(options.column_header, "Title");
            assert!(options.network_validation);
            assert_eq!(options.resolved_value(), "Row 0");
            assert_eq!(AddRowOptions::new().index(4).resolved_value(), "Row 4");
            assert_eq!(AddRowOptions::new().value("x").resolved_value(), "x");
        }

        #[test]
        fn test_edit_row_builder() {
            let options = EditRowOptions::new("42")
                .index(2)
                .column_header("Amount")
                .network_validation(false);
            assert_eq!(options.index, 2);
            assert_eq!(options.column_header, "Amount");
            assert!(!options.network_validation);
        }
    }

    mod pagination_tests {
        use super::*;

        #[test]
        fn test_parse_targets() {
            assert_eq!("<".parse::<PaginationTarget>().unwrap(), PaginationTarget::Previous);
            assert_eq!(">".parse::<PaginationTarget>().unwrap(), PaginationTarget::Next);
            assert_eq!("3".parse::<PaginationTarget>().unwrap(), PaginationTarget::Page(3));
            assert!("first".parse::<PaginationTarget>().is_err());
        }

        #[test]
        fn test_item_selectors() {
            assert!(GridPage::pagination_item(PaginationTarget::Page(2))
                .to_string()
                .ends_with(".ant-pagination-item.ant-pagination-item-2"));
            assert!(GridPage::pagination_item(PaginationTarget::Next)
                .to_string()
                .ends_with(".ant-pagination-next"));
        }
    }

    mod selector_tests {
        use super::*;

        #[test]
        fn test_cell_selector() {
            assert_eq!(
                GridPage::cell(3, "Title").to_string(),
                "[data-testid=\"nc-grid-wrapper\"] >> td[data-testid=\"cell-Title-3\"]"
            );
        }

        #[test]
        fn test_column_header_selector() {
            assert_eq!(
                GridPage::column_header("Title").to_string(),
                "[data-testid=\"nc-grid-wrapper\"] >> [data-title=\"Title\"] >> div[title=\"Title\"]"
            );
        }
    }
}
