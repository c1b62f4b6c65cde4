//! Page objects built on the synchronization primitives.
//!
//! ## Toyota Way Application:
//! - **Poka-Yoke**: Typed selectors and option structs instead of loose strings
//! - **Muda**: Each page operation waits on the exact outcome it causes, never a fixed sleep
//! - **Genchi Genbutsu**: Page objects reflect actual page structure

mod dashboard;
mod grid;

pub use dashboard::{DashboardPage, COPIED_TOAST};
pub use grid::{AddRowOptions, CellRef, EditRowOptions, GridPage, PaginationTarget, DATA_API_PATH};

use crate::surface::Selector;

/// A page or component of the application under test
pub trait PageObject {
    /// Selector scoping every element of the page
    fn root(&self) -> Selector;

    /// Get the page name for logging/debugging
    fn page_name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
