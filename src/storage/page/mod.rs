//! Page types and layout.
//!
//! This module contains:
//! - [`PageData`] - The raw 8KB data container
//! - [`page_one`] - The startup-validity marker kept on page 1
//! - [`page_x`] - Data pages with a free-space offset header

#[allow(clippy::module_inception)]
mod page;
pub mod page_one;
pub mod page_x;

pub use page::PageData;
