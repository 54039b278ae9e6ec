//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod catalog;
pub mod files;
pub mod health;
pub mod receipts;

// Re-export all handlers for use in router
pub use catalog::*;
pub use files::*;
pub use health::*;
pub use receipts::*;
