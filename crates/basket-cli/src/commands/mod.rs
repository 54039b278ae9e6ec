//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - init and shared utilities (open_db, storage, pipeline wiring)
//! - `ingest` - Pipeline runs (ingest, reprocess)
//! - `receipts` - Receipt inspection (list, show, partial)
//! - `catalog` - Categories and the translation cache
//! - `prompts` - Prompt library listing
//! - `serve` - Web server command

pub mod catalog;
pub mod core;
pub mod ingest;
pub mod prompts;
pub mod receipts;
pub mod serve;

// Re-export command functions for main.rs
pub use catalog::*;
pub use core::*;
pub use ingest::*;
pub use prompts::*;
pub use receipts::*;
pub use serve::*;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
